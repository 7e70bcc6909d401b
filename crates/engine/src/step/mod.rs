//! Step descriptors and their combinators.
//!
//! A [`Step`] is an immutable description of work. Building one never runs
//! anything and never fails; the same tree can be handed to the interpreter
//! any number of times. Every step carries a stable name used in the trace
//! and a [`Policy`]. Combinators such as [`Step::retry`] return a new step
//! sharing the same node, so descriptors are never mutated in place.
//!
//! Composition rests on a single primitive, [`Step::bind`]: the generator
//! receives the left step's result and returns the step to run next. Map,
//! `then` and `sequence` are built from it.

use std::{fmt, sync::Arc, time::Duration};

use serde_json::Value;

use crate::policy::{ErrorHandling, Policy};

pub mod command;

pub use command::{AxisCommand, Command, CylinderCommand, EngineCommand, MaterialCommand, SensorCommand};

/// Produces the continuation of a sequence from the left step's result.
pub type Generator = Arc<dyn Fn(Value) -> Step + Send + Sync>;

/// One device command addressed to a named device.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Registry name of the target; empty for engine-level commands.
    pub device: String,
    pub command: Command,
}

/// The shape of a step.
pub enum Node {
    Action(Action),
    /// Run `left`, feed its result to `next`, run the returned step.
    Sequence { left: Step, next: Generator },
    /// Run all children concurrently; the result is the array of their results.
    Parallel(Vec<Step>),
    /// Named wrapper applying its own policy to a whole sub-tree.
    Scope(Step),
    /// Complete immediately with the carried value (`null` for a plain start).
    Start(Value),
    /// Fail immediately with the message.
    Fail(String),
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Node::Sequence { left, .. } => f.debug_struct("Sequence").field("left", left).finish_non_exhaustive(),
            Node::Parallel(children) => f.debug_tuple("Parallel").field(children).finish(),
            Node::Scope(inner) => f.debug_tuple("Scope").field(inner).finish(),
            Node::Start(value) => f.debug_tuple("Start").field(value).finish(),
            Node::Fail(message) => f.debug_tuple("Fail").field(message).finish(),
        }
    }
}

/// An immutable, cheaply clonable step descriptor.
#[derive(Clone)]
pub struct Step {
    name: Arc<str>,
    policy: Policy,
    node: Arc<Node>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("node", &self.node)
            .finish()
    }
}

impl Step {
    fn from_node(name: impl Into<Arc<str>>, node: Node) -> Self {
        Self {
            name: name.into(),
            policy: Policy::default(),
            node: Arc::new(node),
        }
    }

    /// A no-op producing `null`.
    pub fn start() -> Self {
        Self::from_node("start", Node::Start(Value::Null))
    }

    /// A no-op producing `value`.
    pub fn pure(value: impl Into<Value>) -> Self {
        Self::from_node("start", Node::Start(value.into()))
    }

    /// A step that always fails with `message`.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::from_node("fail", Node::Fail(message.into()))
    }

    /// An action named after its operation and target, e.g. `move_to x`.
    pub fn action(device: impl Into<String>, command: Command) -> Self {
        let device = device.into();
        let name = if device.is_empty() {
            command.label().to_string()
        } else {
            format!("{} {}", command.label(), device)
        };
        Self::from_node(name, Node::Action(Action { device, command }))
    }

    /// Run all `steps` concurrently.
    pub fn in_parallel(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::from_node("parallel", Node::Parallel(steps.into_iter().collect()))
    }

    /// Wrap `inner` so a name and policy apply to it as one unit.
    pub fn scope(name: impl Into<String>, inner: Step) -> Self {
        let name: String = name.into();
        Self::from_node(name, Node::Scope(inner))
    }

    /// Chain `steps` left to right, producing the last step's result.
    pub fn sequence(steps: impl IntoIterator<Item = Step>) -> Self {
        steps.into_iter().fold(Step::start(), |chain, step| chain.then(step))
    }

    /// Run this step, then the step `next` builds from its result.
    pub fn bind<F>(self, next: F) -> Self
    where
        F: Fn(Value) -> Step + Send + Sync + 'static,
    {
        Self::from_node(
            "sequence",
            Node::Sequence {
                left: self,
                next: Arc::new(next),
            },
        )
    }

    /// Transform this step's eventual result.
    pub fn map<F>(self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.bind(move |value| Step::pure(transform(value)))
    }

    /// Run this step, discard its result, then run `next`.
    pub fn then(self, next: Step) -> Self {
        self.bind(move |_| next.clone())
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn with_policy(self, policy: Policy) -> Self {
        Self { policy, ..self }
    }

    pub fn retry(self, retry_count: u32) -> Self {
        let policy = self.policy.with_retry(retry_count);
        self.with_policy(policy)
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let policy = self.policy.with_timeout(timeout);
        self.with_policy(policy)
    }

    pub fn on_error(self, error_handling: ErrorHandling) -> Self {
        let policy = self.policy.with_error_handling(error_handling);
        self.with_policy(policy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Target device for trace events; empty for non-action nodes.
    pub fn target_device(&self) -> &str {
        match self.node.as_ref() {
            Node::Action(action) => &action.device,
            _ => "",
        }
    }

    /// Whether the interpreter publishes trace updates for this node.
    ///
    /// Sequences and starts are structural; their children carry the locus.
    pub fn is_traced(&self) -> bool {
        !matches!(self.node.as_ref(), Node::Sequence { .. } | Node::Start(_))
    }

    /// Whether two descriptors share the same node.
    pub fn same_node(&self, other: &Step) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

/// Device command constructors.
impl Step {
    pub fn move_to(axis: impl Into<String>, position: f64) -> Self {
        Self::action(axis, Command::Axis(AxisCommand::MoveTo { position }))
    }

    pub fn move_to_and_wait(axis: impl Into<String>, position: f64) -> Self {
        Self::action(axis, Command::Axis(AxisCommand::MoveToAndWait { position }))
    }

    pub fn move_until(axis: impl Into<String>, limit: f64, sensor: impl Into<String>, threshold: f64) -> Self {
        Self::action(
            axis,
            Command::Axis(AxisCommand::MoveUntil {
                limit,
                sensor: sensor.into(),
                threshold,
            }),
        )
    }

    pub fn read_position(axis: impl Into<String>) -> Self {
        Self::action(axis, Command::Axis(AxisCommand::ReadPosition))
    }

    pub fn stop_axis(axis: impl Into<String>) -> Self {
        Self::action(axis, Command::Axis(AxisCommand::Stop))
    }

    pub fn fire(cylinder: impl Into<String>, extend: bool) -> Self {
        Self::action(cylinder, Command::Cylinder(CylinderCommand::Fire { extend }))
    }

    pub fn fire_and_wait(cylinder: impl Into<String>, extend: bool) -> Self {
        Self::action(cylinder, Command::Cylinder(CylinderCommand::FireAndWait { extend }))
    }

    pub fn wait_for(cylinder: impl Into<String>, extended: bool) -> Self {
        Self::action(cylinder, Command::Cylinder(CylinderCommand::WaitFor { extended }))
    }

    pub fn check_level(sensor: impl Into<String>, expected: bool) -> Self {
        Self::action(sensor, Command::Sensor(SensorCommand::CheckLevel { expected }))
    }

    pub fn read_analog(sensor: impl Into<String>) -> Self {
        Self::action(sensor, Command::Sensor(SensorCommand::ReadAnalog))
    }

    pub fn material(table: impl Into<String>, command: MaterialCommand) -> Self {
        Self::action(table, Command::Material(command))
    }

    pub fn set_variable(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::action(
            "",
            Command::Engine(EngineCommand::SetVariable {
                key: key.into(),
                value: value.into(),
            }),
        )
    }

    pub fn get_variable(key: impl Into<String>) -> Self {
        Self::action("", Command::Engine(EngineCommand::GetVariable { key: key.into() }))
    }

    pub fn dwell(duration: Duration) -> Self {
        Self::action("", Command::Engine(EngineCommand::Dwell { duration }))
    }
}

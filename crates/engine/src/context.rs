//! Per-run execution context.
//!
//! An [`ExecutionContext`] is created for one flow run and shared by every
//! node of that run: the device registry, the variable table, the run's
//! cancellation signal, the trace channel and the operator used for
//! escalations. Clones are cheap and refer to the same run.

use std::sync::{Arc, PoisonError, RwLock};

use cellflow_types::{ActiveStepUpdate, MachineConfig, StepStatus};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    device::DeviceRegistry,
    operator::{AbortingOperator, Operator},
    step::Step,
};

const DEFAULT_TRACE_CAPACITY: usize = 256;
const MOCK_PREFIX: &str = "mock.";

/// Shared key/value table for cross-step scalars and mock sensor readings.
///
/// Writes are visible to every later read. Concurrent children of a parallel
/// step should not write the same key.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    inner: Arc<RwLock<IndexMap<String, Value>>>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|value| value.as_f64())
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).shift_remove(key)
    }

    /// Inject a reading returned by the named sensor instead of its model.
    pub fn set_mock_reading(&self, sensor: &str, reading: f64) {
        self.set(format!("{MOCK_PREFIX}{sensor}"), reading);
    }

    /// Inject a digital level, stored as a reading of 1.0 or 0.0.
    pub fn set_mock_level(&self, sensor: &str, level: bool) {
        self.set_mock_reading(sensor, if level { 1.0 } else { 0.0 });
    }

    pub fn mock_reading(&self, sensor: &str) -> Option<f64> {
        self.get_f64(&format!("{MOCK_PREFIX}{sensor}"))
    }

    pub fn clear_mock_reading(&self, sensor: &str) {
        self.remove(&format!("{MOCK_PREFIX}{sensor}"));
    }

    /// Copy of the whole table in insertion order.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Shared state threaded through one flow run.
#[derive(Clone)]
pub struct ExecutionContext {
    devices: Arc<DeviceRegistry>,
    variables: Variables,
    run_token: CancellationToken,
    /// Token of the innermost cancellation scope; a child of `run_token`.
    cancellation: CancellationToken,
    trace: broadcast::Sender<ActiveStepUpdate>,
    operator: Arc<dyn Operator>,
    machine: Arc<MachineConfig>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("devices", &self.devices)
            .field("variables", &self.variables)
            .field("cancelled", &self.is_cancelled())
            .field("machine", &self.machine.name)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn machine(&self) -> &MachineConfig {
        &self.machine
    }

    pub fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    /// Cancel the whole run.
    pub fn cancel(&self) {
        self.run_token.cancel();
    }

    /// Whether the run, or the scope this context belongs to, was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancellation token of the current scope.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancellation token of the whole run. Fire-and-forget device commands
    /// are bound to this so they outlive the step that issued them.
    pub fn run_cancellation(&self) -> &CancellationToken {
        &self.run_token
    }

    /// Subscribe to the trace of this run. Only updates published after the
    /// call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ActiveStepUpdate> {
        self.trace.subscribe()
    }

    /// A context sharing everything but cancelled independently of siblings.
    pub(crate) fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }

    pub(crate) fn publish(&self, step: &Step, status: StepStatus) {
        debug!(step = %step.name(), device = %step.target_device(), ?status, "step transition");
        // No subscribers is fine; the trace is not retained.
        let _ = self
            .trace
            .send(ActiveStepUpdate::new(step.target_device(), step.name(), status));
    }
}

/// Builder for [`ExecutionContext`].
pub struct ExecutionContextBuilder {
    devices: DeviceRegistry,
    variables: Variables,
    operator: Arc<dyn Operator>,
    trace_capacity: usize,
    machine: MachineConfig,
    cancellation: Option<CancellationToken>,
}

impl Default for ExecutionContextBuilder {
    fn default() -> Self {
        Self {
            devices: DeviceRegistry::new(),
            variables: Variables::new(),
            operator: Arc::new(AbortingOperator),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            machine: MachineConfig::default(),
            cancellation: None,
        }
    }
}

impl ExecutionContextBuilder {
    pub fn devices(mut self, devices: DeviceRegistry) -> Self {
        self.devices = devices;
        self
    }

    /// Use an existing table, e.g. one shared with a simulated backend.
    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn variable(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.set(key, value);
        self
    }

    pub fn mock_reading(self, sensor: &str, reading: f64) -> Self {
        self.variables.set_mock_reading(sensor, reading);
        self
    }

    pub fn operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    pub fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity.max(1);
        self
    }

    pub fn machine(mut self, machine: MachineConfig) -> Self {
        self.machine = machine;
        self
    }

    /// Bind the run to an externally owned token, e.g. a process-wide shutdown signal.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn build(self) -> ExecutionContext {
        let run_token = self.cancellation.unwrap_or_default();
        let (trace, _) = broadcast::channel(self.trace_capacity);
        ExecutionContext {
            devices: Arc::new(self.devices),
            variables: self.variables,
            cancellation: run_token.clone(),
            run_token,
            trace,
            operator: self.operator,
            machine: Arc::new(self.machine),
        }
    }
}

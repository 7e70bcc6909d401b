//! # Cellflow Engine
//!
//! Sequencing of machine operations for an automation cell: motion axes,
//! pneumatic cylinders, sensors and workpiece bookkeeping.
//!
//! Flows are described with immutable [`Step`] trees built from a small set
//! of combinators, each node carrying a [`Policy`] (retries, per-attempt
//! timeout, error handling). The [`run`] interpreter walks a tree against an
//! [`ExecutionContext`] bound to a device backend and streams
//! [`ActiveStepUpdate`](cellflow_types::ActiveStepUpdate)s to subscribers.
//!
//! ## Usage
//!
//! ```rust
//! use cellflow_engine::{ExecutionContext, Step, run};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new()?.block_on(async {
//! let ctx = ExecutionContext::builder().build();
//! let flow = Step::set_variable("count", 2).map(|value| json!(value.as_i64().unwrap_or(0) * 10));
//! assert_eq!(run(&flow, &ctx).await?, json!(20));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`step`**: descriptors, combinators and the closed command set
//! - **`policy`**: retry, timeout and error-handling settings
//! - **`device`**: capability contracts a backend implements, and the registry
//! - **`context`**: per-run state (devices, variables, cancellation, trace)
//! - **`operator`**: escalation channel for `AskUser` handling
//! - **`interpreter`**: the policy loop, parallel groups and dispatch

pub mod context;
pub mod device;
pub mod failure;
pub mod interpreter;
pub mod operator;
pub mod policy;
pub mod step;

pub use context::{ExecutionContext, ExecutionContextBuilder, Variables};
pub use device::{Axis, Cylinder, DeviceError, DeviceHandle, DeviceKind, DeviceRegistry, MaterialError, Sensor, WorkpieceTable};
pub use failure::{FailureKind, RunStatus, StepFailure};
pub use interpreter::{RunReport, TraceRecorder, WIND_DOWN_GRACE, run, run_recorded};
pub use operator::{
    AbortingOperator, ChannelOperator, Escalation, EscalationRequest, Operator, OperatorDecision, ScriptedOperator,
};
pub use policy::{ErrorHandling, Policy};
pub use step::{
    Action, AxisCommand, Command, CylinderCommand, EngineCommand, MaterialCommand, Node, SensorCommand, Step,
};

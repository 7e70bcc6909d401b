//! Shared type definitions for the cellflow workspace.
//!
//! Everything in this crate is plain data: the static machine configuration
//! handed to a backend, the step trace published by the interpreter, the
//! material lifecycle events published by workpiece tables, and read-only
//! snapshots of device state. None of it carries execution logic.

pub mod config;
pub mod device;
pub mod material;
pub mod trace;

pub use config::{
    AxisConfig, ConfigError, CylinderConfig, FeedbackPorts, LimitBehavior, MachineConfig, SensorConfig, SensorKind, SimulationConfig,
    WorkpieceTableConfig,
};
pub use device::{AxisState, CylinderState};
pub use material::{MaterialEvent, MaterialEventKind, Workpiece};
pub use trace::{ActiveStepUpdate, StepStatus};

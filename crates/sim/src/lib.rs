//! # Cellflow Sim
//!
//! A deterministic reference backend for the Cellflow engine. Axes follow a
//! trapezoidal profile integrated on a fixed sample interval, cylinders take
//! their configured transition time, sensors read injected mock values or a
//! model coupled to an axis, and workpiece tables keep their inventory in
//! memory. All timing goes through tokio time, so tests can run against a
//! paused clock.
//!
//! [`SimBackend`] builds every device from a
//! [`MachineConfig`](cellflow_types::MachineConfig) and hands out a
//! [`DeviceRegistry`](cellflow_engine::DeviceRegistry) for the interpreter.

mod axis;
mod backend;
mod cylinder;
mod fault;
pub mod profile;
mod sensor;
mod workpiece;

pub use axis::SimAxis;
pub use backend::SimBackend;
pub use cylinder::SimCylinder;
pub use sensor::SimSensor;
pub use workpiece::InMemoryWorkpieceTable;

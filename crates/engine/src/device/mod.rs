//! Device capability contracts.
//!
//! A backend (the simulator in `cellflow-sim`, or a driver for real hardware)
//! implements one trait per device kind and registers the handles in a
//! [`DeviceRegistry`]. The interpreter only ever calls these operations; it
//! never touches device state directly.
//!
//! Blocking operations take the cancellation token of the calling step and
//! must return [`DeviceError::Cancelled`] promptly once it fires, leaving the
//! device stationary.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use cellflow_types::{AxisState, CylinderState, MaterialEvent, Workpiece};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

mod error;
mod registry;

pub use error::{DeviceError, MaterialError};
pub use registry::{DeviceHandle, DeviceRegistry};

/// The closed set of device kinds a backend can register.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Axis,
    Cylinder,
    Sensor,
    WorkpieceTable,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceKind::Axis => "axis",
            DeviceKind::Cylinder => "cylinder",
            DeviceKind::Sensor => "sensor",
            DeviceKind::WorkpieceTable => "workpiece table",
        };
        f.write_str(label)
    }
}

/// A linear motion axis.
///
/// Every blocking operation must return promptly once its `cancel` token
/// fires and leave the axis at rest. The interpreter cancels that token when
/// an attempt times out and waits at most
/// [`WIND_DOWN_GRACE`](crate::interpreter::WIND_DOWN_GRACE) for the call to
/// return before it reports the timeout anyway.
#[async_trait]
pub trait Axis: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> AxisState;

    /// Command a move and return as soon as motion has started.
    ///
    /// The motion keeps running after the call returns and stops when
    /// `cancel` fires.
    async fn move_to(&self, position: f64, cancel: &CancellationToken) -> Result<(), DeviceError>;

    /// Move and block until the axis has settled at `position`.
    async fn move_to_and_wait(&self, position: f64, cancel: &CancellationToken) -> Result<f64, DeviceError>;

    /// Move toward `limit`, sampling `sensor` on every motion update, and stop
    /// at the first sample where the reading crosses `threshold`.
    ///
    /// Returns the final position.
    async fn move_until(
        &self,
        limit: f64,
        sensor: Arc<dyn Sensor>,
        threshold: f64,
        cancel: &CancellationToken,
    ) -> Result<f64, DeviceError>;

    /// Halt any motion immediately.
    fn stop(&self);
}

/// A binary pneumatic actuator with end-position feedback.
///
/// Blocking operations honor `cancel` under the same rule as [`Axis`].
#[async_trait]
pub trait Cylinder: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> CylinderState;

    /// Switch the valve and return without waiting for feedback.
    async fn fire(&self, extend: bool, cancel: &CancellationToken) -> Result<(), DeviceError>;

    /// Switch the valve and block until feedback reports the commanded state.
    async fn fire_and_wait(&self, extend: bool, cancel: &CancellationToken) -> Result<(), DeviceError>;

    /// Block until feedback reports `extended` without commanding anything.
    async fn wait_for(&self, extended: bool, cancel: &CancellationToken) -> Result<(), DeviceError>;
}

/// A sensor input. Implementations are stateless accessors.
#[async_trait]
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the digital level equals `expected`.
    async fn check_level(&self, expected: bool) -> Result<bool, DeviceError>;

    async fn read_analog(&self) -> Result<f64, DeviceError>;
}

/// Station-keyed virtual inventory of workpieces.
///
/// Every mutating operation publishes a [`MaterialEvent`] to subscribers.
pub trait WorkpieceTable: Send + Sync {
    fn name(&self) -> &str;

    /// Create a new workpiece of `class` at an empty station.
    fn spawn(&self, station: &str, class: &str) -> Result<Workpiece, MaterialError>;

    /// Change the class of the workpiece at `station`.
    fn transform(&self, station: &str, class: &str) -> Result<Workpiece, MaterialError>;

    /// Remove the workpiece at `station` from the cell.
    fn consume(&self, station: &str) -> Result<Workpiece, MaterialError>;

    /// Pick the workpiece at `station` up onto `carrier`.
    fn attach(&self, station: &str, carrier: &str) -> Result<Workpiece, MaterialError>;

    /// Put the workpiece held by `carrier` down at `station`.
    fn detach(&self, carrier: &str, station: &str) -> Result<Workpiece, MaterialError>;

    /// Join the workpiece at `station` into the one at `into`; returns the assembly.
    fn bind(&self, station: &str, into: &str) -> Result<Workpiece, MaterialError>;

    /// Split the most recently bound component off the assembly at `station`
    /// and place it at `to`; returns the released component.
    fn unbind(&self, station: &str, to: &str) -> Result<Workpiece, MaterialError>;

    /// Whether `station` holds a workpiece, optionally of a given class.
    fn check_state(&self, station: &str, class: Option<&str>) -> bool;

    fn material_at(&self, station: &str) -> Option<Workpiece>;

    fn subscribe(&self) -> broadcast::Receiver<MaterialEvent>;
}

//! Read-only snapshots of device state.

use serde::{Deserialize, Serialize};

/// Snapshot of a motion axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct AxisState {
    pub position: f64,
    /// Signed velocity in units per second.
    pub velocity: f64,
    pub is_moving: bool,
    pub travel_min: f64,
    pub travel_max: f64,
}

impl AxisState {
    /// Whether `position` lies inside the travel range (inclusive).
    pub fn within_travel(&self, position: f64) -> bool {
        position >= self.travel_min && position <= self.travel_max
    }
}

/// Snapshot of a pneumatic cylinder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CylinderState {
    /// Feedback state; only meaningful while `is_moving` is false.
    pub is_extended: bool,
    pub is_moving: bool,
    /// Normalized stroke position, 0.0 retracted to 1.0 extended.
    pub position: f64,
}

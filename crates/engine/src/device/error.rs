//! Device-level error types.

use thiserror::Error;

use super::DeviceKind;

/// Failure of a single device operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    #[error("device '{device}' fault: {message}")]
    Fault { device: String, message: String },

    #[error("device '{device}' operation cancelled")]
    Cancelled { device: String },

    #[error("device '{device}' is not registered")]
    NotFound { device: String },

    #[error("device '{device}' is of kind {actual}, expected {expected}")]
    WrongKind {
        device: String,
        expected: DeviceKind,
        actual: DeviceKind,
    },
}

impl DeviceError {
    /// Create a device fault.
    pub fn fault(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(device: impl Into<String>) -> Self {
        Self::Cancelled { device: device.into() }
    }

    /// Create a missing-device error.
    pub fn not_found(device: impl Into<String>) -> Self {
        Self::NotFound { device: device.into() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Name of the device the error refers to.
    pub fn device(&self) -> &str {
        match self {
            Self::Fault { device, .. } | Self::Cancelled { device } | Self::NotFound { device } | Self::WrongKind { device, .. } => device,
        }
    }
}

/// Precondition violations of workpiece table operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaterialError {
    #[error("station '{station}' is empty")]
    Empty { station: String },

    #[error("station '{station}' is occupied by '{id}'")]
    Occupied { station: String, id: String },

    #[error("unknown station '{station}'")]
    UnknownStation { station: String },

    #[error("workpiece '{id}' has no bound components")]
    NoComponents { id: String },

    #[error("workpiece at '{station}' cannot be bound into itself")]
    SelfBind { station: String },
}

impl MaterialError {
    pub fn empty(station: impl Into<String>) -> Self {
        Self::Empty { station: station.into() }
    }

    pub fn occupied(station: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Occupied {
            station: station.into(),
            id: id.into(),
        }
    }

    pub fn unknown_station(station: impl Into<String>) -> Self {
        Self::UnknownStation { station: station.into() }
    }
}

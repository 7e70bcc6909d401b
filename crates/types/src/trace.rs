//! Step trace events published by the interpreter.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a traced step node.
///
/// A node moves `Ready -> Running -> Completed | Error`; `Error` may loop
/// back to `Running` while retry attempts remain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The node was reached and is about to run its first attempt.
    Ready,
    /// An attempt is in flight.
    Running,
    /// The node produced a value.
    Completed,
    /// An attempt failed (possibly followed by a retry).
    Error,
}

impl StepStatus {
    /// Whether no further transition follows unless a retry begins.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }
}

/// One status transition of a traced step node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveStepUpdate {
    /// Device the node targets; empty for structural nodes such as scopes.
    pub target_device: String,
    /// Stable node name.
    pub name: String,
    /// New status of the node.
    pub status: StepStatus,
}

impl ActiveStepUpdate {
    pub fn new(target_device: impl Into<String>, name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            target_device: target_device.into(),
            name: name.into(),
            status,
        }
    }
}

//! Structured run failures.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{device::DeviceError, step::Step};

/// Failure taxonomy surfaced to the caller of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A device operation faulted (limit exceeded, feedback mismatch, missing device).
    DeviceFault,
    /// An attempt exceeded its policy time limit.
    Timeout,
    /// The run (or the enclosing parallel group) was cancelled.
    Cancelled,
    /// The operator aborted during an escalation.
    UserAborted,
    /// An explicit `fail` step or a data-dependent abort.
    LogicFail,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::DeviceFault => "device fault",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::UserAborted => "user aborted",
            FailureKind::LogicFail => "logic failure",
        };
        f.write_str(label)
    }
}

/// Overall outcome class of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Why a step, and therefore possibly the run, failed.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("{kind} at '{node}': {message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Name of the node where the failure originated.
    pub node: String,
    /// Device involved, when the failure came from a device operation.
    pub device: Option<String>,
    /// Set by `Terminate` handling; no enclosing node may recover.
    pub terminal: bool,
}

impl StepFailure {
    pub fn new(kind: FailureKind, node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node: node.into(),
            device: None,
            terminal: false,
        }
    }

    pub fn from_device(step: &Step, error: DeviceError) -> Self {
        let kind = if error.is_cancelled() {
            FailureKind::Cancelled
        } else {
            FailureKind::DeviceFault
        };
        let device = error.device().to_string();
        Self {
            device: (!device.is_empty()).then_some(device),
            ..Self::new(kind, step.name(), error.to_string())
        }
    }

    pub fn cancelled(step: &Step) -> Self {
        Self::new(FailureKind::Cancelled, step.name(), "run cancelled")
    }

    pub fn timeout(step: &Step, limit: Duration) -> Self {
        Self::new(FailureKind::Timeout, step.name(), format!("attempt exceeded {} ms", limit.as_millis()))
    }

    pub fn logic(step: &Step, message: impl Into<String>) -> Self {
        Self::new(FailureKind::LogicFail, step.name(), message)
    }

    /// Operator abort of an escalated failure; keeps the original locus in the message.
    pub fn user_aborted(step: &Step, cause: &StepFailure) -> Self {
        Self::new(FailureKind::UserAborted, step.name(), format!("operator aborted after: {cause}"))
    }

    pub fn into_terminal(self) -> Self {
        Self { terminal: true, ..self }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }

    pub fn status(&self) -> RunStatus {
        if self.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_cancellation_maps_to_cancelled() {
        let step = Step::move_to_and_wait("x", 50.0);
        let failure = StepFailure::from_device(&step, DeviceError::cancelled("x"));
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.status(), RunStatus::Cancelled);
        assert_eq!(failure.device.as_deref(), Some("x"));
        assert_eq!(failure.node, "move_to_and_wait x");
    }

    #[test]
    fn display_includes_kind_and_node() {
        let step = Step::fail("no part").named("check part");
        let failure = StepFailure::logic(&step, "no part present");
        assert_eq!(failure.to_string(), "logic failure at 'check part': no part present");
        assert_eq!(failure.status(), RunStatus::Failed);
        assert!(failure.clone().into_terminal().terminal);
    }
}

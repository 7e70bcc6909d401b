//! Operator escalation for steps using `ErrorHandling::AskUser`.
//!
//! When such a step exhausts its retries the interpreter builds an
//! [`Escalation`] and waits for an [`Operator`] to decide. The wait is always
//! raced against the run's cancellation, so a paused flow can still be
//! cancelled.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::failure::StepFailure;

/// A failure surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    /// Node whose policy asked for the escalation.
    pub node: String,
    pub target_device: String,
    pub failure: StepFailure,
    /// Attempts made before escalating.
    pub attempts: u32,
}

/// What the operator chose to do with an escalated failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperatorDecision {
    /// Run the node again with a fresh retry budget.
    Retry,
    /// Accept the failure; the node completes with `null`.
    Continue,
    /// Fail the node as `UserAborted`.
    Abort,
}

#[async_trait]
pub trait Operator: Send + Sync {
    async fn decide(&self, escalation: Escalation) -> OperatorDecision;
}

/// Aborts every escalation. Used when a run has no operator attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortingOperator;

#[async_trait]
impl Operator for AbortingOperator {
    async fn decide(&self, escalation: Escalation) -> OperatorDecision {
        warn!(node = %escalation.node, "no operator attached; aborting escalation");
        OperatorDecision::Abort
    }
}

/// Answers escalations from a fixed queue, then with a fallback decision.
///
/// Every escalation received is recorded for later inspection.
#[derive(Debug)]
pub struct ScriptedOperator {
    decisions: Mutex<VecDeque<OperatorDecision>>,
    fallback: OperatorDecision,
    received: Mutex<Vec<Escalation>>,
}

impl ScriptedOperator {
    pub fn new(decisions: impl IntoIterator<Item = OperatorDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            fallback: OperatorDecision::Abort,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `decision`.
    pub fn always(decision: OperatorDecision) -> Self {
        Self::new([]).with_fallback(decision)
    }

    pub fn with_fallback(mut self, fallback: OperatorDecision) -> Self {
        self.fallback = fallback;
        self
    }

    /// Escalations received so far, in order.
    pub fn received(&self) -> Vec<Escalation> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn decide(&self, escalation: Escalation) -> OperatorDecision {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(escalation);
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// An escalation waiting for an answer from an interactive front end.
#[derive(Debug)]
pub struct EscalationRequest {
    pub escalation: Escalation,
    reply: oneshot::Sender<OperatorDecision>,
}

impl EscalationRequest {
    /// Answer the escalation. Ignored if the run has stopped waiting.
    pub fn respond(self, decision: OperatorDecision) {
        let _ = self.reply.send(decision);
    }
}

/// Forwards escalations over a channel to whoever owns the receiver.
///
/// If the receiver is gone, or a request is dropped without an answer, the
/// escalation is aborted.
#[derive(Debug, Clone)]
pub struct ChannelOperator {
    request_tx: mpsc::UnboundedSender<EscalationRequest>,
}

impl ChannelOperator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EscalationRequest>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        (Self { request_tx }, request_rx)
    }
}

#[async_trait]
impl Operator for ChannelOperator {
    async fn decide(&self, escalation: Escalation) -> OperatorDecision {
        let (reply, answer) = oneshot::channel();
        if self.request_tx.send(EscalationRequest { escalation, reply }).is_err() {
            warn!("escalation channel closed; aborting");
            return OperatorDecision::Abort;
        }
        answer.await.unwrap_or(OperatorDecision::Abort)
    }
}

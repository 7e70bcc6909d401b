//! Recording the trace of a run.

use cellflow_types::{ActiveStepUpdate, StepStatus};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::{
    context::ExecutionContext,
    failure::{RunStatus, StepFailure},
    step::Step,
};

/// Collects every trace update published after it was attached.
#[derive(Debug)]
pub struct TraceRecorder {
    receiver: broadcast::Receiver<ActiveStepUpdate>,
    updates: Vec<ActiveStepUpdate>,
}

impl TraceRecorder {
    pub fn attach(ctx: &ExecutionContext) -> Self {
        Self {
            receiver: ctx.subscribe(),
            updates: Vec::new(),
        }
    }

    fn record(&mut self, update: Result<ActiveStepUpdate, RecvError>) {
        match update {
            Ok(update) => self.updates.push(update),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "trace recorder lagged; updates dropped"),
            Err(RecvError::Closed) => {}
        }
    }

    /// Pull everything currently buffered without waiting.
    pub fn drain(&mut self) -> &[ActiveStepUpdate] {
        loop {
            match self.receiver.try_recv() {
                Ok(update) => self.updates.push(update),
                Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "trace recorder lagged; updates dropped"),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        &self.updates
    }

    pub fn updates(&self) -> &[ActiveStepUpdate] {
        &self.updates
    }

    pub fn into_updates(mut self) -> Vec<ActiveStepUpdate> {
        self.drain();
        self.updates
    }
}

/// Outcome of a run together with its full trace.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Result<Value, StepFailure>,
    pub trace: Vec<ActiveStepUpdate>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        match &self.outcome {
            Ok(_) => RunStatus::Completed,
            Err(failure) => failure.status(),
        }
    }

    /// Statuses published for the node named `name`, in order.
    pub fn statuses_of(&self, name: &str) -> Vec<StepStatus> {
        self.trace
            .iter()
            .filter(|update| update.name == name)
            .map(|update| update.status)
            .collect()
    }

    /// How many times the node named `name` entered `status`.
    pub fn count(&self, name: &str, status: StepStatus) -> usize {
        self.trace
            .iter()
            .filter(|update| update.name == name && update.status == status)
            .count()
    }
}

/// Run `step` while recording its trace.
///
/// The trace is consumed concurrently with the run so long flows do not
/// overrun the channel capacity.
pub async fn run_recorded(step: &Step, ctx: &ExecutionContext) -> RunReport {
    let mut recorder = TraceRecorder::attach(ctx);
    let run = super::run(step, ctx);
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            biased;
            update = recorder.receiver.recv() => recorder.record(update),
            outcome = &mut run => break outcome,
        }
    };
    RunReport {
        outcome,
        trace: recorder.into_updates(),
    }
}

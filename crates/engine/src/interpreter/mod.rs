//! The flow interpreter.
//!
//! [`run`] walks a [`Step`] tree against an [`ExecutionContext`]. Every node
//! goes through the same policy loop: publish `Ready`, then for each attempt
//! publish `Running` and execute the node, publishing `Completed` or `Error`.
//! Failed attempts are retried while the node's retry budget lasts; once it
//! is exhausted the node's error handling decides whether the failure
//! propagates, terminates the run, or is escalated to the operator.
//!
//! Cancellation is checked before every attempt and raced against every
//! suspension point (device waits, dwell, operator decisions). It always wins
//! over retry.

use std::time::Duration;

use cellflow_types::StepStatus;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    context::ExecutionContext,
    failure::StepFailure,
    operator::{Escalation, OperatorDecision},
    policy::ErrorHandling,
    step::{Node, Step},
};

mod dispatch;
mod trace;

pub use trace::{RunReport, TraceRecorder, run_recorded};

/// Run `step` to completion against `ctx`.
///
/// Returns the value produced by the root node, or the failure that ended
/// the run. The trace is published on the context's broadcast channel while
/// the run progresses.
pub async fn run(step: &Step, ctx: &ExecutionContext) -> Result<Value, StepFailure> {
    info!(step = %step.name(), devices = ctx.devices().len(), "run started");
    let outcome = run_step(step, ctx).await;
    match &outcome {
        Ok(_) => info!(step = %step.name(), "run completed"),
        Err(failure) => warn!(
            step = %step.name(),
            kind = %failure.kind,
            node = %failure.node,
            status = ?failure.status(),
            "run ended: {}",
            failure.message
        ),
    }
    outcome
}

fn run_step<'a>(step: &'a Step, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<Value, StepFailure>> {
    Box::pin(async move {
        let policy = *step.policy();
        let traced = step.is_traced();
        if traced {
            ctx.publish(step, StepStatus::Ready);
        }

        let mut attempts: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(StepFailure::cancelled(step));
            }
            attempts += 1;
            if traced {
                ctx.publish(step, StepStatus::Running);
            }

            let failure = match attempt(step, ctx, policy.timeout).await {
                Ok(value) => {
                    if traced {
                        ctx.publish(step, StepStatus::Completed);
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            if traced {
                ctx.publish(step, StepStatus::Error);
            }

            if ctx.is_cancelled() {
                if failure.is_cancelled() || failure.terminal {
                    return Err(failure);
                }
                return Err(StepFailure::cancelled(step));
            }
            if failure.terminal {
                return Err(failure);
            }
            if attempts < policy.max_attempts() {
                warn!(
                    step = %step.name(),
                    attempt = attempts,
                    max_attempts = policy.max_attempts(),
                    kind = %failure.kind,
                    "attempt failed; retrying"
                );
                continue;
            }

            match policy.error_handling {
                ErrorHandling::Default => return Err(failure),
                ErrorHandling::Terminate => {
                    warn!(step = %step.name(), kind = %failure.kind, "terminating run");
                    return Err(failure.into_terminal());
                }
                ErrorHandling::AskUser => {
                    let escalation = Escalation {
                        node: step.name().to_string(),
                        target_device: step.target_device().to_string(),
                        failure: failure.clone(),
                        attempts,
                    };
                    warn!(step = %step.name(), attempts, "escalating failure to operator: {}", failure);
                    let decision = tokio::select! {
                        biased;
                        _ = ctx.cancellation().cancelled() => return Err(StepFailure::cancelled(step)),
                        decision = ctx.operator().decide(escalation) => decision,
                    };
                    info!(step = %step.name(), ?decision, "operator decided");
                    match decision {
                        OperatorDecision::Retry => attempts = 0,
                        OperatorDecision::Continue => {
                            if traced {
                                ctx.publish(step, StepStatus::Completed);
                            }
                            return Ok(Value::Null);
                        }
                        OperatorDecision::Abort => return Err(StepFailure::user_aborted(step, &failure)),
                    }
                }
            }
        }
    })
}

/// How long a timed-out attempt may take to honor its cancellation.
pub const WIND_DOWN_GRACE: Duration = Duration::from_secs(1);

/// One attempt, raced against the policy time limit when one is set.
///
/// On timeout the attempt's own cancellation scope is cancelled and the work
/// is awaited until it has wound down, so no device keeps moving on its behalf.
/// A device that ignores its token gets [`WIND_DOWN_GRACE`] before it is abandoned.
async fn attempt(step: &Step, ctx: &ExecutionContext, timeout: Option<Duration>) -> Result<Value, StepFailure> {
    let Some(limit) = timeout else {
        return execute_node(step, ctx).await;
    };
    let scoped = ctx.child();
    let mut work = execute_node(step, &scoped);
    tokio::select! {
        result = &mut work => result,
        _ = tokio::time::sleep(limit) => {
            scoped.cancellation().cancel();
            if tokio::time::timeout(WIND_DOWN_GRACE, work).await.is_err() {
                warn!(step = %step.name(), "device ignored cancellation, abandoning attempt");
            }
            warn!(step = %step.name(), limit_ms = limit.as_millis() as u64, "attempt timed out");
            Err(StepFailure::timeout(step, limit))
        }
    }
}

fn execute_node<'a>(step: &'a Step, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<Value, StepFailure>> {
    Box::pin(async move {
        match step.node() {
            Node::Action(action) => dispatch::dispatch(step, action, ctx).await,
            Node::Sequence { left, next } => {
                let value = run_step(left, ctx).await?;
                let right = next(value);
                run_step(&right, ctx).await
            }
            Node::Parallel(children) => run_parallel(step, children, ctx).await,
            Node::Scope(inner) => run_step(inner, ctx).await,
            Node::Start(value) => Ok(value.clone()),
            Node::Fail(message) => Err(StepFailure::logic(step, message.clone())),
        }
    })
}

/// Run all children concurrently in their own cancellation group.
///
/// The first failure cancels the group; the node then waits for every child
/// to reach a terminal state before failing. On success the result is the
/// array of child results in declaration order.
async fn run_parallel(step: &Step, children: &[Step], ctx: &ExecutionContext) -> Result<Value, StepFailure> {
    let group = ctx.child();
    let mut tasks = JoinSet::new();
    for (index, child) in children.iter().cloned().enumerate() {
        let scope = group.clone();
        tasks.spawn(async move {
            let result = run_step(&child, &scope).await;
            (index, result)
        });
    }

    let mut results = vec![Value::Null; children.len()];
    let mut failure: Option<StepFailure> = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok((index, Ok(value))) => {
                results[index] = value;
                continue;
            }
            Ok((_, Err(child_failure))) => child_failure,
            Err(join_error) => StepFailure::logic(step, format!("parallel branch aborted: {join_error}")),
        };
        if failure.is_none() && !group.is_cancelled() {
            debug!(step = %step.name(), node = %outcome.node, "branch failed; cancelling siblings");
        }
        group.cancellation().cancel();
        keep_most_relevant(&mut failure, outcome);
    }

    match failure {
        None => Ok(Value::Array(results)),
        Some(failure) if ctx.is_cancelled() && !failure.terminal => Err(StepFailure::cancelled(step)),
        Some(failure) => Err(failure),
    }
}

/// Terminal failures win, then the first failure that is not a sibling
/// cancellation caused by the group wind-down.
fn keep_most_relevant(slot: &mut Option<StepFailure>, candidate: StepFailure) {
    let replace = match slot {
        None => true,
        Some(current) if current.terminal => false,
        Some(current) => candidate.terminal || (current.is_cancelled() && !candidate.is_cancelled()),
    };
    if replace {
        *slot = Some(candidate);
    }
}

#[cfg(test)]
mod tests;

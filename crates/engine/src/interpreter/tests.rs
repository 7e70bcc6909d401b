use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cellflow_types::{AxisState, CylinderState, StepStatus};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::{WIND_DOWN_GRACE, run, run_recorded};
use crate::{
    context::ExecutionContext,
    device::{Axis, Cylinder, DeviceError, DeviceRegistry, Sensor},
    failure::{FailureKind, RunStatus},
    operator::{ChannelOperator, OperatorDecision, ScriptedOperator},
    policy::ErrorHandling,
    step::Step,
};

/// Cylinder whose first `failures` fire-and-wait commands fault.
struct FlakyCylinder {
    name: String,
    failures: AtomicU32,
    extended: AtomicBool,
}

impl FlakyCylinder {
    fn new(name: &str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            failures: AtomicU32::new(failures),
            extended: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Cylinder for FlakyCylinder {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CylinderState {
        let extended = self.extended.load(Ordering::SeqCst);
        CylinderState {
            is_extended: extended,
            is_moving: false,
            position: if extended { 1.0 } else { 0.0 },
        }
    }

    async fn fire(&self, extend: bool, _cancel: &CancellationToken) -> Result<(), DeviceError> {
        self.extended.store(extend, Ordering::SeqCst);
        Ok(())
    }

    async fn fire_and_wait(&self, extend: bool, _cancel: &CancellationToken) -> Result<(), DeviceError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DeviceError::fault(&self.name, "feedback mismatch"));
        }
        self.extended.store(extend, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for(&self, _extended: bool, _cancel: &CancellationToken) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Axis that needs one second for any blocking move.
struct SlowAxis {
    state: Mutex<AxisState>,
}

impl SlowAxis {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AxisState {
                travel_max: 100.0,
                ..AxisState::default()
            }),
        })
    }

    fn set_moving(&self, moving: bool) {
        self.state.lock().unwrap().is_moving = moving;
    }
}

#[async_trait]
impl Axis for SlowAxis {
    fn name(&self) -> &str {
        "x"
    }

    fn state(&self) -> AxisState {
        *self.state.lock().unwrap()
    }

    async fn move_to(&self, _position: f64, _cancel: &CancellationToken) -> Result<(), DeviceError> {
        self.set_moving(true);
        Ok(())
    }

    async fn move_to_and_wait(&self, position: f64, cancel: &CancellationToken) -> Result<f64, DeviceError> {
        self.set_moving(true);
        let outcome = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                self.state.lock().unwrap().position = position;
                Ok(position)
            }
            _ = cancel.cancelled() => Err(DeviceError::cancelled("x")),
        };
        self.set_moving(false);
        outcome
    }

    async fn move_until(
        &self,
        _limit: f64,
        _sensor: Arc<dyn Sensor>,
        _threshold: f64,
        _cancel: &CancellationToken,
    ) -> Result<f64, DeviceError> {
        Err(DeviceError::fault("x", "not supported"))
    }

    fn stop(&self) {
        self.set_moving(false);
    }
}

/// Axis whose blocking moves never look at their cancellation token.
struct DeafAxis;

#[async_trait]
impl Axis for DeafAxis {
    fn name(&self) -> &str {
        "x"
    }

    fn state(&self) -> AxisState {
        AxisState::default()
    }

    async fn move_to(&self, _position: f64, _cancel: &CancellationToken) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn move_to_and_wait(&self, position: f64, _cancel: &CancellationToken) -> Result<f64, DeviceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(position)
    }

    async fn move_until(
        &self,
        limit: f64,
        _sensor: Arc<dyn Sensor>,
        _threshold: f64,
        _cancel: &CancellationToken,
    ) -> Result<f64, DeviceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(limit)
    }

    fn stop(&self) {}
}

fn context_with(registry: DeviceRegistry) -> ExecutionContext {
    ExecutionContext::builder().devices(registry).build()
}

#[tokio::test]
async fn bind_grouping_does_not_change_the_result() {
    let ctx = ExecutionContext::builder().build();
    let add_one = |value: Value| Step::pure(json!(value.as_i64().unwrap_or(0) + 1));
    let triple = |value: Value| Step::pure(json!(value.as_i64().unwrap_or(0) * 3));

    let left_nested = Step::pure(json!(1)).bind(add_one).bind(triple);
    let right_nested = Step::pure(json!(1)).bind(move |value| add_one(value).bind(triple));

    assert_eq!(run(&left_nested, &ctx).await.unwrap(), json!(6));
    assert_eq!(run(&right_nested, &ctx).await.unwrap(), json!(6));
}

#[tokio::test]
async fn retry_recovers_and_traces_every_attempt() {
    let mut registry = DeviceRegistry::new();
    registry.register_cylinder(FlakyCylinder::new("clamp", 2));
    let ctx = context_with(registry);

    let step = Step::fire_and_wait("clamp", true).retry(3);
    let report = run_recorded(&step, &ctx).await;

    assert_eq!(report.status(), RunStatus::Completed);
    assert_eq!(report.count("fire_and_wait clamp", StepStatus::Running), 3);
    assert_eq!(report.count("fire_and_wait clamp", StepStatus::Error), 2);
    assert_eq!(
        report.statuses_of("fire_and_wait clamp").first(),
        Some(&StepStatus::Ready)
    );
    assert_eq!(
        report.statuses_of("fire_and_wait clamp").last(),
        Some(&StepStatus::Completed)
    );
}

#[tokio::test]
async fn exhausted_retries_propagate_the_device_fault() {
    let mut registry = DeviceRegistry::new();
    registry.register_cylinder(FlakyCylinder::new("clamp", 5));
    let ctx = context_with(registry);

    let report = run_recorded(&Step::fire_and_wait("clamp", true).retry(1), &ctx).await;
    let failure = report.outcome.as_ref().unwrap_err();
    assert_eq!(failure.kind, FailureKind::DeviceFault);
    assert_eq!(failure.device.as_deref(), Some("clamp"));
    assert_eq!(report.count("fire_and_wait clamp", StepStatus::Running), 2);
}

#[tokio::test]
async fn failed_left_side_never_builds_the_continuation() {
    let ctx = ExecutionContext::builder().build();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let step = Step::fail("no part").bind(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Step::start()
    });

    let failure = run(&step, &ctx).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::LogicFail);
    assert_eq!(failure.message, "no part");
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_attempts_time_out_and_are_retried() {
    let ctx = ExecutionContext::builder().build();
    let step = Step::dwell(Duration::from_secs(10))
        .with_timeout(Duration::from_millis(100))
        .retry(1);

    let report = run_recorded(&step, &ctx).await;
    let failure = report.outcome.as_ref().unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(report.count("dwell", StepStatus::Running), 2);
    assert_eq!(report.status(), RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn timeout_halts_the_device_it_interrupts() {
    let axis = SlowAxis::new();
    let mut registry = DeviceRegistry::new();
    registry.register_axis(axis.clone());
    let ctx = context_with(registry);

    let step = Step::move_to_and_wait("x", 50.0).with_timeout(Duration::from_millis(200));
    let failure = run(&step, &ctx).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(!axis.state().is_moving);
    assert!(!ctx.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn timeout_gives_up_on_a_device_that_ignores_cancellation() {
    let mut registry = DeviceRegistry::new();
    registry.register_axis(Arc::new(DeafAxis));
    let ctx = context_with(registry);

    let started = tokio::time::Instant::now();
    let step = Step::move_to_and_wait("x", 50.0).with_timeout(Duration::from_millis(100));
    let failure = run(&step, &ctx).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(started.elapsed() <= Duration::from_millis(100) + WIND_DOWN_GRACE + Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn cancellation_wins_over_retry() {
    let ctx = ExecutionContext::builder().build();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let step = Step::dwell(Duration::from_secs(10)).retry(5);
    let report = run_recorded(&step, &ctx).await;

    assert_eq!(report.status(), RunStatus::Cancelled);
    assert_eq!(report.count("dwell", StepStatus::Running), 1);
}

#[tokio::test]
async fn cancelled_context_runs_nothing() {
    let ctx = ExecutionContext::builder().build();
    ctx.cancel();
    let report = run_recorded(&Step::set_variable("touched", true), &ctx).await;
    assert_eq!(report.status(), RunStatus::Cancelled);
    assert_eq!(report.count("set_variable", StepStatus::Running), 0);
    assert_eq!(ctx.variables().get("touched"), None);
}

#[tokio::test]
async fn operator_can_retry_then_continue() {
    let operator = Arc::new(ScriptedOperator::new([OperatorDecision::Retry, OperatorDecision::Continue]));
    let ctx = ExecutionContext::builder().operator(operator.clone()).build();

    let step = Step::fail("jam").named("unjam").on_error(ErrorHandling::AskUser);
    let report = run_recorded(&step, &ctx).await;

    assert_eq!(report.outcome.as_ref().unwrap(), &Value::Null);
    assert_eq!(report.count("unjam", StepStatus::Running), 2);
    assert_eq!(report.statuses_of("unjam").last(), Some(&StepStatus::Completed));
    let received = operator.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].node, "unjam");
    assert_eq!(received[0].attempts, 1);
}

#[tokio::test]
async fn operator_abort_fails_user_aborted() {
    let ctx = ExecutionContext::builder()
        .operator(Arc::new(ScriptedOperator::always(OperatorDecision::Abort)))
        .build();
    let failure = run(&Step::fail("jam").retry(2).on_error(ErrorHandling::AskUser), &ctx)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::UserAborted);
    assert!(failure.message.contains("jam"));
}

#[tokio::test]
async fn leaf_escalation_runs_before_outer_terminate() {
    let operator = Arc::new(ScriptedOperator::always(OperatorDecision::Abort));
    let ctx = ExecutionContext::builder().operator(operator.clone()).build();

    let leaf = Step::fail("jam").named("leaf").on_error(ErrorHandling::AskUser);
    let step = Step::scope("X", leaf).on_error(ErrorHandling::Terminate);
    let failure = run(&step, &ctx).await.unwrap_err();

    let received = operator.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].node, "leaf");
    assert_eq!(failure.kind, FailureKind::UserAborted);
    assert!(failure.terminal);
}

#[tokio::test]
async fn continue_at_the_leaf_keeps_the_outer_scope_quiet() {
    let operator = Arc::new(ScriptedOperator::always(OperatorDecision::Continue));
    let ctx = ExecutionContext::builder().operator(operator.clone()).build();

    let leaf = Step::fail("jam").named("leaf").on_error(ErrorHandling::AskUser);
    let step = Step::scope("X", leaf.then(Step::pure(json!("done")))).on_error(ErrorHandling::Terminate);
    assert_eq!(run(&step, &ctx).await.unwrap(), json!("done"));
    assert_eq!(operator.received().len(), 1);
}

#[tokio::test]
async fn terminal_failures_skip_enclosing_escalation() {
    let operator = Arc::new(ScriptedOperator::always(OperatorDecision::Continue));
    let ctx = ExecutionContext::builder().operator(operator.clone()).build();

    let inner = Step::fail("e-stop").on_error(ErrorHandling::Terminate);
    let step = Step::scope("cell", inner).retry(3).on_error(ErrorHandling::AskUser);
    let report = run_recorded(&step, &ctx).await;

    let failure = report.outcome.as_ref().unwrap_err();
    assert!(failure.terminal);
    assert_eq!(failure.kind, FailureKind::LogicFail);
    assert!(operator.received().is_empty());
    assert_eq!(report.count("cell", StepStatus::Running), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_preempts_a_pending_escalation() {
    let (operator, _requests) = ChannelOperator::new();
    let ctx = ExecutionContext::builder().operator(Arc::new(operator)).build();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let failure = run(&Step::fail("jam").on_error(ErrorHandling::AskUser), &ctx)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Cancelled);
}

#[tokio::test]
async fn parallel_results_keep_declaration_order() {
    let ctx = ExecutionContext::builder().build();
    let step = Step::in_parallel([Step::pure(json!("a")), Step::pure(json!("b")), Step::pure(json!("c"))]);
    assert_eq!(run(&step, &ctx).await.unwrap(), json!(["a", "b", "c"]));
}

#[tokio::test(start_paused = true)]
async fn parallel_failure_cancels_siblings_and_waits_for_them() {
    let axis = SlowAxis::new();
    let mut registry = DeviceRegistry::new();
    registry.register_axis(axis.clone());
    let ctx = context_with(registry);

    let step = Step::in_parallel([
        Step::move_to_and_wait("x", 80.0),
        Step::dwell(Duration::from_millis(20)).then(Step::fail("part missing")),
    ]);
    let report = run_recorded(&step, &ctx).await;

    let failure = report.outcome.as_ref().unwrap_err();
    assert_eq!(failure.kind, FailureKind::LogicFail);
    assert_eq!(failure.message, "part missing");
    assert_eq!(report.statuses_of("move_to_and_wait x").last(), Some(&StepStatus::Error));
    assert!(!axis.state().is_moving);
    assert_eq!(axis.state().position, 0.0);
    assert!(!ctx.is_cancelled());
}

#[tokio::test]
async fn variables_flow_between_steps() {
    let ctx = ExecutionContext::builder().variable("offset", 2.5).build();
    let step = Step::set_variable("target", 40.0)
        .then(Step::get_variable("offset"))
        .bind(|offset| {
            let offset = offset.as_f64().unwrap_or(0.0);
            Step::get_variable("target").map(move |target| json!(target.as_f64().unwrap_or(0.0) + offset))
        });
    assert_eq!(run(&step, &ctx).await.unwrap(), json!(42.5));
    assert_eq!(run(&Step::get_variable("missing"), &ctx).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn unknown_and_mistyped_devices_fault() {
    let mut registry = DeviceRegistry::new();
    registry.register_cylinder(FlakyCylinder::new("clamp", 0));
    let ctx = context_with(registry);

    let missing = run(&Step::fire("gripper", true), &ctx).await.unwrap_err();
    assert_eq!(missing.kind, FailureKind::DeviceFault);
    assert_eq!(missing.device.as_deref(), Some("gripper"));

    let mistyped = run(&Step::move_to("clamp", 10.0), &ctx).await.unwrap_err();
    assert_eq!(mistyped.kind, FailureKind::DeviceFault);
    assert!(mistyped.message.contains("expected axis"));
}

#[tokio::test]
async fn read_position_and_stop_use_the_axis_snapshot() {
    let axis = SlowAxis::new();
    let mut registry = DeviceRegistry::new();
    registry.register_axis(axis.clone());
    let ctx = context_with(registry);

    run(&Step::move_to("x", 30.0), &ctx).await.unwrap();
    assert!(axis.state().is_moving);
    run(&Step::stop_axis("x"), &ctx).await.unwrap();
    assert!(!axis.state().is_moving);
    assert_eq!(run(&Step::read_position("x"), &ctx).await.unwrap(), json!(0.0));
}

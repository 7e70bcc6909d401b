//! Simulated pneumatic cylinder.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cellflow_engine::{Cylinder, DeviceError};
use cellflow_types::{CylinderConfig, CylinderState, SimulationConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::fault::FaultInjector;

/// A simulated cylinder. Clones share the same cylinder.
///
/// A stroke takes the configured transition time and is integrated on the
/// simulation sample interval. A jammed cylinder stops half way and never
/// reports the commanded end position.
#[derive(Clone)]
pub struct SimCylinder {
    inner: Arc<CylinderInner>,
}

struct CylinderInner {
    config: CylinderConfig,
    sample: Duration,
    state: watch::Sender<CylinderState>,
    generation: AtomicU64,
    stroke: Mutex<Option<CancellationToken>>,
    jammed: AtomicBool,
    faults: FaultInjector,
}

impl SimCylinder {
    pub fn new(config: CylinderConfig, simulation: &SimulationConfig) -> Self {
        let extended = config.initially_extended;
        let (state, _) = watch::channel(CylinderState {
            is_extended: extended,
            is_moving: false,
            position: if extended { 1.0 } else { 0.0 },
        });
        Self {
            inner: Arc::new(CylinderInner {
                config,
                sample: Duration::from_millis(simulation.sample_interval_ms.max(1)),
                state,
                generation: AtomicU64::new(0),
                stroke: Mutex::new(None),
                jammed: AtomicBool::new(false),
                faults: FaultInjector::default(),
            }),
        }
    }

    pub fn fail_next(&self, commands: u32) {
        self.inner.faults.fail_next(commands);
    }

    pub fn set_jammed(&self, jammed: bool) {
        self.inner.jammed.store(jammed, Ordering::SeqCst);
    }

    /// Watch feedback changes.
    pub fn watch(&self) -> watch::Receiver<CylinderState> {
        self.inner.state.subscribe()
    }

    fn name_str(&self) -> &str {
        &self.inner.config.name
    }

    fn snapshot(&self) -> CylinderState {
        *self.inner.state.borrow()
    }

    /// Apply `update` only while `generation` owns the cylinder.
    fn update_if_current(&self, generation: u64, update: impl FnOnce(&mut CylinderState)) {
        let current = &self.inner.generation;
        self.inner.state.send_if_modified(|state| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            update(state);
            true
        });
    }

    fn start_stroke(&self, extend: bool, cancel: &CancellationToken) {
        let superseded = CancellationToken::new();
        if let Some(previous) = self
            .inner
            .stroke
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(superseded.clone())
        {
            previous.cancel();
        }

        let mut generation = 0;
        let mut start = 0.0;
        self.inner.state.send_modify(|state| {
            generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.is_moving = true;
            start = state.position;
        });
        debug!(cylinder = %self.name_str(), extend, "stroke started");

        let cylinder = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { cylinder.stroke(generation, extend, start, cancel, superseded).await });
    }

    async fn stroke(&self, generation: u64, extend: bool, start: f64, cancel: CancellationToken, superseded: CancellationToken) {
        let goal = if extend { 1.0 } else { 0.0 };
        let samples = (self.inner.config.transition_ms / self.inner.sample.as_millis().max(1) as u64).max(1);
        let jammed = self.inner.jammed.load(Ordering::SeqCst);

        for sample in 1..=samples {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.update_if_current(generation, |state| state.is_moving = false);
                    debug!(cylinder = %self.name_str(), "stroke cancelled");
                    return;
                }
                _ = superseded.cancelled() => return,
                _ = tokio::time::sleep(self.inner.sample) => {}
            }
            let fraction = sample as f64 / samples as f64;
            if jammed && fraction > 0.5 {
                break;
            }
            self.update_if_current(generation, |state| state.position = start + (goal - start) * fraction);
        }

        self.update_if_current(generation, |state| {
            state.is_moving = false;
            if !jammed {
                state.is_extended = extend;
                state.position = goal;
            }
        });
        debug!(cylinder = %self.name_str(), extend, jammed, "stroke finished");
    }

    /// Wait until the cylinder is at rest and return its feedback.
    async fn settled(&self, cancel: &CancellationToken) -> Result<CylinderState, DeviceError> {
        let mut feedback = self.watch();
        loop {
            let state = *feedback.borrow_and_update();
            if !state.is_moving {
                return Ok(state);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceError::cancelled(self.name_str())),
                changed = feedback.changed() => {
                    if changed.is_err() {
                        return Err(DeviceError::fault(self.name_str(), "feedback lost"));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Cylinder for SimCylinder {
    fn name(&self) -> &str {
        self.name_str()
    }

    fn state(&self) -> CylinderState {
        self.snapshot()
    }

    async fn fire(&self, extend: bool, cancel: &CancellationToken) -> Result<(), DeviceError> {
        if self.inner.faults.take() {
            return Err(DeviceError::fault(self.name_str(), "injected fault"));
        }
        let state = self.snapshot();
        let end_position = if extend { 1.0 } else { 0.0 };
        if !state.is_moving && state.is_extended == extend && state.position == end_position {
            return Ok(());
        }
        self.start_stroke(extend, cancel);
        Ok(())
    }

    async fn fire_and_wait(&self, extend: bool, cancel: &CancellationToken) -> Result<(), DeviceError> {
        self.fire(extend, cancel).await?;
        let state = self.settled(cancel).await?;
        if state.is_extended != extend {
            let (commanded, reported) = if extend {
                ("extended", "retracted")
            } else {
                ("retracted", "extended")
            };
            return Err(DeviceError::fault(
                self.name_str(),
                format!("feedback mismatch: commanded {commanded}, feedback {reported}"),
            ));
        }
        Ok(())
    }

    async fn wait_for(&self, extended: bool, cancel: &CancellationToken) -> Result<(), DeviceError> {
        let mut feedback = self.watch();
        loop {
            let state = *feedback.borrow_and_update();
            if !state.is_moving && state.is_extended == extended {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceError::cancelled(self.name_str())),
                changed = feedback.changed() => {
                    if changed.is_err() {
                        return Err(DeviceError::fault(self.name_str(), "feedback lost"));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clamp() -> SimCylinder {
        SimCylinder::new(CylinderConfig::new("clamp", 200), &SimulationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_wait_resolves_after_the_transition() {
        let clamp = clamp();
        let started = tokio::time::Instant::now();
        clamp.fire_and_wait(true, &CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(
            clamp.state(),
            CylinderState {
                is_extended: true,
                is_moving: false,
                position: 1.0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fire_returns_before_feedback() {
        let clamp = clamp();
        clamp.fire(true, &CancellationToken::new()).await.unwrap();
        assert!(clamp.state().is_moving);
        assert!(!clamp.state().is_extended);
        clamp.wait_for(true, &CancellationToken::new()).await.unwrap();
        assert!(clamp.state().is_extended);
    }

    #[tokio::test(start_paused = true)]
    async fn jammed_cylinder_reports_feedback_mismatch() {
        let clamp = clamp();
        clamp.set_jammed(true);
        let error = clamp.fire_and_wait(true, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            error,
            DeviceError::fault("clamp", "feedback mismatch: commanded extended, feedback retracted")
        );
        let state = clamp.state();
        assert!(!state.is_moving);
        assert!(state.position > 0.0 && state.position < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait_and_the_stroke() {
        let clamp = clamp();
        let cancel = CancellationToken::new();
        let waiter = {
            let clamp = clamp.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { clamp.fire_and_wait(true, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!clamp.state().is_moving);
        assert!(!clamp.state().is_extended);
    }

    #[tokio::test(start_paused = true)]
    async fn firing_the_current_state_is_a_no_op() {
        let clamp = clamp();
        let mut feedback = clamp.watch();
        feedback.borrow_and_update();
        clamp.fire(false, &CancellationToken::new()).await.unwrap();
        assert!(!feedback.has_changed().unwrap());
    }
}

//! Simulated linear axis.
//!
//! Motion is integrated with [`profile::advance`](crate::profile::advance) on
//! the configured sample interval using tokio time, so tests running with a
//! paused clock are fully deterministic. Each command starts a new motion
//! generation; a newer command or [`Axis::stop`] supersedes the running one.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use cellflow_engine::{Axis, DeviceError, Sensor};
use cellflow_types::{AxisConfig, AxisState, LimitBehavior, SimulationConfig};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    fault::FaultInjector,
    profile::{Kinematics, MotionLimits, advance},
};

/// A simulated axis. Clones share the same axis.
#[derive(Clone)]
pub struct SimAxis {
    inner: Arc<AxisInner>,
}

struct AxisInner {
    config: AxisConfig,
    sample: Duration,
    epsilon: f64,
    limit_behavior: LimitBehavior,
    motion: Mutex<Motion>,
    faults: FaultInjector,
}

#[derive(Default)]
struct Motion {
    kinematics: Kinematics,
    generation: u64,
    /// Signal of the running motion, fired when it is superseded or stopped.
    active: Option<CancellationToken>,
}

/// Sensor watched by `move_until`, with the last sample taken.
///
/// The gate trips once the reading reaches the threshold.
struct Gate {
    sensor: Arc<dyn Sensor>,
    threshold: f64,
    last: (f64, f64),
}

impl Gate {
    fn crossed(&self, reading: f64) -> bool {
        reading >= self.threshold
    }

    /// Position between the last two samples where the reading hits the threshold.
    fn latch(&self, position: f64, reading: f64) -> f64 {
        let (last_position, last_reading) = self.last;
        let span = reading - last_reading;
        if span == 0.0 {
            return position;
        }
        let fraction = ((self.threshold - last_reading) / span).clamp(0.0, 1.0);
        last_position + fraction * (position - last_position)
    }
}

enum MotionEnd {
    Settled(f64),
    Triggered(f64),
}

impl SimAxis {
    pub fn new(config: AxisConfig, simulation: &SimulationConfig) -> Self {
        let home = config.home;
        Self {
            inner: Arc::new(AxisInner {
                config,
                sample: Duration::from_millis(simulation.sample_interval_ms.max(1)),
                epsilon: simulation.settle_epsilon,
                limit_behavior: simulation.move_until_limit,
                motion: Mutex::new(Motion {
                    kinematics: Kinematics::at_rest(home),
                    ..Motion::default()
                }),
                faults: FaultInjector::default(),
            }),
        }
    }

    /// Make the next `commands` motion commands fault.
    pub fn fail_next(&self, commands: u32) {
        self.inner.faults.fail_next(commands);
    }

    pub fn position(&self) -> f64 {
        self.lock().kinematics.position
    }

    pub fn is_moving(&self) -> bool {
        self.lock().active.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Motion> {
        self.inner.motion.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name_str(&self) -> &str {
        &self.inner.config.name
    }

    fn limits(&self) -> MotionLimits {
        MotionLimits {
            max_velocity: self.inner.config.max_velocity,
            max_acceleration: self.inner.config.max_acceleration,
        }
    }

    fn check_command(&self, target: f64) -> Result<(), DeviceError> {
        if self.inner.faults.take() {
            return Err(DeviceError::fault(self.name_str(), "injected fault"));
        }
        let config = &self.inner.config;
        if !target.is_finite() || !(config.travel_min..=config.travel_max).contains(&target) {
            return Err(DeviceError::fault(
                self.name_str(),
                format!("target {target} outside travel [{}, {}]", config.travel_min, config.travel_max),
            ));
        }
        Ok(())
    }

    fn begin(&self, target: f64) -> (u64, CancellationToken) {
        let mut motion = self.lock();
        if let Some(previous) = motion.active.take() {
            previous.cancel();
        }
        motion.generation += 1;
        let token = CancellationToken::new();
        motion.active = Some(token.clone());
        debug!(axis = %self.name_str(), from = motion.kinematics.position, target, "motion started");
        (motion.generation, token)
    }

    /// Integrate one sample; `None` once the motion has been superseded.
    fn step(&self, generation: u64, target: f64) -> Option<Kinematics> {
        let mut motion = self.lock();
        if motion.generation != generation {
            return None;
        }
        motion.kinematics = advance(
            motion.kinematics,
            target,
            self.limits(),
            self.inner.sample.as_secs_f64(),
            self.inner.epsilon,
        );
        Some(motion.kinematics)
    }

    /// Bring the axis to rest, optionally at `position`, if `generation` still owns it.
    fn halt(&self, generation: u64, position: Option<f64>) {
        let mut motion = self.lock();
        if motion.generation != generation {
            return;
        }
        if let Some(position) = position {
            motion.kinematics.position = position;
        }
        motion.kinematics.velocity = 0.0;
        if let Some(active) = motion.active.take() {
            active.cancel();
        }
    }

    async fn drive(
        &self,
        (generation, superseded): (u64, CancellationToken),
        target: f64,
        cancel: &CancellationToken,
        mut gate: Option<Gate>,
    ) -> Result<MotionEnd, DeviceError> {
        if let Some(gate) = gate.as_mut() {
            let reading = match gate.sensor.read_analog().await {
                Ok(reading) => reading,
                Err(error) => {
                    self.halt(generation, None);
                    return Err(error);
                }
            };
            let position = self.position();
            if gate.crossed(reading) {
                self.halt(generation, None);
                debug!(axis = %self.name_str(), position, reading, "sensor already past threshold");
                return Ok(MotionEnd::Triggered(position));
            }
            gate.last = (position, reading);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.halt(generation, None);
                    debug!(axis = %self.name_str(), position = self.position(), "motion cancelled");
                    return Err(DeviceError::cancelled(self.name_str()));
                }
                _ = superseded.cancelled() => {
                    return Err(DeviceError::fault(self.name_str(), "motion interrupted"));
                }
                _ = tokio::time::sleep(self.inner.sample) => {}
            }

            let Some(state) = self.step(generation, target) else {
                return Err(DeviceError::fault(self.name_str(), "motion interrupted"));
            };

            if let Some(gate) = gate.as_mut() {
                let reading = match gate.sensor.read_analog().await {
                    Ok(reading) => reading,
                    Err(error) => {
                        self.halt(generation, None);
                        return Err(error);
                    }
                };
                if gate.crossed(reading) {
                    let stopped_at = gate.latch(state.position, reading);
                    self.halt(generation, Some(stopped_at));
                    debug!(axis = %self.name_str(), position = stopped_at, reading, "sensor threshold crossed");
                    return Ok(MotionEnd::Triggered(stopped_at));
                }
                gate.last = (state.position, reading);
            }

            if state.is_settled_at(target, self.inner.epsilon) {
                self.halt(generation, Some(target));
                debug!(axis = %self.name_str(), position = target, "motion settled");
                return Ok(MotionEnd::Settled(target));
            }
        }
    }
}

#[async_trait]
impl Axis for SimAxis {
    fn name(&self) -> &str {
        self.name_str()
    }

    fn state(&self) -> AxisState {
        let motion = self.lock();
        AxisState {
            position: motion.kinematics.position,
            velocity: motion.kinematics.velocity,
            is_moving: motion.active.is_some(),
            travel_min: self.inner.config.travel_min,
            travel_max: self.inner.config.travel_max,
        }
    }

    async fn move_to(&self, position: f64, cancel: &CancellationToken) -> Result<(), DeviceError> {
        self.check_command(position)?;
        let axis = self.clone();
        let cancel = cancel.clone();
        // Begin before spawning so the axis reports moving once this returns.
        let motion = self.begin(position);
        tokio::spawn(async move {
            if let Err(error) = axis.drive(motion, position, &cancel, None).await {
                debug!(axis = %axis.name_str(), %error, "background motion ended");
            }
        });
        Ok(())
    }

    async fn move_to_and_wait(&self, position: f64, cancel: &CancellationToken) -> Result<f64, DeviceError> {
        self.check_command(position)?;
        match self.drive(self.begin(position), position, cancel, None).await? {
            MotionEnd::Settled(reached) | MotionEnd::Triggered(reached) => Ok(reached),
        }
    }

    async fn move_until(
        &self,
        limit: f64,
        sensor: Arc<dyn Sensor>,
        threshold: f64,
        cancel: &CancellationToken,
    ) -> Result<f64, DeviceError> {
        self.check_command(limit)?;
        let gate = Gate {
            sensor,
            threshold,
            last: (0.0, 0.0),
        };
        match self.drive(self.begin(limit), limit, cancel, Some(gate)).await? {
            MotionEnd::Triggered(position) => Ok(position),
            MotionEnd::Settled(position) => match self.inner.limit_behavior {
                LimitBehavior::Stop => Ok(position),
                LimitBehavior::Fault => Err(DeviceError::fault(
                    self.name_str(),
                    format!("reached limit {limit} without sensor crossing {threshold}"),
                )),
            },
        }
    }

    fn stop(&self) {
        let generation = {
            let mut motion = self.lock();
            motion.generation += 1;
            motion.generation
        };
        self.halt(generation, None);
        debug!(axis = %self.name_str(), position = self.position(), "stopped");
    }
}

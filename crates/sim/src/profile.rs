//! Trapezoidal motion profile integration.
//!
//! [`advance`] moves a point one sample toward a target under a velocity and
//! acceleration bound. Velocity ramps up at the acceleration limit, cruises at
//! the velocity limit, and ramps down so the point can stop at the target.
//! Once the remaining distance falls inside the settling epsilon, or the next
//! step would overshoot, the point snaps onto the target at rest.

/// Position and signed velocity of a moving point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    pub position: f64,
    pub velocity: f64,
}

/// Bounds of a trapezoidal profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl Kinematics {
    pub fn at_rest(position: f64) -> Self {
        Self { position, velocity: 0.0 }
    }

    pub fn is_settled_at(&self, target: f64, epsilon: f64) -> bool {
        self.velocity == 0.0 && (target - self.position).abs() <= epsilon
    }
}

/// Integrate one sample of `dt` seconds toward `target`.
pub fn advance(state: Kinematics, target: f64, limits: MotionLimits, dt: f64, epsilon: f64) -> Kinematics {
    let remaining = target - state.position;
    if remaining.abs() <= epsilon {
        return Kinematics::at_rest(target);
    }

    let direction = remaining.signum();
    let acceleration = limits.max_acceleration.max(f64::EPSILON);
    // Fastest speed from which the point can still stop at the target.
    let stoppable = (2.0 * acceleration * remaining.abs()).sqrt();
    let desired = direction * limits.max_velocity.min(stoppable);

    let max_change = acceleration * dt;
    let velocity = state.velocity + (desired - state.velocity).clamp(-max_change, max_change);
    let position = state.position + velocity * dt;

    let overshoot = (target - position).signum() != direction;
    if overshoot || (target - position).abs() <= epsilon {
        Kinematics::at_rest(target)
    } else {
        Kinematics { position, velocity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: MotionLimits = MotionLimits {
        max_velocity: 100.0,
        max_acceleration: 500.0,
    };

    fn settle(mut state: Kinematics, target: f64) -> (Kinematics, usize, f64) {
        let mut peak: f64 = 0.0;
        for sample in 1..10_000 {
            state = advance(state, target, LIMITS, 0.01, 0.01);
            peak = peak.max(state.velocity.abs());
            if state.is_settled_at(target, 0.01) {
                return (state, sample, peak);
            }
        }
        panic!("profile never settled");
    }

    #[test]
    fn long_moves_cruise_at_the_velocity_limit() {
        let (state, samples, peak) = settle(Kinematics::at_rest(0.0), 200.0);
        assert_eq!(state, Kinematics::at_rest(200.0));
        assert!((peak - 100.0).abs() < 1e-9);
        // Ideal profile: two 0.2 s ramps around 1.8 s of cruise.
        assert!((190..=260).contains(&samples), "settled after {samples} samples");
    }

    #[test]
    fn acceleration_is_bounded() {
        let mut state = Kinematics::at_rest(0.0);
        for _ in 0..50 {
            let next = advance(state, -150.0, LIMITS, 0.01, 0.01);
            assert!((next.velocity - state.velocity).abs() <= 5.0 + 1e-9);
            state = next;
        }
        assert!(state.velocity < 0.0);
    }

    #[test]
    fn short_moves_never_reach_cruise() {
        let (_, _, peak) = settle(Kinematics::at_rest(10.0), 12.0);
        assert!(peak < 100.0);
    }

    #[test]
    fn inside_epsilon_snaps_to_target() {
        let state = advance(Kinematics { position: 49.995, velocity: 3.0 }, 50.0, LIMITS, 0.01, 0.01);
        assert_eq!(state, Kinematics::at_rest(50.0));
    }
}

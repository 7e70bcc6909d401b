//! Simulated sensors.
//!
//! A reading comes from the first source that has one: a mock value injected
//! into the run's variable table, then an optional coupling to an axis
//! position, then the configured baseline.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use cellflow_engine::{Axis, DeviceError, Sensor, Variables};
use cellflow_types::{SensorConfig, SensorKind};

use crate::axis::SimAxis;

/// Readings above this count as a high digital level.
const DIGITAL_THRESHOLD: f64 = 0.5;

type Curve = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// A sensor whose reading is a function of an axis position.
#[derive(Clone)]
struct AxisCoupling {
    axis: SimAxis,
    curve: Curve,
}

/// A simulated sensor. Clones share the same sensor.
#[derive(Clone)]
pub struct SimSensor {
    inner: Arc<SensorInner>,
}

struct SensorInner {
    config: SensorConfig,
    variables: Variables,
    coupling: RwLock<Option<AxisCoupling>>,
}

impl SimSensor {
    pub fn new(config: SensorConfig, variables: Variables) -> Self {
        Self {
            inner: Arc::new(SensorInner {
                config,
                variables,
                coupling: RwLock::new(None),
            }),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.inner.config.kind
    }

    /// Derive readings from `axis` position through `curve`.
    pub fn couple_to_axis<F>(&self, axis: SimAxis, curve: F)
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        *self.inner.coupling.write().unwrap_or_else(PoisonError::into_inner) = Some(AxisCoupling {
            axis,
            curve: Arc::new(curve),
        });
    }

    pub fn decouple(&self) {
        *self.inner.coupling.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn reading(&self) -> f64 {
        let name = &self.inner.config.name;
        if let Some(mock) = self.inner.variables.mock_reading(name) {
            return mock;
        }
        let coupling = self.inner.coupling.read().unwrap_or_else(PoisonError::into_inner).clone();
        match coupling {
            Some(coupling) => (coupling.curve)(coupling.axis.state().position),
            None => self.inner.config.baseline,
        }
    }
}

#[async_trait]
impl Sensor for SimSensor {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    async fn check_level(&self, expected: bool) -> Result<bool, DeviceError> {
        Ok((self.reading() > DIGITAL_THRESHOLD) == expected)
    }

    async fn read_analog(&self) -> Result<f64, DeviceError> {
        Ok(self.reading())
    }
}

#[cfg(test)]
mod tests {
    use cellflow_types::{AxisConfig, SimulationConfig};

    use super::*;

    #[tokio::test]
    async fn mock_values_override_the_model() {
        let variables = Variables::new();
        let probe = SimSensor::new(SensorConfig::analog("probe", 2.0), variables.clone());
        assert_eq!(probe.read_analog().await.unwrap(), 2.0);

        variables.set_mock_reading("probe", 7.5);
        assert_eq!(probe.read_analog().await.unwrap(), 7.5);

        variables.clear_mock_reading("probe");
        let axis = SimAxis::new(AxisConfig::new("z", 0.0, 100.0), &SimulationConfig::default());
        probe.couple_to_axis(axis, |position| position * 2.0 + 1.0);
        assert_eq!(probe.read_analog().await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn digital_levels_compare_against_expected() {
        let variables = Variables::new();
        let present = SimSensor::new(SensorConfig::digital("part_present"), variables.clone());
        assert!(present.check_level(false).await.unwrap());
        variables.set_mock_level("part_present", true);
        assert!(present.check_level(true).await.unwrap());
        assert!(!present.check_level(false).await.unwrap());
    }
}

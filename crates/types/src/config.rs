//! Static machine configuration.
//!
//! The configuration describes the cell topology a backend is built against:
//! axes with their travel range and kinematic limits, cylinders with their
//! transition dynamics and feedback ports, sensors, workpiece tables, and the
//! simulation parameters used by the reference backend. The engine reads this
//! model and never validates it; topology checks belong to whatever layer
//! produced the document.

use std::{fs, path::Path};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topology of one automation cell.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(default)]
pub struct MachineConfig {
    /// Optional human-readable cell name.
    pub name: Option<String>,
    pub axes: Vec<AxisConfig>,
    pub cylinders: Vec<CylinderConfig>,
    pub sensors: Vec<SensorConfig>,
    pub workpiece_tables: Vec<WorkpieceTableConfig>,
    pub simulation: SimulationConfig,
}

/// One linear motion axis.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AxisConfig {
    pub name: String,
    #[serde(default)]
    pub travel_min: f64,
    #[serde(default = "default_travel_max")]
    pub travel_max: f64,
    /// Units per second.
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    /// Units per second squared.
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f64,
    /// Position at power-up.
    #[serde(default)]
    pub home: f64,
}

impl AxisConfig {
    pub fn new(name: impl Into<String>, travel_min: f64, travel_max: f64) -> Self {
        Self {
            name: name.into(),
            travel_min,
            travel_max,
            max_velocity: default_max_velocity(),
            max_acceleration: default_max_acceleration(),
            home: travel_min.max(0.0).min(travel_max),
        }
    }

    pub fn with_limits(mut self, max_velocity: f64, max_acceleration: f64) -> Self {
        self.max_velocity = max_velocity;
        self.max_acceleration = max_acceleration;
        self
    }
}

/// One pneumatic cylinder.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CylinderConfig {
    pub name: String,
    /// Stroke time in milliseconds, applied to both directions.
    #[serde(default = "default_transition_ms")]
    pub transition_ms: u64,
    #[serde(default)]
    pub feedback: FeedbackPorts,
    #[serde(default)]
    pub initially_extended: bool,
}

impl CylinderConfig {
    pub fn new(name: impl Into<String>, transition_ms: u64) -> Self {
        Self {
            name: name.into(),
            transition_ms,
            feedback: FeedbackPorts::default(),
            initially_extended: false,
        }
    }
}

/// Feedback switch port names of a cylinder.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub struct FeedbackPorts {
    pub extended: Option<String>,
    pub retracted: Option<String>,
}

/// Whether a sensor reports a level or a continuous value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    #[default]
    Digital,
    Analog,
}

/// One sensor input.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub name: String,
    #[serde(default)]
    pub kind: SensorKind,
    /// Reading reported when no mock value is injected.
    #[serde(default)]
    pub baseline: f64,
}

impl SensorConfig {
    pub fn analog(name: impl Into<String>, baseline: f64) -> Self {
        Self {
            name: name.into(),
            kind: SensorKind::Analog,
            baseline,
        }
    }

    pub fn digital(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SensorKind::Digital,
            baseline: 0.0,
        }
    }
}

/// A station-keyed virtual inventory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkpieceTableConfig {
    pub name: String,
    /// Known stations. Carriers (grippers, pallets) are stations too.
    #[serde(default)]
    pub stations: Vec<String>,
}

/// What `move_until` does when the limit is reached without a sensor crossing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitBehavior {
    /// Stop at the limit and report it as the final position.
    #[default]
    Stop,
    /// Stop at the limit and raise a device fault.
    Fault,
}

/// Parameters of the time-stepped reference backend.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Integration step in milliseconds.
    pub sample_interval_ms: u64,
    /// Distance under which an axis counts as settled.
    pub settle_epsilon: f64,
    pub move_until_limit: LimitBehavior,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 10,
            settle_epsilon: 0.01,
            move_until_limit: LimitBehavior::Stop,
        }
    }
}

/// Errors raised while loading a machine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MachineConfig {
    /// Parse a YAML document. JSON is accepted too since it is a YAML subset.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a configuration file, choosing the parser from the extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path.extension().and_then(|extension| extension.to_str()) == Some("json");
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn axis(&self, name: &str) -> Option<&AxisConfig> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    pub fn cylinder(&self, name: &str) -> Option<&CylinderConfig> {
        self.cylinders.iter().find(|cylinder| cylinder.name == name)
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|sensor| sensor.name == name)
    }
}

fn default_travel_max() -> f64 {
    1000.0
}

fn default_max_velocity() -> f64 {
    100.0
}

fn default_max_acceleration() -> f64 {
    500.0
}

fn default_transition_ms() -> u64 {
    200
}

//! Closed set of device operations an action can carry.
//!
//! Each device kind has its own enumeration, so an action can only be built
//! with an operation that exists for that kind. The interpreter dispatches on
//! these variants directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AxisCommand {
    MoveTo { position: f64 },
    MoveToAndWait { position: f64 },
    MoveUntil { limit: f64, sensor: String, threshold: f64 },
    ReadPosition,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CylinderCommand {
    Fire { extend: bool },
    FireAndWait { extend: bool },
    WaitFor { extended: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SensorCommand {
    CheckLevel { expected: bool },
    ReadAnalog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MaterialCommand {
    Spawn { station: String, class: String },
    Transform { station: String, class: String },
    Consume { station: String },
    Attach { station: String, carrier: String },
    Detach { carrier: String, station: String },
    Bind { station: String, into: String },
    Unbind { station: String, to: String },
    CheckState { station: String, class: Option<String> },
}

/// Operations handled by the engine itself rather than a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    SetVariable { key: String, value: Value },
    GetVariable { key: String },
    Dwell {
        #[serde(with = "millis")]
        duration: Duration,
    },
}

/// One operation, tagged by the device kind it applies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "device_kind", content = "command", rename_all = "snake_case")]
pub enum Command {
    Axis(AxisCommand),
    Cylinder(CylinderCommand),
    Sensor(SensorCommand),
    Material(MaterialCommand),
    Engine(EngineCommand),
}

impl Command {
    /// Device kind the target must have; `None` for engine-level operations.
    pub fn device_kind(&self) -> Option<DeviceKind> {
        match self {
            Command::Axis(_) => Some(DeviceKind::Axis),
            Command::Cylinder(_) => Some(DeviceKind::Cylinder),
            Command::Sensor(_) => Some(DeviceKind::Sensor),
            Command::Material(_) => Some(DeviceKind::WorkpieceTable),
            Command::Engine(_) => None,
        }
    }

    /// Operation label used for default step names and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Axis(command) => match command {
                AxisCommand::MoveTo { .. } => "move_to",
                AxisCommand::MoveToAndWait { .. } => "move_to_and_wait",
                AxisCommand::MoveUntil { .. } => "move_until",
                AxisCommand::ReadPosition => "read_position",
                AxisCommand::Stop => "stop",
            },
            Command::Cylinder(command) => match command {
                CylinderCommand::Fire { .. } => "fire",
                CylinderCommand::FireAndWait { .. } => "fire_and_wait",
                CylinderCommand::WaitFor { .. } => "wait_for",
            },
            Command::Sensor(command) => match command {
                SensorCommand::CheckLevel { .. } => "check_level",
                SensorCommand::ReadAnalog => "read_analog",
            },
            Command::Material(command) => match command {
                MaterialCommand::Spawn { .. } => "material_spawn",
                MaterialCommand::Transform { .. } => "material_transform",
                MaterialCommand::Consume { .. } => "material_consume",
                MaterialCommand::Attach { .. } => "material_attach",
                MaterialCommand::Detach { .. } => "material_detach",
                MaterialCommand::Bind { .. } => "material_bind",
                MaterialCommand::Unbind { .. } => "material_unbind",
                MaterialCommand::CheckState { .. } => "material_check_state",
            },
            Command::Engine(command) => match command {
                EngineCommand::SetVariable { .. } => "set_variable",
                EngineCommand::GetVariable { .. } => "get_variable",
                EngineCommand::Dwell { .. } => "dwell",
            },
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_serialize_with_kind_and_op_tags() {
        let command = Command::Axis(AxisCommand::MoveUntil {
            limit: 200.0,
            sensor: "probe".into(),
            threshold: 10.0,
        });
        let value = serde_json::to_value(&command).expect("serialize command");
        assert_eq!(
            value,
            json!({
                "device_kind": "axis",
                "command": { "op": "move_until", "limit": 200.0, "sensor": "probe", "threshold": 10.0 }
            })
        );
    }

    #[test]
    fn engine_commands_need_no_device() {
        let dwell = Command::Engine(EngineCommand::Dwell {
            duration: Duration::from_millis(5),
        });
        assert_eq!(dwell.device_kind(), None);
        assert_eq!(dwell.label(), "dwell");
        let spawn = Command::Material(MaterialCommand::Spawn {
            station: "infeed".into(),
            class: "blank".into(),
        });
        assert_eq!(spawn.device_kind(), Some(DeviceKind::WorkpieceTable));
    }
}

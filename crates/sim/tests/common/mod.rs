#![allow(dead_code)]

use cellflow_sim::SimBackend;
use cellflow_types::{AxisConfig, CylinderConfig, LimitBehavior, MachineConfig, SensorConfig, SimulationConfig, WorkpieceTableConfig};

pub const CYLINDERS: usize = 9;

/// Three axes, nine cylinders `c0`..`c8`, one analog probe and a parts table.
pub fn machine(limit: LimitBehavior) -> MachineConfig {
    MachineConfig {
        name: Some("test cell".into()),
        axes: ["x", "y", "z"]
            .into_iter()
            .map(|name| AxisConfig::new(name, 0.0, 300.0).with_limits(100.0, 500.0))
            .collect(),
        cylinders: (0..CYLINDERS).map(|index| CylinderConfig::new(format!("c{index}"), 200)).collect(),
        sensors: vec![SensorConfig::analog("probe", 0.0)],
        workpiece_tables: vec![WorkpieceTableConfig {
            name: "parts".into(),
            stations: vec!["infeed".into(), "gripper".into(), "fixture".into(), "outfeed".into()],
        }],
        simulation: SimulationConfig {
            move_until_limit: limit,
            ..SimulationConfig::default()
        },
    }
}

pub fn backend() -> SimBackend {
    SimBackend::new(machine(LimitBehavior::Stop))
}

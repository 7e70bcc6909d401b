//! Assembling a simulated cell from a machine configuration.

use std::sync::Arc;

use cellflow_engine::{Axis, DeviceError, DeviceRegistry, ExecutionContext, ExecutionContextBuilder, Variables};
use cellflow_types::MachineConfig;
use indexmap::IndexMap;
use tracing::info;

use crate::{axis::SimAxis, cylinder::SimCylinder, sensor::SimSensor, workpiece::InMemoryWorkpieceTable};

/// Every simulated device of one cell, keyed by name.
pub struct SimBackend {
    machine: MachineConfig,
    variables: Variables,
    axes: IndexMap<String, SimAxis>,
    cylinders: IndexMap<String, SimCylinder>,
    sensors: IndexMap<String, SimSensor>,
    tables: IndexMap<String, Arc<InMemoryWorkpieceTable>>,
}

impl SimBackend {
    pub fn new(machine: MachineConfig) -> Self {
        Self::with_variables(machine, Variables::new())
    }

    /// Build against an existing variable table, which sensors read mock values from.
    pub fn with_variables(machine: MachineConfig, variables: Variables) -> Self {
        let simulation = &machine.simulation;
        let axes = machine
            .axes
            .iter()
            .map(|config| (config.name.clone(), SimAxis::new(config.clone(), simulation)))
            .collect();
        let cylinders = machine
            .cylinders
            .iter()
            .map(|config| (config.name.clone(), SimCylinder::new(config.clone(), simulation)))
            .collect();
        let sensors = machine
            .sensors
            .iter()
            .map(|config| (config.name.clone(), SimSensor::new(config.clone(), variables.clone())))
            .collect();
        let tables = machine
            .workpiece_tables
            .iter()
            .map(|config| (config.name.clone(), Arc::new(InMemoryWorkpieceTable::new(config.clone()))))
            .collect();

        let backend = Self {
            machine,
            variables,
            axes,
            cylinders,
            sensors,
            tables,
        };
        info!(
            cell = backend.machine.name.as_deref().unwrap_or("unnamed"),
            axes = backend.axes.len(),
            cylinders = backend.cylinders.len(),
            sensors = backend.sensors.len(),
            tables = backend.tables.len(),
            "simulated backend ready"
        );
        backend
    }

    pub fn machine(&self) -> &MachineConfig {
        &self.machine
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn axis(&self, name: &str) -> Option<&SimAxis> {
        self.axes.get(name)
    }

    pub fn cylinder(&self, name: &str) -> Option<&SimCylinder> {
        self.cylinders.get(name)
    }

    pub fn sensor(&self, name: &str) -> Option<&SimSensor> {
        self.sensors.get(name)
    }

    pub fn workpiece_table(&self, name: &str) -> Option<&Arc<InMemoryWorkpieceTable>> {
        self.tables.get(name)
    }

    pub fn axes(&self) -> impl Iterator<Item = &SimAxis> {
        self.axes.values()
    }

    pub fn cylinders(&self) -> impl Iterator<Item = &SimCylinder> {
        self.cylinders.values()
    }

    pub fn workpiece_tables(&self) -> impl Iterator<Item = &Arc<InMemoryWorkpieceTable>> {
        self.tables.values()
    }

    /// Make `sensor` read `curve(position)` of `axis`.
    pub fn bind_sensor_to_axis<F>(&self, sensor: &str, axis: &str, curve: F) -> Result<(), DeviceError>
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        let target = self.sensors.get(sensor).ok_or_else(|| DeviceError::not_found(sensor))?;
        let source = self.axes.get(axis).ok_or_else(|| DeviceError::not_found(axis))?;
        target.couple_to_axis(source.clone(), curve);
        Ok(())
    }

    /// A registry handing out every device of the cell.
    pub fn registry(&self) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        for axis in self.axes.values() {
            registry.register_axis(Arc::new(axis.clone()));
        }
        for cylinder in self.cylinders.values() {
            registry.register_cylinder(Arc::new(cylinder.clone()));
        }
        for sensor in self.sensors.values() {
            registry.register_sensor(Arc::new(sensor.clone()));
        }
        for table in self.tables.values() {
            registry.register_workpiece_table(table.clone());
        }
        registry
    }

    /// A context builder already bound to this cell's devices, variables and configuration.
    pub fn context(&self) -> ExecutionContextBuilder {
        ExecutionContext::builder()
            .devices(self.registry())
            .variables(self.variables.clone())
            .machine(self.machine.clone())
    }

    pub fn any_axis_moving(&self) -> bool {
        self.axes.values().any(|axis| axis.state().is_moving)
    }

    /// Halt every axis.
    pub fn stop_all(&self) {
        for axis in self.axes.values() {
            axis.stop();
        }
    }
}

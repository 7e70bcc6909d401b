//! Name-keyed registry of device handles.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use super::{Axis, Cylinder, DeviceError, DeviceKind, Sensor, WorkpieceTable};

/// A registered device of one of the supported kinds.
#[derive(Clone)]
pub enum DeviceHandle {
    Axis(Arc<dyn Axis>),
    Cylinder(Arc<dyn Cylinder>),
    Sensor(Arc<dyn Sensor>),
    WorkpieceTable(Arc<dyn WorkpieceTable>),
}

impl DeviceHandle {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceHandle::Axis(_) => DeviceKind::Axis,
            DeviceHandle::Cylinder(_) => DeviceKind::Cylinder,
            DeviceHandle::Sensor(_) => DeviceKind::Sensor,
            DeviceHandle::WorkpieceTable(_) => DeviceKind::WorkpieceTable,
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceHandle::{:?}", self.kind())
    }
}

/// Devices available to one flow run, keyed by name in registration order.
#[derive(Clone, Default, Debug)]
pub struct DeviceRegistry {
    devices: IndexMap<String, DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under `name`, replacing any previous registration.
    pub fn insert(&mut self, name: impl Into<String>, handle: DeviceHandle) -> Option<DeviceHandle> {
        self.devices.insert(name.into(), handle)
    }

    pub fn register_axis(&mut self, axis: Arc<dyn Axis>) {
        self.insert(axis.name().to_string(), DeviceHandle::Axis(axis));
    }

    pub fn register_cylinder(&mut self, cylinder: Arc<dyn Cylinder>) {
        self.insert(cylinder.name().to_string(), DeviceHandle::Cylinder(cylinder));
    }

    pub fn register_sensor(&mut self, sensor: Arc<dyn Sensor>) {
        self.insert(sensor.name().to_string(), DeviceHandle::Sensor(sensor));
    }

    pub fn register_workpiece_table(&mut self, table: Arc<dyn WorkpieceTable>) {
        self.insert(table.name().to_string(), DeviceHandle::WorkpieceTable(table));
    }

    pub fn get(&self, name: &str) -> Result<&DeviceHandle, DeviceError> {
        self.devices.get(name).ok_or_else(|| DeviceError::not_found(name))
    }

    pub fn axis(&self, name: &str) -> Result<Arc<dyn Axis>, DeviceError> {
        match self.get(name)? {
            DeviceHandle::Axis(axis) => Ok(Arc::clone(axis)),
            other => Err(wrong_kind(name, DeviceKind::Axis, other)),
        }
    }

    pub fn cylinder(&self, name: &str) -> Result<Arc<dyn Cylinder>, DeviceError> {
        match self.get(name)? {
            DeviceHandle::Cylinder(cylinder) => Ok(Arc::clone(cylinder)),
            other => Err(wrong_kind(name, DeviceKind::Cylinder, other)),
        }
    }

    pub fn sensor(&self, name: &str) -> Result<Arc<dyn Sensor>, DeviceError> {
        match self.get(name)? {
            DeviceHandle::Sensor(sensor) => Ok(Arc::clone(sensor)),
            other => Err(wrong_kind(name, DeviceKind::Sensor, other)),
        }
    }

    pub fn workpiece_table(&self, name: &str) -> Result<Arc<dyn WorkpieceTable>, DeviceError> {
        match self.get(name)? {
            DeviceHandle::WorkpieceTable(table) => Ok(Arc::clone(table)),
            other => Err(wrong_kind(name, DeviceKind::WorkpieceTable, other)),
        }
    }

    /// Registered axes, used to halt motion when a run is torn down.
    pub fn axes(&self) -> impl Iterator<Item = &Arc<dyn Axis>> {
        self.devices.values().filter_map(|handle| match handle {
            DeviceHandle::Axis(axis) => Some(axis),
            _ => None,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn wrong_kind(name: &str, expected: DeviceKind, actual: &DeviceHandle) -> DeviceError {
    DeviceError::WrongKind {
        device: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}

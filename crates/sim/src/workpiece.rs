//! In-memory workpiece table.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use cellflow_engine::{MaterialError, WorkpieceTable};
use cellflow_types::{MaterialEvent, MaterialEventKind, Workpiece, WorkpieceTableConfig};
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Station-keyed inventory held in memory.
///
/// Every check happens before any mutation, so a failed operation leaves the
/// table unchanged. The station named in a published event is where the
/// workpiece ends up, or where it was for `consume`.
pub struct InMemoryWorkpieceTable {
    name: String,
    /// Known stations; empty accepts any station name.
    stations: Vec<String>,
    slots: Mutex<IndexMap<String, Workpiece>>,
    next_id: AtomicU64,
    events: broadcast::Sender<MaterialEvent>,
}

impl InMemoryWorkpieceTable {
    pub fn new(config: WorkpieceTableConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: config.name,
            stations: config.stations,
            slots: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Current contents by station.
    pub fn snapshot(&self) -> IndexMap<String, Workpiece> {
        self.slots().clone()
    }

    fn slots(&self) -> MutexGuard<'_, IndexMap<String, Workpiece>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_known(&self, station: &str) -> Result<(), MaterialError> {
        if self.stations.is_empty() || self.stations.iter().any(|known| known == station) {
            Ok(())
        } else {
            Err(MaterialError::unknown_station(station))
        }
    }

    fn ensure_free(slots: &IndexMap<String, Workpiece>, station: &str) -> Result<(), MaterialError> {
        match slots.get(station) {
            Some(occupant) => Err(MaterialError::occupied(station, &occupant.id)),
            None => Ok(()),
        }
    }

    fn publish(&self, kind: MaterialEventKind, station: &str, material: &Workpiece) {
        debug!(table = %self.name, ?kind, station, id = %material.id, class = %material.class, "material event");
        let _ = self.events.send(MaterialEvent {
            kind,
            table: self.name.clone(),
            station: station.to_string(),
            material: material.clone(),
            at: Utc::now(),
        });
    }

    /// Move the workpiece at `from` to the empty station `to`.
    fn relocate(&self, kind: MaterialEventKind, from: &str, to: &str) -> Result<Workpiece, MaterialError> {
        self.ensure_known(from)?;
        self.ensure_known(to)?;
        let mut slots = self.slots();
        if !slots.contains_key(from) {
            return Err(MaterialError::empty(from));
        }
        Self::ensure_free(&slots, to)?;
        let workpiece = slots.shift_remove(from).ok_or_else(|| MaterialError::empty(from))?;
        slots.insert(to.to_string(), workpiece.clone());
        drop(slots);
        self.publish(kind, to, &workpiece);
        Ok(workpiece)
    }
}

impl WorkpieceTable for InMemoryWorkpieceTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, station: &str, class: &str) -> Result<Workpiece, MaterialError> {
        self.ensure_known(station)?;
        let mut slots = self.slots();
        Self::ensure_free(&slots, station)?;
        let id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        let workpiece = Workpiece::new(id, class);
        slots.insert(station.to_string(), workpiece.clone());
        drop(slots);
        self.publish(MaterialEventKind::Spawn, station, &workpiece);
        Ok(workpiece)
    }

    fn transform(&self, station: &str, class: &str) -> Result<Workpiece, MaterialError> {
        self.ensure_known(station)?;
        let mut slots = self.slots();
        let workpiece = slots.get_mut(station).ok_or_else(|| MaterialError::empty(station))?;
        workpiece.class = class.to_string();
        let workpiece = workpiece.clone();
        drop(slots);
        self.publish(MaterialEventKind::Transform, station, &workpiece);
        Ok(workpiece)
    }

    fn consume(&self, station: &str) -> Result<Workpiece, MaterialError> {
        self.ensure_known(station)?;
        let workpiece = self.slots().shift_remove(station).ok_or_else(|| MaterialError::empty(station))?;
        self.publish(MaterialEventKind::Consume, station, &workpiece);
        Ok(workpiece)
    }

    fn attach(&self, station: &str, carrier: &str) -> Result<Workpiece, MaterialError> {
        self.relocate(MaterialEventKind::Attach, station, carrier)
    }

    fn detach(&self, carrier: &str, station: &str) -> Result<Workpiece, MaterialError> {
        self.relocate(MaterialEventKind::Detach, carrier, station)
    }

    fn bind(&self, station: &str, into: &str) -> Result<Workpiece, MaterialError> {
        self.ensure_known(station)?;
        self.ensure_known(into)?;
        if station == into {
            return Err(MaterialError::SelfBind {
                station: station.to_string(),
            });
        }
        let mut slots = self.slots();
        if !slots.contains_key(station) {
            return Err(MaterialError::empty(station));
        }
        if !slots.contains_key(into) {
            return Err(MaterialError::empty(into));
        }
        let component = slots.shift_remove(station).ok_or_else(|| MaterialError::empty(station))?;
        let assembly = slots.get_mut(into).ok_or_else(|| MaterialError::empty(into))?;
        assembly.components.push(component);
        let assembly = assembly.clone();
        drop(slots);
        self.publish(MaterialEventKind::Bind, into, &assembly);
        Ok(assembly)
    }

    fn unbind(&self, station: &str, to: &str) -> Result<Workpiece, MaterialError> {
        self.ensure_known(station)?;
        self.ensure_known(to)?;
        let mut slots = self.slots();
        Self::ensure_free(&slots, to)?;
        let assembly = slots.get_mut(station).ok_or_else(|| MaterialError::empty(station))?;
        let component = assembly.components.pop().ok_or_else(|| MaterialError::NoComponents {
            id: assembly.id.clone(),
        })?;
        slots.insert(to.to_string(), component.clone());
        drop(slots);
        self.publish(MaterialEventKind::Unbind, to, &component);
        Ok(component)
    }

    fn check_state(&self, station: &str, class: Option<&str>) -> bool {
        self.slots()
            .get(station)
            .is_some_and(|workpiece| class.is_none_or(|class| workpiece.class == class))
    }

    fn material_at(&self, station: &str) -> Option<Workpiece> {
        self.slots().get(station).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<MaterialEvent> {
        self.events.subscribe()
    }
}

//! Material lifecycle events published by workpiece tables.
//!
//! These are distinct from the step trace: a digital twin or material log
//! subscribes to them to follow parts as they move through the cell.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked workpiece.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workpiece {
    /// Unique identifier assigned at spawn.
    pub id: String,
    /// Material class, e.g. `blank` or `machined`.
    pub class: String,
    /// Workpieces bound into this one, in binding order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Workpiece>,
}

impl Workpiece {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            components: Vec::new(),
        }
    }
}

/// What happened to a workpiece.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MaterialEventKind {
    Spawn,
    Transform,
    Consume,
    Attach,
    Detach,
    Bind,
    Unbind,
}

/// One material lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialEvent {
    pub kind: MaterialEventKind,
    /// Name of the workpiece table that emitted the event.
    pub table: String,
    /// Location the event refers to (the destination for transfers).
    pub station: String,
    /// Workpiece state after the event (before removal for `Consume`).
    pub material: Workpiece,
    pub at: DateTime<Utc>,
}

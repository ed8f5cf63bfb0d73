//! Live, observable game state fed by validated patches.

use crate::error::SinkError;
use crate::patch::Patch;
use crate::sink::StateSink;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StateSnapshot {
    /// Number of patches merged since the last reset.
    pub rev: u64,
    pub fields: BTreeMap<String, Value>,
}

/// Clonable handle to the current state. Observers hold a
/// [`watch::Receiver`] and see every merge as a new revision.
#[derive(Debug, Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<StateSnapshot>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StateSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Writes every entry of `patch` and returns the new revision.
    pub fn merge(&self, patch: Patch) -> u64 {
        let mut rev = 0;
        self.tx.send_modify(|snapshot| {
            for (field, value) in patch {
                snapshot.fields.insert(field, value);
            }
            snapshot.rev = snapshot.rev.wrapping_add(1);
            rev = snapshot.rev;
        });
        rev
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.tx.borrow().clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.tx.borrow().fields.get(field).cloned()
    }

    pub fn rev(&self) -> u64 {
        self.tx.borrow().rev
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.tx.subscribe()
    }

    /// Drops all fields, e.g. when leaving a game session.
    pub fn reset(&self) {
        self.tx.send_replace(StateSnapshot::default());
    }
}

impl StateSink for StateStore {
    fn apply(&self, patch: Patch) -> Result<(), SinkError> {
        self.merge(patch);
        Ok(())
    }
}

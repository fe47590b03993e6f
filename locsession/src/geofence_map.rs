//! Geofence client-id ↔ engine-id mapping.
//!
//! Callers address geofences by the client id handed out when they were
//! added. The engine assigns its own ids in the add response, and every
//! later request (remove, pause, resume, modify) and every breach report
//! uses the engine id. This table translates between the two:
//!
//! ```text
//! client_id  ──►  GeofenceEntry { engine_id, spec, paused }
//! engine_id  ──►  client_id
//! ```
//!
//! An entry exists from the acknowledged add until a remove succeeds or an
//! operation on it fails. The table has a fixed capacity; inserting past it
//! is refused rather than evicting anything.

use std::collections::HashMap;

use thiserror::Error;

use crate::protocol::types::{GeofenceOptions, GeofenceSpec};

/// Mapping table failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("geofence table full (capacity {capacity})")]
    Full { capacity: usize },
}

/// What the table knows about one geofence.
#[derive(Clone, Debug, PartialEq)]
pub struct GeofenceEntry {
    pub engine_id: u32,
    /// Options and area, kept so the geofence can be re-added after an
    /// engine restart.
    pub spec: GeofenceSpec,
    pub paused: bool,
}

/// Bounded client-id ↔ engine-id table.
#[derive(Clone, Debug)]
pub struct GeofenceMapping {
    capacity: usize,
    by_client: HashMap<u32, GeofenceEntry>,
    by_engine: HashMap<u32, u32>,
}

impl GeofenceMapping {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_client: HashMap::new(),
            by_engine: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    /// Free slots left.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Records an acknowledged add.
    ///
    /// Re-inserting an existing client id replaces its engine id (used when
    /// geofences are re-added after an engine restart).
    pub fn insert(
        &mut self,
        client_id: u32,
        engine_id: u32,
        spec: GeofenceSpec,
    ) -> Result<(), MappingError> {
        if let Some(old) = self.by_client.get(&client_id) {
            self.by_engine.remove(&old.engine_id);
        } else if self.by_client.len() >= self.capacity {
            return Err(MappingError::Full {
                capacity: self.capacity,
            });
        }
        self.by_engine.insert(engine_id, client_id);
        self.by_client.insert(
            client_id,
            GeofenceEntry {
                engine_id,
                spec,
                paused: false,
            },
        );
        Ok(())
    }

    pub fn get(&self, client_id: u32) -> Option<&GeofenceEntry> {
        self.by_client.get(&client_id)
    }

    pub fn engine_id(&self, client_id: u32) -> Option<u32> {
        self.by_client.get(&client_id).map(|e| e.engine_id)
    }

    pub fn client_id(&self, engine_id: u32) -> Option<u32> {
        self.by_engine.get(&engine_id).copied()
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.by_client.contains_key(&client_id)
    }

    /// Engine ids for `client_ids`, in order, or the first unknown client id.
    pub fn engine_ids(&self, client_ids: &[u32]) -> Result<Vec<u32>, u32> {
        client_ids
            .iter()
            .map(|id| self.engine_id(*id).ok_or(*id))
            .collect()
    }

    /// Erases a geofence. Unknown ids are ignored.
    pub fn remove(&mut self, client_id: u32) -> Option<GeofenceEntry> {
        let entry = self.by_client.remove(&client_id)?;
        self.by_engine.remove(&entry.engine_id);
        Some(entry)
    }

    pub fn set_paused(&mut self, client_id: u32, paused: bool) {
        if let Some(entry) = self.by_client.get_mut(&client_id) {
            entry.paused = paused;
        }
    }

    pub fn set_options(&mut self, client_id: u32, options: GeofenceOptions) {
        if let Some(entry) = self.by_client.get_mut(&client_id) {
            entry.spec.options = options;
        }
    }

    /// Client ids in ascending order.
    pub fn client_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.by_client.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every entry, returning them in ascending client-id order.
    pub fn drain(&mut self) -> Vec<(u32, GeofenceEntry)> {
        self.by_engine.clear();
        let mut entries: Vec<(u32, GeofenceEntry)> = self.by_client.drain().collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }
}

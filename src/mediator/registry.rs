//! Connection Registry: established connections keyed by connection ID.
//!
//! # Design Decisions
//! - `DashMap` so many connection tasks insert and remove concurrently
//! - At most one entry per live connection; a second insert is refused
//! - Entries are `Arc` so fan-out can clone them out of the map and run
//!   handler callbacks without holding a shard lock

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::app::Handler;
use crate::net::{ConnectionId, WsConnection};

/// An established connection with its negotiated codec and owning handler.
#[derive(Clone)]
pub struct Upgraded {
    pub connection: WsConnection,
    pub handler: Arc<dyn Handler>,
    pub sub_protocols: Vec<String>,
}

impl std::fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgraded")
            .field("connection_id", &self.connection.id())
            .field("version", &self.connection.version())
            .field("sub_protocols", &self.sub_protocols)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, Arc<Upgraded>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an established connection. Returns false if one is already
    /// recorded for this ID.
    pub fn insert(&self, upgraded: Upgraded) -> bool {
        match self.entries.entry(upgraded.connection.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(upgraded));
                true
            }
        }
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Upgraded>> {
        self.entries.remove(&id).map(|(_, upgraded)| upgraded)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Upgraded>> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }
}

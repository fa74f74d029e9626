//! Channel membership

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parley_core::ConnectionId;

/// A room whose members are told about each other.
///
/// Only membership is tracked; iteration order is unspecified.
#[derive(Debug)]
pub struct Channel<H> {
    members: HashMap<ConnectionId, H>,
}

impl<H> Channel<H> {
    /// Create an empty channel
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Add a member. Returns false if it was already present.
    pub fn insert(&mut self, id: ConnectionId, handle: H) -> bool {
        match self.members.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Remove a member, returning its handle
    pub fn remove(&mut self, id: &ConnectionId) -> Option<H> {
        self.members.remove(id)
    }

    /// Get all member IDs
    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.keys().cloned().collect()
    }

    /// Iterate members with their handles
    pub fn members(&self) -> impl Iterator<Item = (&ConnectionId, &H)> {
        self.members.iter()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<H> Default for Channel<H> {
    fn default() -> Self {
        Self::new()
    }
}

//! Connection registry
//!
//! Canonical record of every live connection: its outbound handle and the
//! channels it has joined. Only the relay mutates channel sets.

use std::collections::{HashMap, HashSet};

use parley_core::{ChannelId, ConnectionId};

use crate::RelayError;

/// One live connection
#[derive(Debug)]
pub struct Connection<H> {
    handle: H,
    channels: HashSet<ChannelId>,
}

impl<H> Connection<H> {
    fn new(handle: H) -> Self {
        Self {
            handle,
            channels: HashSet::new(),
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Channels this connection belongs to
    pub fn channels(&self) -> &HashSet<ChannelId> {
        &self.channels
    }
}

/// Map of connection id to connection
#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    connections: HashMap<ConnectionId, Connection<H>>,
}

impl<H> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Insert a new connection with no channels.
    ///
    /// A duplicate id means the transport handed out the same id twice.
    pub fn register(&mut self, id: ConnectionId, handle: H) -> Result<(), RelayError> {
        if self.connections.contains_key(&id) {
            return Err(RelayError::DuplicateConnection(id));
        }
        self.connections.insert(id, Connection::new(handle));
        Ok(())
    }

    /// Resolve a connection's handle. `None` means the peer is gone.
    pub fn lookup(&self, id: &ConnectionId) -> Option<&H> {
        self.connections.get(id).map(|c| &c.handle)
    }

    /// Remove a connection. Does not touch channel membership.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Connection<H>> {
        self.connections.remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Channels a connection belongs to (empty if unknown)
    pub fn channels_of(&self, id: &ConnectionId) -> Vec<ChannelId> {
        self.connections
            .get(id)
            .map(|c| c.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_joined(&self, id: &ConnectionId, channel: &ChannelId) -> bool {
        self.connections
            .get(id)
            .is_some_and(|c| c.channels.contains(channel))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Record membership on the connection side. Returns false if unknown.
    pub(crate) fn add_channel(&mut self, id: &ConnectionId, channel: ChannelId) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.channels.insert(channel);
                true
            }
            None => false,
        }
    }

    /// Drop membership on the connection side. Returns true if it was present.
    pub(crate) fn remove_channel(&mut self, id: &ConnectionId, channel: &ChannelId) -> bool {
        self.connections
            .get_mut(id)
            .is_some_and(|c| c.channels.remove(channel))
    }
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

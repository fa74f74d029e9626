//! Channel relay
//!
//! Owns the connection registry and the channel map and implements the
//! join/part/relay protocol on top of them. Every operation runs to
//! completion against `&mut self`; callers serialize access (the server keeps
//! one relay behind a mutex).
//!
//! # Offer roles
//!
//! When a connection joins a channel with N members, each existing member
//! gets `addPeer { should_create_offer: false }` naming the joiner and the
//! joiner gets N `addPeer { should_create_offer: true }`, one per member.
//! Exactly one side of every pair creates the offer.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use parley_core::{ChannelId, ConnectionId, ServerEvent};

use crate::channel::Channel;
use crate::registry::ConnectionRegistry;

/// Send side of a connection. Delivery is fire-and-forget.
pub trait PeerHandle {
    fn send(&self, event: ServerEvent);
}

/// Outbound queue drained by a connection's writer task
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

impl PeerHandle for Outbox {
    fn send(&self, event: ServerEvent) {
        // A closed queue means the connection is already shutting down
        let _ = mpsc::UnboundedSender::send(self, event);
    }
}

/// Relay errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// Registry plus channels
#[derive(Debug)]
pub struct ChannelRelay<H> {
    registry: ConnectionRegistry<H>,
    channels: HashMap<ChannelId, Channel<H>>,
    /// Channel records normally outlive their last member
    prune_empty_channels: bool,
}

impl<H: PeerHandle + Clone> ChannelRelay<H> {
    pub fn new() -> Self {
        Self::with_pruning(false)
    }

    /// Create a relay that drops a channel record when its last member parts
    pub fn with_pruning(prune_empty_channels: bool) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            channels: HashMap::new(),
            prune_empty_channels,
        }
    }

    /// Register a new connection
    pub fn connect(&mut self, id: ConnectionId, handle: H) -> Result<(), RelayError> {
        self.registry.register(id, handle)
    }

    /// Join a channel.
    ///
    /// Returns `Ok(false)` if the connection was already a member.
    pub fn join(&mut self, id: &ConnectionId, channel: ChannelId) -> Result<bool, RelayError> {
        let handle = self
            .registry
            .lookup(id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownConnection(id.clone()))?;

        if self.registry.is_joined(id, &channel) {
            return Ok(false);
        }

        let members = self.channels.entry(channel.clone()).or_default();

        // Fan out against the pre-join membership
        for (peer_id, peer) in members.members() {
            peer.send(ServerEvent::AddPeer {
                peer_id: id.clone(),
                should_create_offer: false,
            });
            handle.send(ServerEvent::AddPeer {
                peer_id: peer_id.clone(),
                should_create_offer: true,
            });
        }

        debug!(
            "{} joined {} ({} existing members)",
            id,
            channel,
            members.len()
        );
        members.insert(id.clone(), handle);
        self.registry.add_channel(id, channel);
        Ok(true)
    }

    /// Leave a channel.
    ///
    /// Returns false if the connection was not a member.
    pub fn part(&mut self, id: &ConnectionId, channel: &ChannelId) -> bool {
        if !self.registry.remove_channel(id, channel) {
            return false;
        }

        let Some(members) = self.channels.get_mut(channel) else {
            return true;
        };
        members.remove(id);

        let departing = self.registry.lookup(id);
        for (peer_id, peer) in members.members() {
            peer.send(ServerEvent::RemovePeer {
                peer_id: id.clone(),
            });
            if let Some(departing) = departing {
                departing.send(ServerEvent::RemovePeer {
                    peer_id: peer_id.clone(),
                });
            }
        }

        debug!("{} left {} ({} remaining)", id, channel, members.len());

        if self.prune_empty_channels && members.is_empty() {
            self.channels.remove(channel);
            debug!("Channel {} removed (empty)", channel);
        }
        true
    }

    /// Leave every channel, then drop the connection.
    ///
    /// Returns false if the connection was not registered.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        if !self.registry.contains(id) {
            return false;
        }

        for channel in self.registry.channels_of(id) {
            self.part(id, &channel);
        }

        self.registry.unregister(id);
        true
    }

    /// Forward an ICE candidate. Returns false if the target is gone.
    pub fn relay_ice_candidate(
        &self,
        from: &ConnectionId,
        to: &ConnectionId,
        ice_candidate: Value,
    ) -> bool {
        self.route(
            to,
            ServerEvent::IceCandidate {
                peer_id: from.clone(),
                ice_candidate,
            },
        )
    }

    /// Forward a session description. Returns false if the target is gone.
    pub fn relay_session_description(
        &self,
        from: &ConnectionId,
        to: &ConnectionId,
        session_description: Value,
    ) -> bool {
        self.route(
            to,
            ServerEvent::SessionDescription {
                peer_id: from.clone(),
                session_description,
            },
        )
    }

    fn route(&self, to: &ConnectionId, event: ServerEvent) -> bool {
        match self.registry.lookup(to) {
            Some(handle) => {
                handle.send(event);
                true
            }
            None => false,
        }
    }
}

impl<H> ChannelRelay<H> {
    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of channel records, including empty ones
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Member IDs of a channel (empty if the channel does not exist)
    pub fn members(&self, channel: &ChannelId) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(Channel::member_ids)
            .unwrap_or_default()
    }

    /// Whether a channel record exists
    pub fn has_channel(&self, channel: &ChannelId) -> bool {
        self.channels.contains_key(channel)
    }
}

impl<H: PeerHandle + Clone> Default for ChannelRelay<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        id: ConnectionId,
        rx: UnboundedReceiver<ServerEvent>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn connect(relay: &mut ChannelRelay<Outbox>, id: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::from(id);
        relay.connect(id.clone(), tx).unwrap();
        Client { id, rx }
    }

    fn room(name: &str) -> ChannelId {
        ChannelId::new("localhost", name)
    }

    fn add_peer(id: &ConnectionId, should_create_offer: bool) -> ServerEvent {
        ServerEvent::AddPeer {
            peer_id: id.clone(),
            should_create_offer,
        }
    }

    fn remove_peer(id: &ConnectionId) -> ServerEvent {
        ServerEvent::RemovePeer {
            peer_id: id.clone(),
        }
    }

    /// Every channel member lists the channel and vice versa
    fn assert_consistent<H>(relay: &ChannelRelay<H>) {
        for (channel_id, channel) in &relay.channels {
            for member in channel.member_ids() {
                assert!(relay.registry.contains(&member), "dangling member {}", member);
                assert!(
                    relay.registry.is_joined(&member, channel_id),
                    "{} in {} but not in its channel set",
                    member,
                    channel_id
                );
            }
        }
        for id in relay.registry.ids() {
            for channel_id in relay.registry.channels_of(id) {
                let listed = relay
                    .channels
                    .get(&channel_id)
                    .is_some_and(|channel| channel.member_ids().contains(id));
                assert!(
                    listed,
                    "{} lists {} but is not a member",
                    id,
                    channel_id
                );
            }
        }
    }

    #[test]
    fn test_second_joiner_creates_offer() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");

        assert!(relay.join(&a.id, room("room1")).unwrap());
        assert!(a.drain().is_empty());

        assert!(relay.join(&b.id, room("room1")).unwrap());
        assert_eq!(a.drain(), vec![add_peer(&b.id, false)]);
        assert_eq!(b.drain(), vec![add_peer(&a.id, true)]);
        assert_consistent(&relay);
    }

    #[test]
    fn test_mesh_join_counts() {
        let mut relay = ChannelRelay::new();
        let mut clients: Vec<Client> = (0..5)
            .map(|i| connect(&mut relay, &format!("c{}", i)))
            .collect();

        let mut received: Vec<Vec<ServerEvent>> = vec![Vec::new(); clients.len()];
        for i in 0..clients.len() {
            let id = clients[i].id.clone();
            relay.join(&id, room("mesh")).unwrap();
            for (j, client) in clients.iter_mut().enumerate() {
                received[j].extend(client.drain());
            }
        }

        for (i, events) in received.iter().enumerate() {
            let offers: Vec<_> = events
                .iter()
                .filter(|e| matches!(e, ServerEvent::AddPeer { should_create_offer: true, .. }))
                .collect();
            let answers: Vec<_> = events
                .iter()
                .filter(|e| matches!(e, ServerEvent::AddPeer { should_create_offer: false, .. }))
                .collect();

            // One offer toward each earlier member, one answer per later joiner
            assert_eq!(offers.len(), i, "client {}", i);
            assert_eq!(answers.len(), clients.len() - 1 - i, "client {}", i);

            for later in &clients[i + 1..] {
                assert_eq!(
                    events.iter().filter(|e| **e == add_peer(&later.id, false)).count(),
                    1
                );
            }
        }
        assert_eq!(relay.members(&room("mesh")).len(), 5);
        assert_consistent(&relay);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");

        relay.join(&a.id, room("room1")).unwrap();
        relay.join(&b.id, room("room1")).unwrap();
        a.drain();
        b.drain();

        assert!(!relay.join(&b.id, room("room1")).unwrap());
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert_eq!(relay.members(&room("room1")).len(), 2);
    }

    #[test]
    fn test_join_unknown_connection() {
        let mut relay: ChannelRelay<Outbox> = ChannelRelay::new();
        let err = relay.join(&"ghost".into(), room("room1")).unwrap_err();
        assert_eq!(err, RelayError::UnknownConnection("ghost".into()));
        assert!(!relay.has_channel(&room("room1")));
    }

    #[test]
    fn test_duplicate_connect() {
        let mut relay = ChannelRelay::new();
        let _a = connect(&mut relay, "a");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            relay.connect("a".into(), tx),
            Err(RelayError::DuplicateConnection("a".into()))
        );
    }

    #[test]
    fn test_part_notifies_both_sides() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        let mut c = connect(&mut relay, "c");
        for client in [&a, &b, &c] {
            relay.join(&client.id, room("room1")).unwrap();
        }
        a.drain();
        b.drain();
        c.drain();

        assert!(relay.part(&a.id, &room("room1")));

        assert_eq!(b.drain(), vec![remove_peer(&a.id)]);
        assert_eq!(c.drain(), vec![remove_peer(&a.id)]);
        let mut to_a = a.drain();
        to_a.sort_by_key(|e| format!("{:?}", e));
        assert_eq!(to_a, vec![remove_peer(&b.id), remove_peer(&c.id)]);

        // Second part is a no-op
        assert!(!relay.part(&a.id, &room("room1")));
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert_consistent(&relay);
    }

    #[test]
    fn test_rejoin_after_part() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        relay.join(&a.id, room("room1")).unwrap();
        relay.join(&b.id, room("room1")).unwrap();
        relay.part(&b.id, &room("room1"));
        a.drain();
        b.drain();

        assert!(relay.join(&b.id, room("room1")).unwrap());
        assert_eq!(a.drain(), vec![add_peer(&b.id, false)]);
        assert_eq!(b.drain(), vec![add_peer(&a.id, true)]);
    }

    #[test]
    fn test_disconnect_cleans_up() {
        let mut relay = ChannelRelay::new();
        let a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        relay.join(&a.id, room("room1")).unwrap();
        relay.join(&b.id, room("room1")).unwrap();
        b.drain();

        assert!(relay.disconnect(&a.id));

        assert_eq!(b.drain(), vec![remove_peer(&a.id)]);
        assert!(!relay.is_registered(&a.id));
        assert_eq!(relay.members(&room("room1")), vec![b.id.clone()]);
        assert_consistent(&relay);

        // Already gone
        assert!(!relay.disconnect(&a.id));
        assert!(b.drain().is_empty());
    }

    #[test]
    fn test_part_then_disconnect_sends_one_removal() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        relay.join(&a.id, room("room1")).unwrap();
        relay.join(&b.id, room("room1")).unwrap();
        a.drain();
        b.drain();

        assert!(relay.part(&a.id, &room("room1")));
        assert!(relay.disconnect(&a.id));

        assert_eq!(b.drain(), vec![remove_peer(&a.id)]);
        assert_eq!(a.drain(), vec![remove_peer(&b.id)]);
        assert_eq!(relay.members(&room("room1")), vec![b.id.clone()]);
        assert_consistent(&relay);
    }

    #[test]
    fn test_disconnect_leaves_every_channel() {
        let mut relay = ChannelRelay::new();
        let a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        let mut c = connect(&mut relay, "c");

        relay.join(&a.id, room("one")).unwrap();
        relay.join(&a.id, room("two")).unwrap();
        relay.join(&b.id, room("one")).unwrap();
        relay.join(&c.id, room("two")).unwrap();
        b.drain();
        c.drain();

        relay.disconnect(&a.id);

        assert_eq!(b.drain(), vec![remove_peer(&a.id)]);
        assert_eq!(c.drain(), vec![remove_peer(&a.id)]);
        assert!(!relay.members(&room("one")).contains(&a.id));
        assert!(!relay.members(&room("two")).contains(&a.id));
        assert_eq!(relay.connection_count(), 2);
        assert_consistent(&relay);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");

        relay.join(&a.id, ChannelId::new("one.example", "room1")).unwrap();
        relay.join(&b.id, ChannelId::new("two.example", "room1")).unwrap();

        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert_eq!(relay.channel_count(), 2);
    }

    #[test]
    fn test_empty_channel_retained_by_default() {
        let mut relay = ChannelRelay::new();
        let a = connect(&mut relay, "a");
        relay.join(&a.id, room("room1")).unwrap();
        relay.disconnect(&a.id);

        assert!(relay.has_channel(&room("room1")));
        assert!(relay.members(&room("room1")).is_empty());
    }

    #[test]
    fn test_empty_channel_pruned_when_enabled() {
        let mut relay = ChannelRelay::with_pruning(true);
        let a = connect(&mut relay, "a");
        let b = connect(&mut relay, "b");
        relay.join(&a.id, room("room1")).unwrap();
        relay.join(&b.id, room("room1")).unwrap();

        relay.part(&a.id, &room("room1"));
        assert!(relay.has_channel(&room("room1")));

        relay.disconnect(&b.id);
        assert!(!relay.has_channel(&room("room1")));
        assert_eq!(relay.channel_count(), 0);
    }

    #[test]
    fn test_relay_ice_candidate() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        let candidate = json!({"candidate": "candidate:0 1 UDP 2122252543 192.0.2.4 61665 typ host", "sdpMid": "0"});

        assert!(relay.relay_ice_candidate(&a.id, &b.id, candidate.clone()));
        assert_eq!(
            b.drain(),
            vec![ServerEvent::IceCandidate {
                peer_id: a.id.clone(),
                ice_candidate: candidate,
            }]
        );
        assert!(a.drain().is_empty());
    }

    #[test]
    fn test_relay_session_description() {
        let mut relay = ChannelRelay::new();
        let a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");
        let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n"});

        assert!(relay.relay_session_description(&a.id, &b.id, offer.clone()));
        assert_eq!(
            b.drain(),
            vec![ServerEvent::SessionDescription {
                peer_id: a.id.clone(),
                session_description: offer,
            }]
        );
    }

    #[test]
    fn test_relay_to_missing_peer_is_dropped() {
        let mut relay = ChannelRelay::new();
        let mut a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");

        assert!(!relay.relay_ice_candidate(&a.id, &"z".into(), json!({})));
        assert!(!relay.relay_session_description(&a.id, &"z".into(), json!({})));

        // Departed peer
        relay.disconnect(&b.id);
        assert!(!relay.relay_ice_candidate(&a.id, &b.id, json!({})));

        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[test]
    fn test_relay_does_not_require_shared_channel() {
        let mut relay = ChannelRelay::new();
        let a = connect(&mut relay, "a");
        let mut b = connect(&mut relay, "b");

        assert!(relay.relay_ice_candidate(&a.id, &b.id, json!("opaque")));
        assert_eq!(b.drain().len(), 1);
    }

    #[test]
    fn test_closed_outbox_is_ignored() {
        let mut relay = ChannelRelay::new();
        let a = connect(&mut relay, "a");
        let b = connect(&mut relay, "b");
        drop(b.rx);

        relay.join(&a.id, room("room1")).unwrap();
        relay.join(&b.id, room("room1")).unwrap();
        assert!(relay.relay_ice_candidate(&a.id, &b.id, json!({})));
        assert!(relay.disconnect(&b.id));
    }

    #[test]
    fn test_interleaved_operations_stay_consistent() {
        let mut relay = ChannelRelay::new();
        let clients: Vec<Client> = (0..4)
            .map(|i| connect(&mut relay, &format!("c{}", i)))
            .collect();
        let rooms = [room("r0"), room("r1"), room("r2")];

        for step in 0..60usize {
            let client = &clients[step % clients.len()];
            let channel = &rooms[(step / 2) % rooms.len()];
            match step % 3 {
                0 | 1 => {
                    relay.join(&client.id, channel.clone()).unwrap();
                }
                _ => {
                    relay.part(&client.id, channel);
                }
            }
            assert_consistent(&relay);
        }

        for client in &clients {
            relay.disconnect(&client.id);
        }
        assert_consistent(&relay);
        assert_eq!(relay.connection_count(), 0);
        for channel in &rooms {
            assert!(relay.members(channel).is_empty());
        }
    }
}

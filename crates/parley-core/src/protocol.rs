//! Signaling protocol messages
//!
//! Every WebSocket text frame carries one JSON object whose `type` field
//! names the event. ICE candidates and session descriptions are opaque JSON
//! values: the relay forwards them without looking inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::ConnectionId;

/// Events sent by a client to the relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Join a room
    #[serde(rename = "join")]
    Join { channel: String },

    /// Leave a room
    #[serde(rename = "part")]
    Part { channel: String },

    /// Forward an ICE candidate to a peer
    #[serde(rename = "relayICECandidate")]
    RelayIceCandidate {
        peer_id: ConnectionId,
        ice_candidate: Value,
    },

    /// Forward an SDP offer or answer to a peer
    #[serde(rename = "relaySessionDescription")]
    RelaySessionDescription {
        peer_id: ConnectionId,
        session_description: Value,
    },
}

/// Events sent by the relay to a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A peer shares a room with you.
    ///
    /// Exactly one side of every pair gets `should_create_offer: true`.
    #[serde(rename = "addPeer")]
    AddPeer {
        peer_id: ConnectionId,
        should_create_offer: bool,
    },

    /// A peer no longer shares a room with you
    #[serde(rename = "removePeer")]
    RemovePeer { peer_id: ConnectionId },

    /// ICE candidate relayed from `peer_id`
    #[serde(rename = "iceCandidate")]
    IceCandidate {
        peer_id: ConnectionId,
        ice_candidate: Value,
    },

    /// Session description relayed from `peer_id`
    #[serde(rename = "sessionDescription")]
    SessionDescription {
        peer_id: ConnectionId,
        session_description: Value,
    },
}

impl ClientEvent {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::Part { .. } => "part",
            ClientEvent::RelayIceCandidate { .. } => "relayICECandidate",
            ClientEvent::RelaySessionDescription { .. } => "relaySessionDescription",
        }
    }
}

impl ServerEvent {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

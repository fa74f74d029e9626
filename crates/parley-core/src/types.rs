//! Identifier types for Parley
//!
//! Connections and channels are the only two things the relay keys on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of random bytes in a connection identifier
const CONNECTION_ID_BYTES: usize = 8;

/// Process-unique identifier of one live transport connection.
///
/// This is the `peer_id` clients see on the wire.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh random identifier (16 hex chars)
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; CONNECTION_ID_BYTES];
        getrandom::fill(&mut bytes)?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a channel (room).
///
/// A room name only means something together with the transport scope it was
/// requested under, so the same room name on two hosts names two channels.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ChannelId {
    scope: String,
    room: String,
}

impl ChannelId {
    pub fn new(scope: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            room: room.into(),
        }
    }

    /// Build a channel key from a handshake `Host` header and a room name.
    ///
    /// The port is not part of the scope: `example.com:3000` and
    /// `example.com` share channels.
    pub fn scoped(host_header: &str, room: impl Into<String>) -> Self {
        Self::new(host_scope(host_header), room)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.room)
    }
}

/// Strip the `:port` suffix from a `Host` header value
pub fn host_scope(host_header: &str) -> &str {
    let host = host_header.trim();
    // Bracketed IPv6 literal, e.g. `[::1]:3000`
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &host[..end + 2];
        }
    }
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_connection_id_generation() {
        let a = ConnectionId::generate().unwrap();
        let b = ConnectionId::generate().unwrap();

        assert_eq!(a.as_str().len(), 16); // 8 bytes = 16 hex chars
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_connection_id_is_plain_string_on_wire() {
        let id = ConnectionId::from("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc123""#);

        let parsed: ConnectionId = serde_json::from_str(r#""abc123""#).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_host_scope_strips_port() {
        assert_eq!(host_scope("example.com:3000"), "example.com");
        assert_eq!(host_scope("example.com"), "example.com");
        assert_eq!(host_scope("127.0.0.1:8080"), "127.0.0.1");
        assert_eq!(host_scope("[::1]:3000"), "[::1]");
        assert_eq!(host_scope(""), "");
    }

    #[test]
    fn test_channel_scoping() {
        let a = ChannelId::scoped("a.example:3000", "room1");
        let b = ChannelId::scoped("a.example", "room1");
        let c = ChannelId::scoped("b.example", "room1");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.scope(), "a.example");
        assert_eq!(a.room(), "room1");
        assert_eq!(a.to_string(), "a.example/room1");
    }

    #[test]
    fn test_channel_scope_is_not_concatenation() {
        // "ab" + "c" and "a" + "bc" must stay distinct channels
        let mut set = HashSet::new();
        set.insert(ChannelId::new("ab", "c"));
        set.insert(ChannelId::new("a", "bc"));
        assert_eq!(set.len(), 2);
    }
}

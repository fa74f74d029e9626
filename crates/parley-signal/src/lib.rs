//! Parley Signal Server
//!
//! WebRTC signaling relay. Browsers connect over WebSocket, join rooms
//! ("channels") and use the relay to find each other and swap the offers,
//! answers and ICE candidates needed for a direct peer-to-peer connection.
//! Media never passes through here.
//!
//! # Protocol
//!
//! 1. Client connects and is assigned a connection id
//! 2. Client sends `join`; it and every existing member get `addPeer`
//! 3. The joiner creates offers, existing members answer
//! 4. Offers, answers and candidates travel via `relay*` events
//! 5. On `part` or disconnect, the remaining members get `removePeer`

pub mod channel;
pub mod credentials;
pub mod http;
pub mod registry;
pub mod relay;
pub mod server;

pub use channel::Channel;
pub use credentials::{CredentialCache, CredentialError, CredentialSource};
pub use registry::ConnectionRegistry;
pub use relay::{ChannelRelay, Outbox, PeerHandle, RelayError};
pub use server::SignalServer;

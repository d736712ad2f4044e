//! Transport abstraction
//!
//! The [`Transport`] trait abstracts the peer-to-peer substrate that
//! performs topic-based rendezvous and delivers reliable byte streams.
//! Connection discovery, hole punching, and stream management live behind
//! this trait; the protocol layer only sees connection events and bytes.
//!
//! ## Implementations
//!
//! - [`MemTransport`](crate::mem_transport::MemTransport): in-process
//!   channel-backed transport for tests and simulation

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::identity::PeerId;
use crate::room::RoomId;

/// A rendezvous topic on the discovery layer
///
/// Peers that join the same topic discover each other without prior
/// contact. Room identifiers map directly onto topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(pub [u8; 32]);

impl Topic {
    /// Create a topic from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<RoomId> for Topic {
    fn from(id: RoomId) -> Self {
        Self(*id.as_bytes())
    }
}

/// Options for joining a rendezvous topic
#[derive(Debug, Clone, Copy)]
pub struct JoinOpts {
    /// Accept inbound connections from topic members
    pub server: bool,
    /// Dial out to topic members
    pub client: bool,
}

impl Default for JoinOpts {
    fn default() -> Self {
        Self {
            server: true,
            client: true,
        }
    }
}

impl JoinOpts {
    /// Server-only join (announce, accept inbound)
    pub fn server() -> Self {
        Self {
            server: true,
            client: false,
        }
    }

    /// Client-only join (lookup, dial out)
    pub fn client() -> Self {
        Self {
            server: false,
            client: true,
        }
    }
}

/// Connection-level events surfaced by a transport
///
/// Events for one peer are delivered in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new connection was established
    PeerConnected { peer: PeerId },
    /// Bytes arrived on a peer's stream
    Data { peer: PeerId, payload: Bytes },
    /// A connection closed cleanly
    PeerClosed { peer: PeerId },
    /// A connection failed
    PeerError { peer: PeerId, reason: String },
}

impl TransportEvent {
    /// The peer this event concerns
    pub fn peer(&self) -> PeerId {
        match self {
            Self::PeerConnected { peer }
            | Self::Data { peer, .. }
            | Self::PeerClosed { peer }
            | Self::PeerError { peer, .. } => *peer,
        }
    }
}

/// Transport trait for the peer-to-peer substrate
///
/// Implementations own connection establishment and teardown; consumers
/// drive the protocol from the event stream and send raw bytes back.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Our stable peer identifier on this transport
    fn local_id(&self) -> PeerId;

    /// Join a rendezvous topic
    ///
    /// Joining is re-entrant: calling again for an already-joined topic
    /// connects to any members discovered since, without duplicating
    /// existing connections.
    async fn join(&self, topic: Topic, opts: JoinOpts) -> Result<(), TransportError>;

    /// Leave a rendezvous topic (existing connections stay up)
    async fn leave(&self, topic: Topic) -> Result<(), TransportError>;

    /// Send bytes on a peer's stream
    ///
    /// Fails locally if the peer disconnected mid-write; the failure never
    /// affects other peers' streams.
    async fn send(&self, peer: &PeerId, data: Bytes) -> Result<(), TransportError>;

    /// Wait for the next connection-level event
    ///
    /// Returns `None` once the transport has shut down.
    async fn next_event(&self) -> Option<TransportEvent>;

    /// Check whether a live connection to the peer exists
    fn is_connected(&self, peer: &PeerId) -> bool;

    /// All currently connected peers
    fn connected_peers(&self) -> Vec<PeerId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_from_room() {
        let room = RoomId::new([0x07; 32]);
        let topic = Topic::from(room);
        assert_eq!(topic.as_bytes(), room.as_bytes());
    }

    #[test]
    fn test_event_peer_accessor() {
        let peer = PeerId::generate();
        let event = TransportEvent::Data {
            peer,
            payload: Bytes::from_static(b"x"),
        };
        assert_eq!(event.peer(), peer);
    }
}

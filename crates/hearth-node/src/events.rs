//! Node events surfaced to the application layer

use hearth_core::{PeerId, RoomId, StoredMessage};

/// Events a [`HearthNode`](crate::HearthNode) broadcasts to subscribers
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A root peer announced itself on one of our connections
    RootAvailable { peer: PeerId },

    /// The root peer's connection went away
    RootUnavailable,

    /// A peer registered interest in a room (root role only)
    RoomRegistered { room_id: RoomId, peer: PeerId },

    /// A new message for a joined room, live or via sync
    ///
    /// `plaintext` is present when this node holds the room key and the
    /// ciphertext decrypted cleanly. `sync_origin` distinguishes history
    /// catch-up from live traffic.
    MessageReceived {
        room_id: RoomId,
        message: StoredMessage,
        plaintext: Option<Vec<u8>>,
        sync_origin: bool,
    },

    /// A peer shared its public key for the encryption bootstrap
    PeerKeyReceived {
        peer: PeerId,
        public_key: [u8; 32],
        display_name: String,
    },

    /// A peer's connection closed or failed
    PeerDisconnected { peer: PeerId },
}

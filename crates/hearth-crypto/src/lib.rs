//! # Hearth Crypto
//!
//! Room key derivation and message encryption.
//!
//! Possession of a room's shared secret is the only access control: both
//! the room identifier (used for rendezvous and log isolation) and the
//! symmetric room key are derived deterministically from it, and the
//! secret itself never goes on the wire. The root peer only ever sees the
//! derived identifier and opaque ciphertext.
//!
//! ## Key Types
//!
//! - [`RoomSecret`]: the shared secret; derives [`RoomId`](hearth_core::RoomId) and [`RoomKey`]
//! - [`RoomKey`]: ChaCha20-Poly1305 key shared by room members
//! - [`PeerKeyPair`]: X25519 keypair for the peer-to-peer key bootstrap

pub mod error;
pub mod peer_key;
pub mod room_key;

pub use error::{CryptoError, CryptoResult};
pub use peer_key::PeerKeyPair;
pub use room_key::{NONCE_SIZE, RoomKey, RoomSecret, SECRET_SIZE};

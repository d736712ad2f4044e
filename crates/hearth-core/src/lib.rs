//! # Hearth Core
//!
//! Core types, protocol frames, and the transport abstraction for Hearth.
//!
//! Hearth is a relay-backed encrypted room chat: peers exchange ciphertext
//! directly while a root peer durably stores every room's messages in an
//! append-only log and serves history to reconnecting peers.
//!
//! ## Key Types
//!
//! - [`PeerId`]: Stable public identifier for a peer
//! - [`RoomId`]: Identifier for an isolated room (doubles as rendezvous topic)
//! - [`Frame`]: One typed protocol message on the wire
//! - [`Classified`]: Result of frame classification (frame vs. non-protocol bytes)
//! - [`Transport`]: Abstraction over the peer-to-peer byte transport

pub mod error;
pub mod frame;
pub mod identity;
pub mod mem_transport;
pub mod room;
pub mod transport;

// Re-export main types
pub use error::*;
pub use frame::*;
pub use identity::*;
pub use mem_transport::*;
pub use room::*;
pub use transport::*;

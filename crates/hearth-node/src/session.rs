//! Per-peer session tracking
//!
//! Tracks every live connection, the role each peer has proven, and which
//! rooms it registered. The root peer's availability is published on a
//! watch channel so waiters see role changes without polling.
//!
//! ## Key Types
//!
//! - [`PeerSessionTracker`]: registry of live connections
//! - [`PeerRole`]: per-connection role state machine

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use hearth_core::{PeerId, RoomId};

/// Role state of one connection
///
/// Every connection starts `Unknown`. The only transition to `Root` is a
/// recognized root announce frame; any other recognized protocol frame
/// settles the peer as `Ordinary`. Roles are never inferred from payload
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerRole {
    #[default]
    Unknown,
    Root,
    Ordinary,
}

/// State for one live connection
#[derive(Debug, Clone)]
pub struct PeerConnection {
    pub peer_id: PeerId,
    pub role: PeerRole,
    pub connected_at: DateTime<Utc>,
    /// Rooms this peer registered with us
    pub rooms: HashSet<RoomId>,
    /// Whether we already sent this peer our root announce
    pub announced: bool,
}

impl PeerConnection {
    fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            role: PeerRole::Unknown,
            connected_at: Utc::now(),
            rooms: HashSet::new(),
            announced: false,
        }
    }
}

/// Tracks live connections and the current root peer
pub struct PeerSessionTracker {
    connections: DashMap<PeerId, PeerConnection>,
    root_tx: watch::Sender<Option<PeerId>>,
    root_rx: watch::Receiver<Option<PeerId>>,
}

impl PeerSessionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        let (root_tx, root_rx) = watch::channel(None);
        Self {
            connections: DashMap::new(),
            root_tx,
            root_rx,
        }
    }

    /// Record a new connection; returns false if the peer was already tracked
    pub fn on_connected(&self, peer: PeerId) -> bool {
        if self.connections.contains_key(&peer) {
            return false;
        }
        debug!(peer = %peer.short(), "peer connected");
        self.connections.insert(peer, PeerConnection::new(peer));
        true
    }

    /// Drop a connection, returning its final state
    ///
    /// If the peer was the root, root availability flips to `None`.
    pub fn on_closed(&self, peer: &PeerId) -> Option<PeerConnection> {
        let (_, conn) = self.connections.remove(peer)?;
        if conn.role == PeerRole::Root {
            info!(peer = %peer.short(), "root peer disconnected");
            self.root_tx.send_replace(None);
        }
        Some(conn)
    }

    /// Promote a peer to root after its announce frame
    pub fn promote_to_root(&self, peer: PeerId) {
        if let Some(mut conn) = self.connections.get_mut(&peer) {
            conn.role = PeerRole::Root;
        }
        info!(peer = %peer.short(), "root peer available");
        self.root_tx.send_replace(Some(peer));
    }

    /// Settle an unknown peer as ordinary
    ///
    /// No-op once a role is established; a root never demotes itself by
    /// sending other frames.
    pub fn settle_ordinary(&self, peer: &PeerId) {
        if let Some(mut conn) = self.connections.get_mut(peer)
            && conn.role == PeerRole::Unknown
        {
            conn.role = PeerRole::Ordinary;
        }
    }

    /// The role a peer has proven so far
    pub fn role_of(&self, peer: &PeerId) -> PeerRole {
        self.connections
            .get(peer)
            .map(|c| c.role)
            .unwrap_or(PeerRole::Unknown)
    }

    /// Record that a peer registered a room with us
    pub fn add_room(&self, peer: &PeerId, room_id: RoomId) {
        if let Some(mut conn) = self.connections.get_mut(peer) {
            conn.rooms.insert(room_id);
        }
    }

    /// Record that we sent our root announce to a peer
    pub fn mark_announced(&self, peer: &PeerId) {
        if let Some(mut conn) = self.connections.get_mut(peer) {
            conn.announced = true;
        }
    }

    /// Whether a peer already received our root announce
    pub fn announced(&self, peer: &PeerId) -> bool {
        self.connections
            .get(peer)
            .map(|c| c.announced)
            .unwrap_or(false)
    }

    /// The currently-known root peer, if any
    pub fn root_peer(&self) -> Option<PeerId> {
        *self.root_rx.borrow()
    }

    /// Wait until a root peer is available, up to `timeout`
    ///
    /// Returns immediately if a root is already known.
    pub async fn wait_for_root(&self, timeout: Duration) -> Option<PeerId> {
        let mut rx = self.root_rx.clone();
        if let Some(peer) = *rx.borrow_and_update() {
            return Some(peer);
        }

        tokio::time::timeout(timeout, async move {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(peer) = *rx.borrow_and_update() {
                    return Some(peer);
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Whether a peer is currently tracked
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.connections.contains_key(peer)
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for PeerSessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

//! Room registry
//!
//! Maps room identifiers to their live state: the room's log handle,
//! activity metadata, and which connected peers registered it. Room
//! creation is idempotent and serialized, so a burst of registrations
//! for the same room opens exactly one log and joins its rendezvous
//! topic exactly once.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use hearth_core::{JoinOpts, PeerId, RoomId, Topic, Transport};
use hearth_log::{LogStore, RoomLog};

use crate::error::NodeResult;

#[derive(Debug)]
struct RoomMeta {
    message_count: u64,
    last_activity: DateTime<Utc>,
    peers: HashSet<PeerId>,
}

/// Live state of one known room
pub struct Room {
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    log: Arc<dyn RoomLog>,
    meta: RwLock<RoomMeta>,
}

impl Room {
    /// The room's log handle
    pub fn log(&self) -> Arc<dyn RoomLog> {
        self.log.clone()
    }

    /// Number of messages known to be in the log
    pub async fn message_count(&self) -> u64 {
        self.meta.read().await.message_count
    }

    /// When the room last saw a store or registration
    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.meta.read().await.last_activity
    }

    /// Connected peers registered in this room
    pub async fn peers(&self) -> Vec<PeerId> {
        self.meta.read().await.peers.iter().copied().collect()
    }
}

/// Registry of rooms this node knows about
///
/// On the root, a room exists here for every registration and restored
/// snapshot entry; on an ordinary peer, for every room it joined.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    store: Arc<dyn LogStore>,
    transport: Arc<dyn Transport>,
    /// Root nodes announce on each room's topic so members can find them
    join_topic_on_create: bool,
    create_lock: Mutex<()>,
}

impl RoomRegistry {
    /// Create a registry backed by `store`
    pub fn new(
        store: Arc<dyn LogStore>,
        transport: Arc<dyn Transport>,
        join_topic_on_create: bool,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
            transport,
            join_topic_on_create,
            create_lock: Mutex::new(()),
        }
    }

    /// Look up a known room
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Get or create a room, opening its log on first sight
    ///
    /// Safe to call repeatedly and concurrently for the same room.
    pub async fn get_or_create(&self, room_id: RoomId) -> NodeResult<Arc<Room>> {
        if let Some(room) = self.get(&room_id) {
            return Ok(room);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(room) = self.get(&room_id) {
            return Ok(room);
        }

        let log = self.store.open(room_id).await?;
        let message_count = log.len().await;

        if self.join_topic_on_create {
            self.transport
                .join(Topic::from(room_id), JoinOpts::server())
                .await?;
        }

        info!(room = %room_id.short(), messages = message_count, "room opened");
        let room = Arc::new(Room {
            room_id,
            created_at: Utc::now(),
            log,
            meta: RwLock::new(RoomMeta {
                message_count,
                last_activity: Utc::now(),
                peers: HashSet::new(),
            }),
        });
        self.rooms.insert(room_id, room.clone());
        Ok(room)
    }

    /// Associate a connected peer with a room
    pub async fn associate(&self, room_id: &RoomId, peer: PeerId) -> bool {
        match self.get(room_id) {
            Some(room) => {
                let newly = room.meta.write().await.peers.insert(peer);
                if newly {
                    debug!(room = %room_id.short(), peer = %peer.short(), "peer joined room");
                }
                newly
            }
            None => false,
        }
    }

    /// Remove a peer from every room it was associated with
    pub async fn disassociate(&self, peer: &PeerId) -> Vec<RoomId> {
        let mut left = Vec::new();
        for entry in self.rooms.iter() {
            let room = entry.value().clone();
            if room.meta.write().await.peers.remove(peer) {
                left.push(room.room_id);
            }
        }
        left
    }

    /// Refresh a room's activity metadata after a durable append
    pub async fn touch(&self, room_id: &RoomId) {
        if let Some(room) = self.get(room_id) {
            let count = room.log.len().await;
            let mut meta = room.meta.write().await;
            meta.message_count = count;
            meta.last_activity = Utc::now();
        }
    }

    /// All known room identifiers
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    /// Number of known rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Snapshot of per-room metadata for the persisted state file
    pub async fn snapshot(&self) -> Vec<(RoomId, u64, DateTime<Utc>, DateTime<Utc>)> {
        let mut out = Vec::with_capacity(self.rooms.len());
        for entry in self.rooms.iter() {
            let room = entry.value().clone();
            let meta = room.meta.read().await;
            out.push((
                room.room_id,
                meta.message_count,
                room.created_at,
                meta.last_activity,
            ));
        }
        out
    }
}

//! Relay engine
//!
//! Dispatches inbound protocol frames according to the node's role and
//! fans outbound messages out along both delivery paths: direct chat
//! frames to every room member, plus a store frame to the root so the
//! message lands in durable history.
//!
//! Per-peer send failures are reported, never escalated: one dead
//! connection must not stop delivery to the rest of the room.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use hearth_core::{Frame, PeerId, RoomId, StoredMessage, Transport};
use hearth_crypto::RoomKey;

use crate::error::NodeResult;
use crate::events::NodeEvent;
use crate::persist::PersistenceManager;
use crate::registry::RoomRegistry;
use crate::session::{PeerRole, PeerSessionTracker};
use crate::sync::SyncEngine;

/// Outcome of a best-effort broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Room members the chat frame reached directly
    pub peers_reached: usize,
    /// Whether the store frame reached the root
    pub root_reached: bool,
}

/// Role-aware frame dispatch and outbound fan-out
pub struct RelayEngine {
    sessions: Arc<PeerSessionTracker>,
    registry: Arc<RoomRegistry>,
    sync: Arc<SyncEngine>,
    transport: Arc<dyn Transport>,
    /// Present on the root only
    persistence: Option<Arc<PersistenceManager>>,
    total_stored: AtomicU64,
    /// Keys for rooms this node joined; used to decrypt surfaced messages
    room_keys: DashMap<RoomId, RoomKey>,
    events: broadcast::Sender<NodeEvent>,
}

impl RelayEngine {
    pub fn new(
        sessions: Arc<PeerSessionTracker>,
        registry: Arc<RoomRegistry>,
        sync: Arc<SyncEngine>,
        transport: Arc<dyn Transport>,
        persistence: Option<Arc<PersistenceManager>>,
        events: broadcast::Sender<NodeEvent>,
    ) -> Self {
        Self {
            sessions,
            registry,
            sync,
            transport,
            persistence,
            total_stored: AtomicU64::new(0),
            room_keys: DashMap::new(),
            events,
        }
    }

    /// Remember a room key for decrypting surfaced messages
    pub fn add_room_key(&self, room_id: RoomId, key: RoomKey) {
        self.room_keys.insert(room_id, key);
    }

    /// The key for a joined room, if we hold one
    pub fn room_key_for(&self, room_id: &RoomId) -> Option<RoomKey> {
        self.room_key(room_id)
    }

    /// Total messages durably stored across all rooms
    pub fn total_stored(&self) -> u64 {
        self.total_stored.load(Ordering::Relaxed)
    }

    /// Seed the stored-message counter from a restored snapshot
    pub fn restore_total_stored(&self, total: u64) {
        self.total_stored.store(total, Ordering::Relaxed);
    }

    /// Broadcast a message: chat frames to room members, store frame to root
    ///
    /// Delivery is best effort on both paths; the report says how far the
    /// message got. With no root connected the message still reaches live
    /// members, it just is not durably stored yet.
    pub async fn send(&self, room_id: RoomId, message: &StoredMessage) -> NodeResult<SendReport> {
        let chat = Frame::ChatMessage {
            room_id,
            message: message.clone(),
        }
        .encode_line()?;

        let mut peers_reached = 0;
        if let Some(room) = self.registry.get(&room_id) {
            for peer in room.peers().await {
                if self.sessions.role_of(&peer) == PeerRole::Root {
                    continue;
                }
                match self.transport.send(&peer, chat.clone()).await {
                    Ok(()) => peers_reached += 1,
                    Err(e) => {
                        warn!(peer = %peer.short(), error = %e, "chat delivery failed");
                    }
                }
            }
        }

        let mut root_reached = false;
        if let Some(root) = self.sessions.root_peer() {
            let store = Frame::StoreMessage {
                room_id,
                message: message.clone(),
            }
            .encode_line()?;
            match self.transport.send(&root, store).await {
                Ok(()) => root_reached = true,
                Err(e) => {
                    warn!(root = %root.short(), error = %e, "store delivery failed");
                }
            }
        }

        debug!(
            room = %room_id.short(),
            message = %message.id,
            peers_reached,
            root_reached,
            "message sent"
        );
        Ok(SendReport {
            peers_reached,
            root_reached,
        })
    }

    /// Dispatch one recognized inbound frame
    ///
    /// Frames meant for the other role are logged and dropped; a
    /// misdirected frame never tears down the connection.
    pub async fn handle_frame(&self, peer: PeerId, frame: Frame, is_root: bool) -> NodeResult<()> {
        if !matches!(frame, Frame::RootPeerAnnounce { .. }) {
            self.sessions.settle_ordinary(&peer);
        }

        if is_root {
            self.handle_as_root(peer, frame).await
        } else {
            self.handle_as_ordinary(peer, frame).await
        }
    }

    async fn handle_as_root(&self, peer: PeerId, frame: Frame) -> NodeResult<()> {
        match frame {
            Frame::RegisterRoom { room_id } => {
                self.registry.get_or_create(room_id).await?;
                self.registry.associate(&room_id, peer).await;
                self.sessions.add_room(&peer, room_id);
                let _ = self.events.send(NodeEvent::RoomRegistered { room_id, peer });
            }

            Frame::StoreMessage { room_id, mut message } => {
                let room = self.registry.get_or_create(room_id).await?;
                message.stored_at = Some(Utc::now().timestamp_millis());

                let record = postcard::to_allocvec(&message)?;
                let index = room.log().append(record.into()).await?;
                self.registry.touch(&room_id).await;

                let total = self.total_stored.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    room = %room_id.short(),
                    message = %message.id,
                    index,
                    "message stored"
                );

                if let Some(persistence) = &self.persistence
                    && persistence.due(total)
                {
                    let snapshot = self.registry.snapshot().await;
                    if let Err(e) = persistence.checkpoint(&snapshot, total).await {
                        warn!(error = %e, "checkpoint failed");
                    }
                }
            }

            Frame::SyncRequest { room_id, last_index } => {
                self.registry.get_or_create(room_id).await?;
                self.registry.associate(&room_id, peer).await;
                self.sync.serve(peer, room_id, last_index).await?;
            }

            Frame::PublicKey {
                public_key,
                display_name,
            } => {
                let _ = self.events.send(NodeEvent::PeerKeyReceived {
                    peer,
                    public_key,
                    display_name,
                });
            }

            other => {
                debug!(peer = %peer.short(), frame = frame_name(&other), "frame ignored by root");
            }
        }
        Ok(())
    }

    async fn handle_as_ordinary(&self, peer: PeerId, frame: Frame) -> NodeResult<()> {
        match frame {
            Frame::RootPeerAnnounce { capabilities } => {
                trace!(peer = %peer.short(), ?capabilities, "root announce");
                self.sessions.promote_to_root(peer);
                let _ = self.events.send(NodeEvent::RootAvailable { peer });

                // Re-establish every joined room with the (possibly new)
                // root, then pull whatever we missed while it was away.
                // One room's failure must not stall the others.
                for room_id in self.registry.room_ids() {
                    let register = Frame::RegisterRoom { room_id }.encode_line()?;
                    if let Err(e) = self.transport.send(&peer, register).await {
                        warn!(room = %room_id.short(), error = %e, "re-registration failed");
                        continue;
                    }
                    if let Err(e) = self.sync.request(room_id, &peer).await {
                        warn!(room = %room_id.short(), error = %e, "sync request failed");
                    }
                }
            }

            // Fellow members declare their rooms so direct broadcast
            // knows who to reach; rooms we never joined are ignored.
            Frame::RegisterRoom { room_id } => {
                if self.registry.get(&room_id).is_some() {
                    self.registry.associate(&room_id, peer).await;
                    self.sessions.add_room(&peer, room_id);
                } else {
                    trace!(room = %room_id.short(), peer = %peer.short(), "registration for unjoined room ignored");
                }
            }

            Frame::ChatMessage { room_id, message } => {
                if self.sync.observe(room_id, message.clone()) {
                    self.surface(room_id, message, false);
                }
            }

            Frame::SyncResponse {
                room_id,
                messages,
                total_messages,
            } => {
                let added = self.sync.merge(room_id, messages, total_messages);
                debug!(
                    room = %room_id.short(),
                    added = added.len(),
                    total = total_messages,
                    "sync merged"
                );
                for message in added {
                    self.surface(room_id, message, true);
                }
            }

            Frame::PublicKey {
                public_key,
                display_name,
            } => {
                let _ = self.events.send(NodeEvent::PeerKeyReceived {
                    peer,
                    public_key,
                    display_name,
                });
            }

            other => {
                debug!(peer = %peer.short(), frame = frame_name(&other), "frame ignored by ordinary peer");
            }
        }
        Ok(())
    }

    fn surface(&self, room_id: RoomId, message: StoredMessage, sync_origin: bool) {
        let plaintext = self
            .room_key(&room_id)
            .and_then(|key| key.decrypt(&message.ciphertext).ok());
        let _ = self.events.send(NodeEvent::MessageReceived {
            room_id,
            message,
            plaintext,
            sync_origin,
        });
    }

    fn room_key(&self, room_id: &RoomId) -> Option<RoomKey> {
        self.room_keys.get(room_id).map(|k| k.clone())
    }
}

fn frame_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::RootPeerAnnounce { .. } => "root-peer-announce",
        Frame::RegisterRoom { .. } => "register-room",
        Frame::StoreMessage { .. } => "store-message",
        Frame::SyncRequest { .. } => "sync-request",
        Frame::SyncResponse { .. } => "sync-response",
        Frame::ChatMessage { .. } => "chat-message",
        Frame::PublicKey { .. } => "public-key",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{
        Classified, JoinOpts, MemNetwork, MemTransport, Topic, TransportEvent, classify,
    };
    use hearth_log::MemoryLogStore;

    fn build_engine(
        transport: Arc<MemTransport>,
    ) -> (RelayEngine, Arc<RoomRegistry>, Arc<PeerSessionTracker>) {
        let sessions = Arc::new(PeerSessionTracker::new());
        let registry = Arc::new(RoomRegistry::new(
            Arc::new(MemoryLogStore::new()),
            transport.clone(),
            false,
        ));
        let sync = Arc::new(SyncEngine::new(registry.clone(), transport.clone()));
        let (events, _) = broadcast::channel(64);
        let engine = RelayEngine::new(
            sessions.clone(),
            registry.clone(),
            sync,
            transport,
            None,
            events,
        );
        (engine, registry, sessions)
    }

    #[tokio::test]
    async fn test_sync_request_for_new_room_creates_and_associates() {
        let net = MemNetwork::new();
        let root_id = PeerId::generate();
        let client_id = PeerId::generate();
        let root = Arc::new(net.endpoint(root_id));
        let client = net.endpoint(client_id);

        let topic = Topic::new([0x21; 32]);
        root.join(topic, JoinOpts::default()).await.unwrap();
        client.join(topic, JoinOpts::default()).await.unwrap();
        let _ = root.next_event().await;
        let _ = client.next_event().await;

        let (engine, registry, _sessions) = build_engine(root.clone());
        let room_id = RoomId::new([0x42; 32]);
        assert!(registry.get(&room_id).is_none());

        engine
            .handle_frame(
                client_id,
                Frame::SyncRequest {
                    room_id,
                    last_index: 0,
                },
                true,
            )
            .await
            .unwrap();

        // The room now exists and remembers the requester
        let room = registry.get(&room_id).expect("room created on sync request");
        assert!(room.peers().await.contains(&client_id));

        // The requester still gets an (empty) response
        match client.next_event().await.unwrap() {
            TransportEvent::Data { payload, .. } => match classify(&payload) {
                Classified::Frame(Frame::SyncResponse {
                    messages,
                    total_messages,
                    ..
                }) => {
                    assert!(messages.is_empty());
                    assert_eq!(total_messages, 0);
                }
                other => panic!("unexpected record: {:?}", other),
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_announce_handling_survives_unreachable_rooms() {
        let net = MemNetwork::new();
        let local_id = PeerId::generate();
        let transport = Arc::new(net.endpoint(local_id));
        let (engine, registry, sessions) = build_engine(transport);

        // Two joined rooms, but no live link to the announcing peer, so
        // every re-registration send fails
        registry.get_or_create(RoomId::new([0x01; 32])).await.unwrap();
        registry.get_or_create(RoomId::new([0x02; 32])).await.unwrap();

        let root_id = PeerId::generate();
        sessions.on_connected(root_id);
        engine
            .handle_frame(
                root_id,
                Frame::RootPeerAnnounce {
                    capabilities: vec!["store".to_string()],
                },
                false,
            )
            .await
            .unwrap();

        // Delivery failed per room, but the role flip stands
        assert_eq!(sessions.root_peer(), Some(root_id));
    }
}

//! # Hearth Node
//!
//! The node coordinator: one [`HearthNode`] drives a transport's event
//! stream, classifies inbound records into protocol frames, and
//! dispatches them by role. A root node durably stores ciphertext in
//! per-room logs and serves history sync; an ordinary node relays live
//! messages to room members and pulls missing history from the root.
//!
//! ## Key Types
//!
//! - [`HearthNode`]: the node itself; construct, `start`, subscribe to events
//! - [`NodeConfig`] / [`NodeRole`]: role and tuning
//! - [`NodeEvent`]: what the application layer observes
//! - [`SendReport`]: how far an outbound message got
//!
//! ## Example
//!
//! ```rust,ignore
//! let node = HearthNode::new(NodeConfig::ordinary(), transport, store).await?;
//! node.start().await?;
//!
//! let room_id = node.join_room(&secret).await?;
//! node.send_message(room_id, b"hello").await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod persist;
pub mod registry;
pub mod relay;
pub mod session;
pub mod sync;

pub use config::{NodeConfig, NodeRole};
pub use error::{NodeError, NodeResult};
pub use events::NodeEvent;
pub use persist::{PersistedRoom, PersistedState, PersistenceManager};
pub use registry::{Room, RoomRegistry};
pub use relay::{RelayEngine, SendReport};
pub use session::{PeerConnection, PeerRole, PeerSessionTracker};
pub use sync::SyncEngine;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use hearth_core::{
    Classified, Frame, JoinOpts, PeerId, RecordSplitter, RoomId, StoredMessage, Topic, Transport,
    TransportEvent, classify,
};
use hearth_crypto::RoomSecret;
use hearth_log::LogStore;

/// Capabilities a root node announces on connect
const ROOT_CAPABILITIES: &[&str] = &["store", "sync"];

/// A peer in the network, root or ordinary
///
/// Owns the session tracker, room registry, sync engine, and relay
/// engine, and runs the event loop that feeds them. All shared state is
/// behind `Arc`, so the node handle is cheap to use from many tasks.
pub struct HearthNode {
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    sessions: Arc<PeerSessionTracker>,
    registry: Arc<RoomRegistry>,
    sync: Arc<SyncEngine>,
    relay: Arc<RelayEngine>,
    persistence: Option<Arc<PersistenceManager>>,
    events_tx: broadcast::Sender<NodeEvent>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HearthNode {
    /// Create a node over a transport and log store
    ///
    /// A root node restores its metadata snapshot here, re-opening every
    /// previously-known room so sync works before anyone re-registers.
    pub async fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn LogStore>,
    ) -> NodeResult<Self> {
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity);
        let sessions = Arc::new(PeerSessionTracker::new());
        let registry = Arc::new(RoomRegistry::new(
            store,
            transport.clone(),
            config.role == NodeRole::Root,
        ));
        let sync = Arc::new(SyncEngine::new(registry.clone(), transport.clone()));

        let persistence = match config.role {
            NodeRole::Root => Some(Arc::new(PersistenceManager::new(
                config.data_dir.join("state.json"),
                config.checkpoint_interval,
            ))),
            NodeRole::Ordinary => None,
        };

        let relay = Arc::new(RelayEngine::new(
            sessions.clone(),
            registry.clone(),
            sync.clone(),
            transport.clone(),
            persistence.clone(),
            events_tx.clone(),
        ));

        let node = Self {
            config,
            transport,
            sessions,
            registry,
            sync,
            relay,
            persistence,
            events_tx,
            loop_handle: Mutex::new(None),
        };

        if let Some(persistence) = &node.persistence {
            let state = persistence.load().await;
            for room_id in state.rooms.keys() {
                node.registry.get_or_create(*room_id).await?;
            }
            node.relay.restore_total_stored(state.total_messages);
            if !state.rooms.is_empty() {
                info!(
                    rooms = state.rooms.len(),
                    total = state.total_messages,
                    "restored from snapshot"
                );
            }
        }

        Ok(node)
    }

    /// Our peer identifier on the transport
    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    /// The role this node runs as
    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    /// Subscribe to node events
    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events_tx.subscribe()
    }

    /// Start the event loop
    pub async fn start(&self) -> NodeResult<()> {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            return Ok(());
        }

        info!(
            peer = %self.local_id().short(),
            role = ?self.config.role,
            "node starting"
        );

        let transport = self.transport.clone();
        let sessions = self.sessions.clone();
        let registry = self.registry.clone();
        let relay = self.relay.clone();
        let events_tx = self.events_tx.clone();
        let is_root = self.config.role == NodeRole::Root;

        *handle = Some(tokio::spawn(async move {
            run_loop(transport, sessions, registry, relay, events_tx, is_root).await;
        }));
        Ok(())
    }

    /// Stop the event loop, checkpointing root state first
    pub async fn shutdown(&self) -> NodeResult<()> {
        if let Some(persistence) = &self.persistence {
            let snapshot = self.registry.snapshot().await;
            persistence
                .checkpoint(&snapshot, self.relay.total_stored())
                .await?;
        }

        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
        }
        info!(peer = %self.local_id().short(), "node stopped");
        Ok(())
    }

    /// Join a room from its shared secret (ordinary role)
    ///
    /// Derives the room id and key, joins the rendezvous topic, and, if a
    /// root is already known, registers the room and requests sync.
    pub async fn join_room(&self, secret: &RoomSecret) -> NodeResult<RoomId> {
        let room_id = secret.derive_room_id();
        self.relay.add_room_key(room_id, secret.derive_key());

        // Create the local room entry before the topic join, so member
        // registrations arriving on fresh connections find it.
        self.registry.get_or_create(room_id).await?;
        self.transport
            .join(Topic::from(room_id), JoinOpts::default())
            .await?;

        // Declare membership to everyone we already know; peers that
        // connect later learn it from the connect-time registration.
        let register = Frame::RegisterRoom { room_id }.encode_line()?;
        for peer in self.transport.connected_peers() {
            if let Err(e) = self.transport.send(&peer, register.clone()).await {
                warn!(peer = %peer.short(), error = %e, "registration failed");
            }
        }
        if let Some(root) = self.sessions.root_peer() {
            self.sync.request(room_id, &root).await?;
        }

        info!(room = %room_id.short(), "room joined");
        Ok(room_id)
    }

    /// Open a room for serving (root role)
    ///
    /// Opens the room's log and announces on its rendezvous topic so
    /// members joining the topic can find this root. Rooms restored from
    /// the snapshot are served automatically.
    pub async fn serve_room(&self, room_id: RoomId) -> NodeResult<()> {
        self.registry.get_or_create(room_id).await?;
        Ok(())
    }

    /// Encrypt and send a message to a joined room
    ///
    /// The plaintext is encrypted with the room key, broadcast to live
    /// members, and submitted to the root for durable storage. The
    /// message lands in our own view immediately, so a later sync of our
    /// own message is a no-op.
    pub async fn send_message(
        &self,
        room_id: RoomId,
        plaintext: &[u8],
    ) -> NodeResult<SendReport> {
        let key = self
            .relay
            .room_key_for(&room_id)
            .ok_or_else(|| NodeError::RoomNotJoined(room_id.to_string()))?;

        let ciphertext = key.encrypt(plaintext)?;
        let message = StoredMessage::new(self.local_id(), ciphertext);
        self.sync.observe(room_id, message.clone());

        self.relay.send(room_id, &message).await
    }

    /// Request history sync for a room, waiting for a root if needed
    ///
    /// Returns `false` if no root appeared within the configured wait;
    /// the request is not sent in that case.
    pub async fn sync_room(&self, room_id: RoomId) -> NodeResult<bool> {
        match self.sessions.wait_for_root(self.config.root_wait).await {
            Some(root) => {
                self.sync.request(room_id, &root).await?;
                Ok(true)
            }
            None => {
                debug!(room = %room_id.short(), "no root available for sync");
                Ok(false)
            }
        }
    }

    /// Wait until a root peer announces itself
    pub async fn wait_for_root(&self, timeout: Duration) -> Option<PeerId> {
        self.sessions.wait_for_root(timeout).await
    }

    /// The currently-known root peer
    pub fn root_peer(&self) -> Option<PeerId> {
        self.sessions.root_peer()
    }

    /// Ordered local view of a joined room's messages
    pub fn messages(&self, room_id: &RoomId) -> Vec<StoredMessage> {
        self.sync.view(room_id)
    }

    /// Share our public key with every connected peer
    pub async fn share_public_key(
        &self,
        public_key: [u8; 32],
        display_name: &str,
    ) -> NodeResult<usize> {
        let frame = Frame::PublicKey {
            public_key,
            display_name: display_name.to_string(),
        }
        .encode_line()?;

        let mut reached = 0;
        for peer in self.transport.connected_peers() {
            match self.transport.send(&peer, frame.clone()).await {
                Ok(()) => reached += 1,
                Err(e) => warn!(peer = %peer.short(), error = %e, "key share failed"),
            }
        }
        Ok(reached)
    }

    /// The room registry (rooms known to this node)
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Total messages this node has durably stored (root role)
    pub fn total_stored(&self) -> u64 {
        self.relay.total_stored()
    }
}

async fn run_loop(
    transport: Arc<dyn Transport>,
    sessions: Arc<PeerSessionTracker>,
    registry: Arc<RoomRegistry>,
    relay: Arc<RelayEngine>,
    events_tx: broadcast::Sender<NodeEvent>,
    is_root: bool,
) {
    let mut splitters: HashMap<PeerId, RecordSplitter> = HashMap::new();

    while let Some(event) = transport.next_event().await {
        match event {
            TransportEvent::PeerConnected { peer } => {
                if !sessions.on_connected(peer) {
                    continue;
                }
                if is_root && !sessions.announced(&peer) {
                    let announce = Frame::RootPeerAnnounce {
                        capabilities: ROOT_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
                    };
                    match announce.encode_line() {
                        Ok(line) => {
                            if let Err(e) = transport.send(&peer, line).await {
                                warn!(peer = %peer.short(), error = %e, "announce failed");
                            } else {
                                sessions.mark_announced(&peer);
                            }
                        }
                        Err(e) => warn!(error = %e, "announce encode failed"),
                    }
                } else if !is_root {
                    // Tell the new peer which rooms we are in, so its
                    // direct broadcasts can reach us.
                    for room_id in registry.room_ids() {
                        match (Frame::RegisterRoom { room_id }).encode_line() {
                            Ok(line) => {
                                if let Err(e) = transport.send(&peer, line).await {
                                    warn!(peer = %peer.short(), error = %e, "registration failed");
                                }
                            }
                            Err(e) => warn!(error = %e, "registration encode failed"),
                        }
                    }
                }
            }

            TransportEvent::Data { peer, payload } => {
                let splitter = splitters.entry(peer).or_default();
                for record in splitter.push(&payload) {
                    match classify(&record) {
                        Classified::Frame(frame) => {
                            if let Err(e) = relay.handle_frame(peer, frame, is_root).await {
                                warn!(peer = %peer.short(), error = %e, "frame handling failed");
                            }
                        }
                        Classified::Unrecognized(bytes) => {
                            // Shared stream; other traffic is expected
                            trace!(peer = %peer.short(), len = bytes.len(), "non-protocol record dropped");
                        }
                    }
                }
            }

            TransportEvent::PeerClosed { peer } | TransportEvent::PeerError { peer, .. } => {
                if let TransportEvent::PeerError { reason, .. } = &event {
                    warn!(peer = %peer.short(), reason = %reason, "connection failed");
                }
                splitters.remove(&peer);
                let closed = sessions.on_closed(&peer);
                registry.disassociate(&peer).await;

                if let Some(conn) = closed {
                    if conn.role == PeerRole::Root {
                        let _ = events_tx.send(NodeEvent::RootUnavailable);
                    }
                    let _ = events_tx.send(NodeEvent::PeerDisconnected { peer });
                }
            }
        }
    }
    debug!("transport closed, event loop exiting");
}

//! History sync
//!
//! On the root, [`SyncEngine::serve`] answers a sync request with every
//! record at or after the client's cursor. On an ordinary peer, the
//! engine keeps one [`RoomView`] per joined room: an ordered local view
//! plus the id set used to drop duplicates, and the cursor sent in the
//! next sync request.
//!
//! The cursor is the count of contiguous records the client holds from
//! index 0, so a response carrying `[cursor, total)` is gap-free by
//! construction and replays are absorbed by id de-duplication.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use hearth_core::{Frame, PeerId, RoomId, StoredMessage, Transport};

use crate::error::NodeResult;
use crate::registry::RoomRegistry;

/// A client's local view of one room's history
#[derive(Debug, Default)]
pub struct RoomView {
    messages: Vec<StoredMessage>,
    seen: std::collections::HashSet<hearth_core::MessageId>,
    /// Count of contiguous records held from index 0
    cursor: u64,
}

impl RoomView {
    /// Merge a sync response, returning only the newly-seen messages
    fn merge(&mut self, incoming: Vec<StoredMessage>, total: u64) -> Vec<StoredMessage> {
        let mut added = Vec::new();
        for message in incoming {
            if self.seen.insert(message.id) {
                self.messages.push(message.clone());
                added.push(message);
            }
        }
        self.cursor = self.cursor.max(total);
        added
    }

    /// Record a live (non-sync) message; returns false for a duplicate
    fn observe(&mut self, message: StoredMessage) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// Serves and consumes history sync
pub struct SyncEngine {
    registry: Arc<RoomRegistry>,
    transport: Arc<dyn Transport>,
    views: DashMap<RoomId, RoomView>,
}

impl SyncEngine {
    /// Create an engine over the node's registry and transport
    pub fn new(registry: Arc<RoomRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            views: DashMap::new(),
        }
    }

    /// Answer a sync request (root role)
    ///
    /// Sends one response covering `[max(last_index, 0), len)` of the
    /// room's log. A cursor at or past the end yields an empty response,
    /// which still tells the client the authoritative total.
    pub async fn serve(&self, peer: PeerId, room_id: RoomId, last_index: i64) -> NodeResult<()> {
        let room = self.registry.get_or_create(room_id).await?;
        let log = room.log();

        let len = log.len().await;
        let from = (last_index.max(0) as u64).min(len);

        let records = log.read_range(from, len).await?;
        let mut messages = Vec::with_capacity(records.len());
        for (offset, record) in records.iter().enumerate() {
            match postcard::from_bytes::<StoredMessage>(record) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    // Skip rather than fail the whole response
                    warn!(
                        room = %room_id.short(),
                        index = from + offset as u64,
                        error = %e,
                        "undecodable log record skipped during sync"
                    );
                }
            }
        }

        debug!(
            room = %room_id.short(),
            peer = %peer.short(),
            from,
            count = messages.len(),
            total = len,
            "serving sync"
        );

        let frame = Frame::SyncResponse {
            room_id,
            messages,
            total_messages: len,
        };
        self.transport.send(&peer, frame.encode_line()?).await?;
        Ok(())
    }

    /// Send a sync request for a room to the root (ordinary role)
    pub async fn request(&self, room_id: RoomId, root: &PeerId) -> NodeResult<()> {
        let cursor = self.cursor(&room_id);
        debug!(room = %room_id.short(), cursor, "requesting sync");

        let frame = Frame::SyncRequest {
            room_id,
            last_index: cursor as i64,
        };
        self.transport.send(root, frame.encode_line()?).await?;
        Ok(())
    }

    /// Merge a sync response into the room's view
    ///
    /// Returns the messages not previously seen, in response order.
    pub fn merge(
        &self,
        room_id: RoomId,
        messages: Vec<StoredMessage>,
        total_messages: u64,
    ) -> Vec<StoredMessage> {
        self.views
            .entry(room_id)
            .or_default()
            .merge(messages, total_messages)
    }

    /// Record a live message; returns false if already seen
    pub fn observe(&self, room_id: RoomId, message: StoredMessage) -> bool {
        self.views.entry(room_id).or_default().observe(message)
    }

    /// The room's sync cursor
    pub fn cursor(&self, room_id: &RoomId) -> u64 {
        self.views.get(room_id).map(|v| v.cursor).unwrap_or(0)
    }

    /// Snapshot of the room's ordered local view
    pub fn view(&self, room_id: &RoomId) -> Vec<StoredMessage> {
        self.views
            .get(room_id)
            .map(|v| v.messages.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(byte: u8) -> StoredMessage {
        let mut m = StoredMessage::new(PeerId::generate(), vec![byte]);
        m.id = hearth_core::MessageId([byte; 16]);
        m
    }

    #[test]
    fn test_merge_deduplicates_and_advances_cursor() {
        let mut view = RoomView::default();

        let added = view.merge(vec![msg(1), msg(2)], 2);
        assert_eq!(added.len(), 2);
        assert_eq!(view.cursor, 2);

        // A replayed response adds nothing and never rewinds the cursor
        let added = view.merge(vec![msg(1), msg(2)], 2);
        assert!(added.is_empty());
        assert_eq!(view.cursor, 2);
        assert_eq!(view.messages.len(), 2);
    }

    #[test]
    fn test_merge_mixed_old_and_new() {
        let mut view = RoomView::default();
        view.merge(vec![msg(1)], 1);

        let added = view.merge(vec![msg(1), msg(2), msg(3)], 3);
        assert_eq!(added.len(), 2);
        assert_eq!(view.messages.len(), 3);
        assert_eq!(view.cursor, 3);
    }

    #[test]
    fn test_observe_suppresses_sync_echo() {
        let mut view = RoomView::default();
        let live = msg(7);

        assert!(view.observe(live.clone()));
        assert!(!view.observe(live.clone()));

        // The same message arriving later via sync is also a duplicate
        let added = view.merge(vec![live], 1);
        assert!(added.is_empty());
        assert_eq!(view.messages.len(), 1);
    }

    #[test]
    fn test_empty_response_still_advances_cursor() {
        let mut view = RoomView::default();
        let added = view.merge(Vec::new(), 5);
        assert!(added.is_empty());
        assert_eq!(view.cursor, 5);
    }

    #[tokio::test]
    async fn test_serve_clamps_cursor_to_log_bounds() {
        use hearth_core::{
            Classified, JoinOpts, MemNetwork, MemTransport, Topic, TransportEvent, classify,
        };
        use hearth_log::MemoryLogStore;

        use crate::registry::RoomRegistry;

        async fn next_response(client: &MemTransport) -> (Vec<StoredMessage>, u64) {
            match client.next_event().await.unwrap() {
                TransportEvent::Data { payload, .. } => match classify(&payload) {
                    Classified::Frame(Frame::SyncResponse {
                        messages,
                        total_messages,
                        ..
                    }) => (messages, total_messages),
                    other => panic!("unexpected record: {:?}", other),
                },
                other => panic!("unexpected event: {:?}", other),
            }
        }

        let net = MemNetwork::new();
        let server_id = PeerId::generate();
        let client_id = PeerId::generate();
        let server = Arc::new(net.endpoint(server_id));
        let client = net.endpoint(client_id);

        let topic = Topic::new([0x77; 32]);
        server.join(topic, JoinOpts::default()).await.unwrap();
        client.join(topic, JoinOpts::default()).await.unwrap();
        let _ = server.next_event().await;
        let _ = client.next_event().await;

        let registry = Arc::new(RoomRegistry::new(
            Arc::new(MemoryLogStore::new()),
            server.clone(),
            false,
        ));
        let room_id = RoomId::new([0x55; 32]);
        let room = registry.get_or_create(room_id).await.unwrap();
        for byte in 1..=3u8 {
            // Stored records always carry the root-side timestamp
            let mut message = msg(byte);
            message.stored_at = Some(byte as i64);
            let record = postcard::to_allocvec(&message).unwrap();
            room.log().append(record.into()).await.unwrap();
        }

        let engine = SyncEngine::new(registry, server.clone());

        // A negative cursor reads from the start of the log
        engine.serve(client_id, room_id, -1).await.unwrap();
        let (messages, total) = next_response(&client).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(total, 3);

        // A cursor past the end yields nothing but the authoritative total
        engine.serve(client_id, room_id, 7).await.unwrap();
        let (messages, total) = next_response(&client).await;
        assert!(messages.is_empty());
        assert_eq!(total, 3);
    }
}

//! Protocol frames
//!
//! One typed, self-describing protocol message per newline-delimited JSON
//! record. The connection's byte stream is shared with lower-level
//! transport bookkeeping, so bytes that fail to parse as a [`Frame`] are
//! not an error: classification returns [`Classified::Unrecognized`] and
//! the caller drops them silently.

use bytes::Bytes;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::identity::PeerId;
use crate::room::RoomId;

/// Stable identifier for a message
///
/// Generated once by the sender and carried through broadcast, durable
/// storage, and sync responses, so clients can de-duplicate a message
/// they already hold (e.g. their own message bouncing back via sync).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub [u8; 16]);

impl MessageId {
    /// Generate a random message ID
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes);
        Some(Self(id))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| D::Error::custom("invalid message id"))
    }
}

/// Serde helper for base64-encoded byte fields in JSON frames
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(D::Error::custom)
    }
}

/// Serde helper for 32-byte keys carried as hex strings
pub mod hex_key {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}

/// An encrypted message envelope
///
/// The payload is opaque ciphertext; the root peer stores and serves it
/// without any decryption capability. `stored_at` is stamped by the root
/// when the message is appended to the room's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Stable message identifier (for de-duplication)
    pub id: MessageId,
    /// Peer that originally sent the message
    pub from_peer: PeerId,
    /// Opaque ciphertext
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Sender-side timestamp (millis since epoch)
    pub sent_at: i64,
    /// Root-side timestamp, set on durable append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<i64>,
}

impl StoredMessage {
    /// Create a new envelope around ciphertext
    pub fn new(from_peer: PeerId, ciphertext: Vec<u8>) -> Self {
        Self {
            id: MessageId::generate(),
            from_peer,
            ciphertext,
            sent_at: Utc::now().timestamp_millis(),
            stored_at: None,
        }
    }
}

/// One typed protocol message exchanged over a connection's byte stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// Root role handshake, sent by the root peer on connect
    #[serde(rename_all = "camelCase")]
    RootPeerAnnounce {
        /// Capabilities the root offers (e.g. "store", "sync")
        capabilities: Vec<String>,
    },

    /// Declare interest in a room; the root creates/attaches its log
    #[serde(rename_all = "camelCase")]
    RegisterRoom { room_id: RoomId },

    /// Ask the root to durably append a message
    #[serde(rename_all = "camelCase")]
    StoreMessage {
        room_id: RoomId,
        message: StoredMessage,
    },

    /// Pull missing history starting at `last_index`
    #[serde(rename_all = "camelCase")]
    SyncRequest { room_id: RoomId, last_index: i64 },

    /// Deliver missing history
    #[serde(rename_all = "camelCase")]
    SyncResponse {
        room_id: RoomId,
        messages: Vec<StoredMessage>,
        total_messages: u64,
    },

    /// Live peer-to-peer relay of an encrypted message
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        room_id: RoomId,
        message: StoredMessage,
    },

    /// Encryption bootstrap: sender's public key and display name
    #[serde(rename_all = "camelCase")]
    PublicKey {
        #[serde(with = "hex_key")]
        public_key: [u8; 32],
        display_name: String,
    },
}

impl Frame {
    /// Encode as one newline-terminated JSON record
    pub fn encode_line(&self) -> Result<Bytes, FrameError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(Bytes::from(bytes))
    }
}

/// Result of classifying one record from the stream
///
/// Non-protocol traffic is expected on the shared stream, so unparseable
/// bytes are a deliberate variant rather than an error.
#[derive(Debug, Clone)]
pub enum Classified {
    /// A recognized protocol frame
    Frame(Frame),
    /// Bytes that are not a protocol frame
    Unrecognized(Bytes),
}

/// Classify one record from a connection's stream
pub fn classify(record: &[u8]) -> Classified {
    match serde_json::from_slice::<Frame>(record) {
        Ok(frame) => Classified::Frame(frame),
        Err(_) => Classified::Unrecognized(Bytes::copy_from_slice(record)),
    }
}

/// Upper bound on a single buffered record; a stream that exceeds it
/// without a newline is discarded up to its next newline
const MAX_PENDING_RECORD: usize = 32 * 1024 * 1024;

/// Splits an incoming byte stream into newline-delimited records
///
/// Partial records are buffered until their terminating newline arrives.
/// The buffer is bounded: once a record grows past [`MAX_PENDING_RECORD`]
/// its bytes are dropped until the stream resynchronizes on a newline.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    buf: Vec<u8>,
    /// Discarding an oversized record until the next newline
    skipping: bool,
}

impl RecordSplitter {
    /// Create an empty splitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every completed record
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut chunk = chunk;
        if self.skipping {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    chunk = &chunk[pos + 1..];
                    self.skipping = false;
                }
                None => return Vec::new(),
            }
        }
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop(); // trailing newline
            if !line.is_empty() && line.len() <= MAX_PENDING_RECORD {
                records.push(Bytes::from(line));
            }
        }
        if self.buf.len() > MAX_PENDING_RECORD {
            self.buf.clear();
            self.skipping = true;
        }
        records
    }

    /// Number of buffered bytes awaiting a newline
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_room() -> RoomId {
        RoomId::new([0x42; 32])
    }

    #[test]
    fn test_frame_json_shape() {
        let frame = Frame::SyncRequest {
            room_id: test_room(),
            last_index: 3,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&frame.encode_line().unwrap()).unwrap();

        assert_eq!(json["type"], "sync-request");
        assert_eq!(json["lastIndex"], 3);
        assert!(json["roomId"].is_string());
    }

    #[test]
    fn test_classify_roundtrip() {
        let msg = StoredMessage::new(PeerId::generate(), vec![1, 2, 3]);
        let frame = Frame::StoreMessage {
            room_id: test_room(),
            message: msg.clone(),
        };

        let line = frame.encode_line().unwrap();
        let record = &line[..line.len() - 1];

        match classify(record) {
            Classified::Frame(Frame::StoreMessage { room_id, message }) => {
                assert_eq!(room_id, test_room());
                assert_eq!(message.id, msg.id);
                assert_eq!(message.ciphertext, vec![1, 2, 3]);
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_non_protocol_traffic() {
        // Arbitrary bytes on the shared stream are not an error
        match classify(b"\x00\x01hyperstuff") {
            Classified::Unrecognized(bytes) => assert_eq!(&bytes[..2], &[0, 1]),
            other => panic!("unexpected classification: {:?}", other),
        }

        // Valid JSON that is not a frame is also non-protocol traffic
        match classify(br#"{"hello": "world"}"#) {
            Classified::Unrecognized(_) => {}
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_type() {
        match classify(br#"{"type": "teleport", "roomId": "00"}"#) {
            Classified::Unrecognized(_) => {}
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_ciphertext_is_base64_in_json() {
        let msg = StoredMessage::new(PeerId::generate(), b"opaque".to_vec());
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert!(json["ciphertext"].is_string());
        assert!(json["storedAt"].is_null());
    }

    #[test]
    fn test_public_key_frame() {
        let frame = Frame::PublicKey {
            public_key: [0xCD; 32],
            display_name: "alice".to_string(),
        };
        let line = frame.encode_line().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(json["publicKey"], "cd".repeat(32));
        assert_eq!(json["displayName"], "alice");
    }

    #[test]
    fn test_record_splitter() {
        let mut splitter = RecordSplitter::new();

        assert!(splitter.push(b"partial").is_empty());
        assert_eq!(splitter.pending(), 7);

        let records = splitter.push(b" one\nsecond\npart");
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][..], b"partial one");
        assert_eq!(&records[1][..], b"second");
        assert_eq!(splitter.pending(), 4);

        let records = splitter.push(b"ial\n");
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][..], b"partial");
    }

    #[test]
    fn test_record_splitter_skips_empty_lines() {
        let mut splitter = RecordSplitter::new();
        let records = splitter.push(b"\n\na\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][..], b"a");
    }

    #[test]
    fn test_record_splitter_caps_runaway_buffer() {
        let mut splitter = RecordSplitter::new();

        // A newline-free stream past the cap is dropped, not buffered
        let oversized = vec![b'x'; MAX_PENDING_RECORD + 1];
        assert!(splitter.push(&oversized).is_empty());
        assert_eq!(splitter.pending(), 0);

        // The tail of the oversized record is discarded with it
        assert!(splitter.push(b"still the same record\n").is_empty());

        // The stream resynchronizes on the next record
        let records = splitter.push(b"ok\n");
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][..], b"ok");
    }
}

//! The room log contract

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LogResult;

/// Append-only, index-addressable record sequence for one room
///
/// Appends to a single log are serialized by the implementation, so
/// append order equals arrival order and indices are dense: the record
/// appended when the log holds `n` entries always receives index `n`.
/// Reads are pure projections and never mutate the log.
#[async_trait]
pub trait RoomLog: Send + Sync {
    /// Append a record, returning its index
    async fn append(&self, record: Bytes) -> LogResult<u64>;

    /// Read the record at an index
    async fn get(&self, index: u64) -> LogResult<Bytes>;

    /// Read records in `[from, to)` in ascending index order
    ///
    /// The range is clamped to the current length; `from >= to` yields an
    /// empty vec.
    async fn read_range(&self, from: u64, to: u64) -> LogResult<Vec<Bytes>>;

    /// Current number of records
    async fn len(&self) -> u64;

    /// Whether the log holds no records
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

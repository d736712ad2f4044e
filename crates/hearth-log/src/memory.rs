//! In-memory room log

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{LogError, LogResult};
use crate::traits::RoomLog;

/// Vec-backed room log for tests and ephemeral clients
#[derive(Debug, Default)]
pub struct MemoryRoomLog {
    records: RwLock<Vec<Bytes>>,
}

impl MemoryRoomLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomLog for MemoryRoomLog {
    async fn append(&self, record: Bytes) -> LogResult<u64> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(records.len() as u64 - 1)
    }

    async fn get(&self, index: u64) -> LogResult<Bytes> {
        let records = self.records.read().await;
        records
            .get(index as usize)
            .cloned()
            .ok_or(LogError::OutOfRange {
                index,
                length: records.len() as u64,
            })
    }

    async fn read_range(&self, from: u64, to: u64) -> LogResult<Vec<Bytes>> {
        let records = self.records.read().await;
        let len = records.len() as u64;
        let from = from.min(len) as usize;
        let to = to.min(len) as usize;
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(records[from..to].to_vec())
    }

    async fn len(&self) -> u64 {
        self.records.read().await.len() as u64
    }
}

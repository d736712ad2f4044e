//! Per-room log stores
//!
//! A [`LogStore`] hands out exactly one shared [`RoomLog`] handle per
//! room identifier, so every component appending to or reading from a
//! room observes the same log.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use hearth_core::RoomId;

use crate::error::LogResult;
use crate::file::{FileLogConfig, FileRoomLog};
use crate::memory::MemoryRoomLog;
use crate::traits::RoomLog;

/// Source of per-room log handles
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Get the log for a room, opening/creating it on first use
    ///
    /// Idempotent: repeated calls for the same room return the same
    /// underlying log.
    async fn open(&self, room_id: RoomId) -> LogResult<Arc<dyn RoomLog>>;
}

/// File-backed log store: one log file per room under a base directory
pub struct FileLogStore {
    base_dir: PathBuf,
    config: FileLogConfig,
    open_logs: DashMap<RoomId, Arc<FileRoomLog>>,
}

impl FileLogStore {
    /// Create a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            config: FileLogConfig::default(),
            open_logs: DashMap::new(),
        }
    }

    /// Create a store with a custom log configuration
    pub fn with_config(base_dir: impl Into<PathBuf>, config: FileLogConfig) -> Self {
        Self {
            base_dir: base_dir.into(),
            config,
            open_logs: DashMap::new(),
        }
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn open(&self, room_id: RoomId) -> LogResult<Arc<dyn RoomLog>> {
        if let Some(log) = self.open_logs.get(&room_id) {
            return Ok(log.clone());
        }

        let path = self.base_dir.join(format!("{}.log", room_id));
        let log = Arc::new(FileRoomLog::open(path, self.config.clone()).await?);

        // A concurrent open may have won the race; keep the first handle.
        let log = self
            .open_logs
            .entry(room_id)
            .or_insert(log)
            .clone();
        Ok(log)
    }
}

/// In-memory log store for tests and ephemeral clients
#[derive(Default)]
pub struct MemoryLogStore {
    logs: DashMap<RoomId, Arc<MemoryRoomLog>>,
}

impl MemoryLogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn open(&self, room_id: RoomId) -> LogResult<Arc<dyn RoomLog>> {
        let log = self
            .logs
            .entry(room_id)
            .or_insert_with(|| Arc::new(MemoryRoomLog::new()))
            .clone();
        Ok(log)
    }
}

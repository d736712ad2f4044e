//! Root metadata snapshot
//!
//! The root peer checkpoints a small JSON snapshot of its room metadata
//! so restarts can re-open every known room without waiting for peers to
//! re-register. The snapshot is bookkeeping only; message history lives
//! in the per-room logs, which remain authoritative.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hearth_core::RoomId;

use crate::error::{NodeError, NodeResult};

/// Per-room entry in the persisted snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRoom {
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// The root's persisted metadata snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub rooms: BTreeMap<RoomId, PersistedRoom>,
    pub total_messages: u64,
    pub created_at: DateTime<Utc>,
    pub last_saved: DateTime<Utc>,
}

impl PersistedState {
    /// A fresh state with no rooms
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            rooms: BTreeMap::new(),
            total_messages: 0,
            created_at: now,
            last_saved: now,
        }
    }
}

/// Loads and checkpoints the snapshot file
pub struct PersistenceManager {
    path: PathBuf,
    checkpoint_interval: u64,
    /// Carried across checkpoints from the first load
    created_at: Mutex<DateTime<Utc>>,
}

impl PersistenceManager {
    /// Create a manager writing to `path`
    pub fn new(path: impl Into<PathBuf>, checkpoint_interval: u64) -> Self {
        Self {
            path: path.into(),
            checkpoint_interval: checkpoint_interval.max(1),
            created_at: Mutex::new(Utc::now()),
        }
    }

    /// Load the snapshot, tolerating a missing or corrupt file
    ///
    /// Anything unreadable yields an empty state; the logs on disk still
    /// carry the history, so starting empty only loses metadata.
    pub async fn load(&self) -> PersistedState {
        let state = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "snapshot corrupt, starting fresh");
                    PersistedState::empty()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::empty(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot unreadable, starting fresh");
                PersistedState::empty()
            }
        };

        *self.created_at.lock().expect("created_at lock poisoned") = state.created_at;
        state
    }

    /// Whether a checkpoint is due after `total` stored messages
    pub fn due(&self, total: u64) -> bool {
        total > 0 && total % self.checkpoint_interval == 0
    }

    /// Atomically write a snapshot built from room metadata
    ///
    /// Writes to a temp file and renames over the old snapshot, so a
    /// crash mid-write never leaves a torn file behind.
    pub async fn checkpoint(
        &self,
        rooms: &[(RoomId, u64, DateTime<Utc>, DateTime<Utc>)],
        total_messages: u64,
    ) -> NodeResult<()> {
        let created_at = *self.created_at.lock().expect("created_at lock poisoned");
        let state = PersistedState {
            rooms: rooms
                .iter()
                .map(|(id, count, created, activity)| {
                    (
                        *id,
                        PersistedRoom {
                            message_count: *count,
                            created_at: *created,
                            last_activity: *activity,
                        },
                    )
                })
                .collect(),
            total_messages,
            created_at,
            last_saved: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NodeError::Persistence(e.to_string()))?;
        }

        let bytes = serde_json::to_vec_pretty(&state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| NodeError::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| NodeError::Persistence(e.to_string()))?;

        debug!(rooms = state.rooms.len(), total = total_messages, "snapshot checkpointed");
        Ok(())
    }
}

//! # Hearth Log
//!
//! Append-only per-room message logs.
//!
//! Each room owns one durable, index-addressable record sequence. Records
//! are never modified or reordered after append, and sync always reads a
//! contiguous index range, so the log is the single source of truth for
//! "which messages exist and in what order".
//!
//! ## Key Types
//!
//! - [`RoomLog`]: the append/get/length contract
//! - [`FileRoomLog`]: durable file-backed log with checksummed records
//! - [`MemoryRoomLog`]: Vec-backed log for tests and ephemeral clients
//! - [`LogStore`]: hands out one shared log handle per room

pub mod error;
pub mod file;
pub mod memory;
pub mod store;
pub mod traits;

pub use error::{LogError, LogResult};
pub use file::{FileLogConfig, FileRoomLog};
pub use memory::MemoryRoomLog;
pub use store::{FileLogStore, LogStore, MemoryLogStore};
pub use traits::RoomLog;

//! File-backed room log
//!
//! One log file per room. Records are framed as a 4-byte big-endian
//! length, a 32-byte BLAKE3 checksum, and the payload. The checksum is
//! verified on every read, making the log tamper-evident. Opening a log
//! replays the file to rebuild the in-memory offset index; a truncated or
//! corrupt tail stops the replay at the last intact record instead of
//! failing the open.

use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{LogError, LogResult};
use crate::traits::RoomLog;

/// Record header: 4-byte length + 32-byte checksum
const HEADER_SIZE: u64 = 36;

/// Upper bound on a single record, to catch corrupt length prefixes
const MAX_RECORD_SIZE: usize = 10 * 1024 * 1024;

/// Configuration for a file-backed log
#[derive(Debug, Clone)]
pub struct FileLogConfig {
    /// Whether to sync writes to disk immediately
    pub sync_on_write: bool,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Durable append-only log backed by a single file
pub struct FileRoomLog {
    path: PathBuf,
    config: FileLogConfig,
    /// Open file handle; taken by `close`
    file: RwLock<Option<File>>,
    /// File offset of each record, indexed by record index
    offsets: RwLock<Vec<u64>>,
}

impl FileRoomLog {
    /// Open the log at `path`, creating it if absent
    pub async fn open(path: PathBuf, config: FileLogConfig) -> LogResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let file_size = file.metadata().await?.len();
        let offsets = if file_size > 0 {
            Self::replay(&file, file_size).await?
        } else {
            Vec::new()
        };

        info!(
            path = %path.display(),
            records = offsets.len(),
            "Opened room log"
        );

        Ok(Self {
            path,
            config,
            file: RwLock::new(Some(file)),
            offsets: RwLock::new(offsets),
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Scan the file sequentially, collecting record offsets
    async fn replay(file: &File, file_size: u64) -> LogResult<Vec<u64>> {
        let mut reader = BufReader::new(file.try_clone().await?);
        let mut offsets = Vec::new();
        let mut offset = 0u64;

        while offset < file_size {
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).await.is_err() {
                warn!(offset, "Truncated record header, stopping replay");
                break;
            }
            let record_len = u32::from_be_bytes(len_buf) as usize;
            if record_len == 0 || record_len > MAX_RECORD_SIZE {
                warn!(offset, len = record_len, "Invalid record length, stopping replay");
                break;
            }

            let mut rest = vec![0u8; 32 + record_len];
            if reader.read_exact(&mut rest).await.is_err() {
                warn!(offset, "Truncated record body, stopping replay");
                break;
            }

            offsets.push(offset);
            offset += HEADER_SIZE + record_len as u64;
        }

        debug!(records = offsets.len(), bytes = offset, "Replayed room log");
        Ok(offsets)
    }

    /// Read and verify the record starting at `offset`
    ///
    /// Takes the write lock: the handle has a single seek cursor, so the
    /// seek and the reads that follow must not interleave with another
    /// reader. Appends are unaffected since they re-seek to the end.
    async fn read_at(&self, offset: u64, index: u64) -> LogResult<Bytes> {
        let mut file_guard = self.file.write().await;
        let file = file_guard.as_mut().ok_or(LogError::Closed)?;

        file.seek(SeekFrom::Start(offset)).await?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).await?;
        let record_len = u32::from_be_bytes(len_buf) as usize;
        if record_len == 0 || record_len > MAX_RECORD_SIZE {
            return Err(LogError::ChecksumMismatch { index });
        }

        let mut checksum = [0u8; 32];
        file.read_exact(&mut checksum).await?;

        let mut payload = vec![0u8; record_len];
        file.read_exact(&mut payload).await?;

        if *blake3::hash(&payload).as_bytes() != checksum {
            return Err(LogError::ChecksumMismatch { index });
        }

        Ok(Bytes::from(payload))
    }
}

#[async_trait::async_trait]
impl RoomLog for FileRoomLog {
    async fn append(&self, record: Bytes) -> LogResult<u64> {
        if record.is_empty() || record.len() > MAX_RECORD_SIZE {
            return Err(LogError::Serialization(format!(
                "record size {} outside allowed range",
                record.len()
            )));
        }

        // The file write lock serializes appends, so indices are dense
        // and append order equals arrival order.
        let mut file_guard = self.file.write().await;
        let file = file_guard.as_mut().ok_or(LogError::Closed)?;

        let offset = file.seek(SeekFrom::End(0)).await?;
        let checksum = blake3::hash(&record);

        file.write_all(&(record.len() as u32).to_be_bytes()).await?;
        file.write_all(checksum.as_bytes()).await?;
        file.write_all(&record).await?;
        if self.config.sync_on_write {
            file.sync_data().await?;
        }

        let mut offsets = self.offsets.write().await;
        offsets.push(offset);
        Ok(offsets.len() as u64 - 1)
    }

    async fn get(&self, index: u64) -> LogResult<Bytes> {
        let offset = {
            let offsets = self.offsets.read().await;
            *offsets
                .get(index as usize)
                .ok_or(LogError::OutOfRange {
                    index,
                    length: offsets.len() as u64,
                })?
        };
        self.read_at(offset, index).await
    }

    async fn read_range(&self, from: u64, to: u64) -> LogResult<Vec<Bytes>> {
        let offsets: Vec<(u64, u64)> = {
            let offsets = self.offsets.read().await;
            let len = offsets.len() as u64;
            let from = from.min(len);
            let to = to.min(len);
            (from..to).map(|i| (i, offsets[i as usize])).collect()
        };

        let mut records = Vec::with_capacity(offsets.len());
        for (index, offset) in offsets {
            records.push(self.read_at(offset, index).await?);
        }
        Ok(records)
    }

    async fn len(&self) -> u64 {
        self.offsets.read().await.len() as u64
    }
}

impl FileRoomLog {
    /// Flush and close the underlying file
    pub async fn close(&self) -> LogResult<()> {
        let mut file_guard = self.file.write().await;
        if let Some(file) = file_guard.take() {
            file.sync_all().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_log(dir: &TempDir) -> FileRoomLog {
        FileRoomLog::open(dir.path().join("room.log"), FileLogConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;

        let index = log.append(Bytes::from_static(b"first")).await.unwrap();
        assert_eq!(index, 0);

        let record = log.get(0).await.unwrap();
        assert_eq!(&record[..], b"first");
    }

    #[tokio::test]
    async fn test_read_range_in_order() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;

        for i in 0..10u64 {
            log.append(Bytes::from(format!("record-{}", i)))
                .await
                .unwrap();
        }

        let records = log.read_range(4, 8).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(&records[0][..], b"record-4");
        assert_eq!(&records[3][..], b"record-7");
    }

    #[tokio::test]
    async fn test_reopen_replays_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("room.log");

        {
            let log = FileRoomLog::open(path.clone(), FileLogConfig::default())
                .await
                .unwrap();
            for i in 0..5u64 {
                log.append(Bytes::from(format!("r{}", i))).await.unwrap();
            }
            log.close().await.unwrap();
        }

        let log = FileRoomLog::open(path, FileLogConfig::default())
            .await
            .unwrap();
        assert_eq!(log.len().await, 5);
        assert_eq!(&log.get(3).await.unwrap()[..], b"r3");

        // Appends continue from the replayed length
        let index = log.append(Bytes::from_static(b"r5")).await.unwrap();
        assert_eq!(index, 5);
    }

    #[tokio::test]
    async fn test_truncated_tail_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("room.log");

        {
            let log = FileRoomLog::open(path.clone(), FileLogConfig::default())
                .await
                .unwrap();
            log.append(Bytes::from_static(b"intact")).await.unwrap();
            log.close().await.unwrap();
        }

        // Simulate a crash mid-write: a dangling partial header
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            f.write_all(&[0x00, 0x00]).unwrap();
        }

        let log = FileRoomLog::open(path, FileLogConfig::default())
            .await
            .unwrap();
        assert_eq!(log.len().await, 1);
        assert_eq!(&log.get(0).await.unwrap()[..], b"intact");
    }

    #[tokio::test]
    async fn test_tampered_record_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("room.log");

        {
            let log = FileRoomLog::open(path.clone(), FileLogConfig::default())
                .await
                .unwrap();
            log.append(Bytes::from_static(b"payload")).await.unwrap();
            log.close().await.unwrap();
        }

        // Flip a payload byte on disk
        {
            let mut bytes = std::fs::read(&path).unwrap();
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            std::fs::write(&path, bytes).unwrap();
        }

        let log = FileRoomLog::open(path, FileLogConfig::default())
            .await
            .unwrap();
        let err = log.get(0).await.unwrap_err();
        assert!(matches!(err, LogError::ChecksumMismatch { index: 0 }));
    }

    #[tokio::test]
    async fn test_concurrent_reads_are_consistent() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let log = Arc::new(open_log(&dir).await);

        for i in 0..20u64 {
            log.append(Bytes::from(format!("record-{:02}", i)))
                .await
                .unwrap();
        }

        // Interleaved point reads and range reads must never see each
        // other's seek position.
        let mut tasks = Vec::new();
        for i in 0..20u64 {
            let point_log = log.clone();
            tasks.push(tokio::spawn(async move {
                let record = point_log.get(i).await.unwrap();
                assert_eq!(&record[..], format!("record-{:02}", i).as_bytes());
            }));
            let range_log = log.clone();
            tasks.push(tokio::spawn(async move {
                let records = range_log.read_range(0, 20).await.unwrap();
                assert_eq!(records.len(), 20);
                assert_eq!(&records[7][..], b"record-07");
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_out_of_range() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;

        let err = log.get(0).await.unwrap_err();
        assert!(matches!(err, LogError::OutOfRange { .. }));
    }
}

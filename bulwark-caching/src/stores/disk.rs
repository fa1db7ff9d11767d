//! Disk tier: one JSON envelope file per key, written in the background

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::stats::SharedStatsCollector;
use crate::{CacheError, CacheResult};

/// Lowercase hex SHA-256 digest of a cache key, used as its file name
pub fn fingerprint(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// On-disk representation of a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// Encoded payload, in the same JSON form used on the wire
    pub payload: Value,

    /// RFC 3339 expiration timestamp
    pub expires_at: DateTime<Utc>,
}

enum DiskCommand {
    Write { path: PathBuf, bytes: Vec<u8> },
    Flush(oneshot::Sender<()>),
}

/// Disk tier with a bounded background write queue
pub struct DiskTier {
    directory: PathBuf,
    sender: mpsc::Sender<DiskCommand>,
    stats: SharedStatsCollector,
}

impl DiskTier {
    /// Create the tier and spawn its writer on the current tokio runtime
    pub fn new(
        directory: impl Into<PathBuf>,
        queue_capacity: usize,
        stats: SharedStatsCollector,
    ) -> CacheResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;

        let runtime = tokio::runtime::Handle::try_current()?;

        let (sender, receiver) = mpsc::channel(queue_capacity);
        runtime.spawn(run_writer(directory.clone(), receiver, stats.clone()));

        Ok(Self {
            directory,
            sender,
            stats,
        })
    }

    /// Directory holding the envelope files
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(fingerprint(key))
    }

    /// Read the envelope for `key`, if a file exists
    pub async fn read(&self, key: &str) -> CacheResult<Option<CacheEnvelope>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope = serde_json::from_slice(&bytes)
            .map_err(|source| CacheError::Corrupt { path, source })?;
        Ok(Some(envelope))
    }

    /// Queue an envelope write without waiting for it.
    ///
    /// Returns `false` if the write was dropped.
    pub fn enqueue_write(&self, key: &str, envelope: &CacheEnvelope) -> CacheResult<bool> {
        let bytes = serde_json::to_vec(envelope).map_err(CacheError::Encode)?;
        let path = self.path_for(key);

        match self.sender.try_send(DiskCommand::Write { path, bytes }) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!(
                    "Disk cache write queue full, dropping write for key {}",
                    key
                );
                self.stats.record_dropped_write();
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::warn!("Disk cache writer stopped, dropping write for key {}", key);
                self.stats.record_dropped_write();
                Ok(false)
            }
        }
    }

    /// Wait until every write queued before this call has been applied
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(DiskCommand::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Delete the file for `key`, if any
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        remove_if_exists(&self.path_for(key)).await
    }

    /// Delete every file in the cache directory
    pub async fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                remove_if_exists(&entry.path()).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

async fn remove_if_exists(path: &Path) -> CacheResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Background writer: applies queued commands one at a time until every sender is gone
async fn run_writer(
    directory: PathBuf,
    mut receiver: mpsc::Receiver<DiskCommand>,
    stats: SharedStatsCollector,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            DiskCommand::Write { path, bytes } => match write_atomic(&directory, &path, &bytes).await {
                Ok(()) => stats.record_disk_write(),
                Err(e) => {
                    log::warn!("Failed to write cache file {}: {}", path.display(), e);
                    stats.record_disk_write_failure();
                }
            },
            DiskCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    log::debug!("Disk cache writer for {} stopped", directory.display());
}

/// Write to a uniquely named temp file, then rename it over the target
async fn write_atomic(directory: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(directory).await?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = directory.join(format!("{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_stats_collector;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_is_lowercase_hex() {
        let digest = fingerprint("GET:https://api.example.com/news");
        assert_eq!(digest.len(), 64);
        assert!(digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(digest, fingerprint("GET:https://api.example.com/news"));
        assert_ne!(digest, fingerprint("GET:https://api.example.com/news?page=2"));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path(), 8, create_stats_collector()).unwrap();

        let envelope = CacheEnvelope {
            payload: json!({"headline": "Markets rally"}),
            expires_at: Utc::now(),
        };

        assert!(tier.enqueue_write("news", &envelope).unwrap());
        tier.flush().await;

        assert!(tier.path_for("news").exists());
        assert_eq!(tier.read("news").await.unwrap(), Some(envelope));
        assert_eq!(tier.read("missing").await.unwrap(), None);

        // No temp files are left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path(), 8, create_stats_collector()).unwrap();

        std::fs::write(tier.path_for("broken"), b"{not json").unwrap();
        assert!(matches!(
            tier.read("broken").await,
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let tier = DiskTier::new(dir.path(), 8, create_stats_collector()).unwrap();
        let envelope = CacheEnvelope {
            payload: json!(1),
            expires_at: Utc::now(),
        };

        for key in ["a", "b", "c"] {
            tier.enqueue_write(key, &envelope).unwrap();
        }
        tier.flush().await;

        tier.remove("a").await.unwrap();
        tier.remove("a").await.unwrap();
        assert!(!tier.path_for("a").exists());

        assert_eq!(tier.clear().await.unwrap(), 2);
        assert!(!tier.path_for("b").exists());
    }

    #[test]
    fn test_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let result = DiskTier::new(dir.path(), 8, create_stats_collector());
        assert!(matches!(result, Err(CacheError::NoRuntime(_))));
    }
}

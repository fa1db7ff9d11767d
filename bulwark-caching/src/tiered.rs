//! Memory + disk cache with fixed-TTL entries

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::config::TieredCacheConfig;
use crate::stats::{create_stats_collector, SharedStatsCollector};
use crate::stores::{CacheEnvelope, DiskTier, Lookup, MemoryTier};
use crate::{CacheError, CacheResult, CacheStats};

/// Two-tier fallback cache.
///
/// Entries are removed only when read after expiry or by an explicit
/// `remove`/`clear`; there is no size-based eviction, so the disk tier
/// grows with the number of distinct keys over the process lifetime.
/// Clones share both tiers.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: TieredCacheConfig,
    ttl: chrono::Duration,
    memory: MemoryTier,
    disk: DiskTier,
    clock: SharedClock,
    stats: SharedStatsCollector,
}

impl TieredCache {
    /// Create a cache using the system clock.
    ///
    /// Must be called from within a tokio runtime: the disk writer is
    /// spawned on it.
    pub fn new(config: TieredCacheConfig) -> CacheResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(config: TieredCacheConfig, clock: SharedClock) -> CacheResult<Self> {
        config.validate()?;

        let ttl = chrono::Duration::from_std(config.ttl)
            .map_err(|e| CacheError::InvalidConfiguration(format!("ttl out of range: {}", e)))?;
        let stats = create_stats_collector();
        let disk = DiskTier::new(
            config.directory.clone(),
            config.write_queue_capacity,
            stats.clone(),
        )?;

        log::debug!(
            "Tiered cache ready at {} (ttl {:?})",
            config.directory.display(),
            config.ttl
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                ttl,
                memory: MemoryTier::new(),
                disk,
                clock,
                stats,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &TieredCacheConfig {
        &self.inner.config
    }

    /// Directory of the disk tier
    pub fn directory(&self) -> &Path {
        self.inner.disk.directory()
    }

    /// File that backs `key` on disk
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.inner.disk.path_for(key)
    }

    /// Look up `key`, memory first, then disk.
    ///
    /// A valid disk entry is promoted into memory. An expired disk entry
    /// has its file deleted. A corrupt file is deleted and reported as a
    /// miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let inner = &self.inner;
        let now = inner.clock.now();

        match inner.memory.get(key, now) {
            Lookup::Hit(payload) => {
                inner.stats.record_memory_hit();
                return decode(&payload).map(Some);
            }
            Lookup::Expired => inner.stats.record_expiration(),
            Lookup::Missing => {}
        }

        let envelope = match inner.disk.read(key).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                inner.stats.record_miss();
                return Ok(None);
            }
            Err(e @ CacheError::Corrupt { .. }) => {
                log::warn!("Discarding cache entry for key {}: {}", key, e);
                inner.disk.remove(key).await?;
                inner.stats.record_miss();
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if now > envelope.expires_at {
            log::debug!("Cache entry for key {} expired at {}", key, envelope.expires_at);
            inner.disk.remove(key).await?;
            inner.stats.record_expiration();
            inner.stats.record_miss();
            return Ok(None);
        }

        let value = self.promote(key, envelope)?;
        inner.stats.record_disk_hit();
        Ok(Some(value))
    }

    /// Move a valid disk envelope into memory. A `set` that landed while the
    /// file was being read wins over the older disk copy.
    fn promote<T: DeserializeOwned>(&self, key: &str, envelope: CacheEnvelope) -> CacheResult<T> {
        let payload = Arc::new(envelope.payload);
        let payload = self.inner.memory.promote(key, payload, envelope.expires_at);
        decode(&payload)
    }

    /// Store `value` under `key`.
    ///
    /// The memory tier is updated before returning; the disk write is
    /// queued and never blocks or fails the caller.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        let inner = &self.inner;
        let payload = serde_json::to_value(value).map_err(CacheError::Encode)?;
        let expires_at = self.expiration_from(inner.clock.now());

        inner
            .memory
            .insert(key, Arc::new(payload.clone()), expires_at);
        inner.stats.record_put();

        let envelope = CacheEnvelope {
            payload,
            expires_at,
        };
        if let Err(e) = inner.disk.enqueue_write(key, &envelope) {
            log::warn!("Failed to queue disk cache write for key {}: {}", key, e);
        }

        Ok(())
    }

    /// Remove `key` from both tiers
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        self.inner.memory.remove(key);
        self.inner.disk.remove(key).await
    }

    /// Remove every entry from both tiers
    pub async fn clear(&self) -> CacheResult<()> {
        self.inner.memory.clear();
        self.inner.disk.flush().await;
        let removed = self.inner.disk.clear().await?;
        log::info!(
            "Cleared cache at {} ({} files)",
            self.directory().display(),
            removed
        );
        Ok(())
    }

    /// Wait for every queued disk write to land
    pub async fn flush(&self) {
        self.inner.disk.flush().await;
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.get_stats(self.inner.memory.len())
    }

    fn expiration_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.inner.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn decode<T: DeserializeOwned>(payload: &Value) -> CacheResult<T> {
    T::deserialize(payload).map_err(CacheError::PayloadMismatch)
}

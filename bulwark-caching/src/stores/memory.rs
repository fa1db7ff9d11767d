//! In-memory tier: a shared map of decoded payloads with expiry instants

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One entry of the memory tier
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Encoded payload
    pub payload: Arc<Value>,

    /// Entry is unusable once `now > expires_at`
    pub expires_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// Check if the entry is expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Outcome of a memory-tier lookup
#[derive(Debug)]
pub enum Lookup {
    /// Live entry
    Hit(Arc<Value>),
    /// Entry was present but expired; it has been removed
    Expired,
    /// No entry for the key
    Missing,
}

/// Memory tier. Concurrent writes to one key are last-write-wins.
#[derive(Debug, Default)]
pub struct MemoryTier {
    store: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryTier {
    /// Create an empty tier
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, dropping it if it expired before `now`
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Lookup {
        {
            let store = self.store.read();
            match store.get(key) {
                None => return Lookup::Missing,
                Some(entry) if !entry.is_expired(now) => {
                    return Lookup::Hit(entry.payload.clone())
                }
                Some(_) => {}
            }
        }

        let mut store = self.store.write();
        // Re-check under the write lock; a fresh set may have landed meanwhile
        match store.get(key) {
            Some(entry) if !entry.is_expired(now) => Lookup::Hit(entry.payload.clone()),
            Some(_) => {
                store.remove(key);
                Lookup::Expired
            }
            None => Lookup::Missing,
        }
    }

    /// Insert or replace an entry
    pub fn insert(&self, key: &str, payload: Arc<Value>, expires_at: DateTime<Utc>) {
        self.store
            .write()
            .insert(key.to_string(), MemoryEntry { payload, expires_at });
    }

    /// Insert a payload read back from disk unless the key already holds an
    /// entry that expires no earlier. Returns the payload left in the tier.
    pub fn promote(
        &self,
        key: &str,
        payload: Arc<Value>,
        expires_at: DateTime<Utc>,
    ) -> Arc<Value> {
        let mut store = self.store.write();
        match store.get(key) {
            Some(current) if current.expires_at >= expires_at => current.payload.clone(),
            _ => {
                store.insert(
                    key.to_string(),
                    MemoryEntry {
                        payload: payload.clone(),
                        expires_at,
                    },
                );
                payload
            }
        }
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<MemoryEntry> {
        self.store.write().remove(key)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.store.write().clear();
    }

    /// Number of stored entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Whether the tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

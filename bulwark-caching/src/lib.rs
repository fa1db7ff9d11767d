//! Two-tier fallback cache for Bulwark
//!
//! [`TieredCache`] keeps decoded payloads in a shared in-memory map and
//! mirrors every write to a per-key file on disk through a bounded
//! background queue. Reads check memory first, then disk, promoting valid
//! disk entries back into memory. Entries expire after a fixed TTL and are
//! removed lazily when read.

pub mod clock;
pub mod config;
pub mod errors;
pub mod stats;
pub mod stores;
pub mod tiered;

// Re-export main types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::TieredCacheConfig;
pub use errors::{CacheError, CacheResult};
pub use stats::CacheStats;
pub use stores::{fingerprint, CacheEnvelope, DiskTier, MemoryTier};
pub use tiered::TieredCache;

//! Storage tiers backing the tiered cache

pub mod disk;
pub mod memory;

pub use disk::{fingerprint, CacheEnvelope, DiskTier};
pub use memory::{Lookup, MemoryEntry, MemoryTier};

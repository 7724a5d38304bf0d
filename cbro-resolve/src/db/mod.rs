//! Database access for cbro-resolve

pub mod cache;

pub use cache::{CacheEntry, CacheKey, CacheKind, CacheLookup, CacheStats, CacheStore, MissReason};

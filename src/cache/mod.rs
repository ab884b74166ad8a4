//! Versioned response cache for offline support.
//!
//! This module provides the storage side of the offline shell:
//! - Named, versioned buckets of request/response snapshots
//! - Keys normalised so cache-busted requests share a key with plain ones
//! - SQLite persistence across runs, or in-memory storage for ephemeral use

mod bucket;
mod storage;
mod traits;

pub use bucket::{Bucket, BucketKind, BucketNames};
pub use storage::{CacheStore, MemoryStorage, SqliteStorage};
pub use traits::{
  strip_cache_bust, CacheKey, CachedEntry, Destination, FetchRequest, FetchResponse,
  CACHE_BUST_PARAM,
};

//! Generation-scoped response caching.
//!
//! This module provides the cache storage the agent relies on:
//! - Named stores, one per cache generation, created lazily and deleted wholesale
//! - Responses keyed by request identity (method + URL, honoring `Vary`)
//! - Atomic batch writes for precaching
//! - SQLite persistence, plus an in-memory backend

mod entry;
mod memory;
mod storage;
mod traits;

pub use entry::{CachedResponse, StoredEntry};
pub use memory::MemoryStorage;
pub use storage::{CacheStorage, SqliteStorage, WriteMode};
pub use traits::{CacheResult, CacheSource, RequestKey};

//! Versioned response cache.
//!
//! Each coordinator version owns one named generation. Generations share a
//! single SQLite database and are isolated by name; deleting a generation
//! drops every entry it holds.

mod sqlite;
mod traits;

pub use sqlite::SqliteCacheStorage;
pub use traits::{
    CacheStorage, GenerationHandle, GenerationMeta, StorageStats, StoredEntry,
};

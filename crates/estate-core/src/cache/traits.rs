//! Cache storage trait and types.

use crate::error::Result;
use crate::models::{RequestKey, ResponseSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handle to an opened generation.
///
/// Obtained from [`CacheStorage::open`]; writes go through a handle so a
/// caller can only put into a generation that exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationHandle {
    name: String,
}

impl GenerationHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A stored entry with its bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub generation: String,
    pub key: RequestKey,
    pub response: ResponseSnapshot,
    pub cached_at: DateTime<Utc>,
}

/// Metadata about one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub generation: String,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

/// Statistics across all generations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub generations: Vec<GenerationMeta>,
}

/// Versioned key→response storage.
///
/// Entries carry no expiry: they live until overwritten or until their
/// generation is deleted. Every operation is atomic from the caller's
/// perspective. All operations are synchronous to match rusqlite's API;
/// per-request and bulk calls from async code go through `spawn_blocking`.
pub trait CacheStorage: Send + Sync {
    /// Create the named generation if needed and return a handle to it.
    fn open(&self, generation: &str) -> Result<GenerationHandle>;

    /// Whether the generation exists.
    fn has(&self, generation: &str) -> Result<bool>;

    /// Store a response, replacing any previous entry for the key.
    fn put(&self, handle: &GenerationHandle, key: &RequestKey, response: &ResponseSnapshot)
        -> Result<()>;

    /// Store several responses in one transaction: all land or none do.
    fn put_all(
        &self,
        handle: &GenerationHandle,
        entries: &[(RequestKey, ResponseSnapshot)],
    ) -> Result<()>;

    /// Lookup scoped to one generation.
    fn match_in(&self, generation: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>>;

    /// Unscoped lookup: first match across generations in creation order.
    fn match_any(&self, key: &RequestKey) -> Result<Option<StoredEntry>>;

    /// Remove a generation and all of its entries. Returns false if it did not exist.
    fn delete(&self, generation: &str) -> Result<bool>;

    /// All generation names in creation order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Entry keys stored in one generation.
    fn entry_keys(&self, generation: &str) -> Result<Vec<RequestKey>>;

    fn stats(&self) -> Result<StorageStats>;

    /// Generation recorded as active by the registration, if any.
    fn active_version(&self) -> Result<Option<String>>;

    fn set_active_version(&self, generation: &str) -> Result<()>;
}

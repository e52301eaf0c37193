//! Tracked persistence of dynamically cached responses.

use crate::cache::{CacheStorage, GenerationHandle};
use crate::error::Result;
use crate::models::{RequestKey, ResponseSnapshot};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A cache write running in the background.
///
/// The page gets its response without waiting for the write; whoever holds
/// the `WriteBack` can await it and observe a failure, e.g. a write that
/// lost the race against the eviction of its generation.
#[derive(Debug)]
pub struct WriteBack {
    key: RequestKey,
    generation: String,
    handle: JoinHandle<Result<()>>,
}

impl WriteBack {
    pub(crate) fn spawn(
        store: Arc<dyn CacheStorage>,
        generation: GenerationHandle,
        key: RequestKey,
        response: ResponseSnapshot,
    ) -> Self {
        let generation_name = generation.name().to_string();
        let task_key = key.clone();
        let handle = tokio::task::spawn_blocking(move || {
            store.put(&generation, &task_key, &response)?;
            debug!("Cached {} into '{}'", task_key, generation.name());
            Ok(())
        });

        Self {
            key,
            generation: generation_name,
            handle,
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the write to land.
    pub async fn wait(self) -> Result<()> {
        self.handle.await?
    }
}

//! Cache-first request interception.
//!
//! For every request a controlled page issues:
//! 1. look the request up in the cache store;
//! 2. on a hit, answer from the cache with no network round-trip and no
//!    revalidation;
//! 3. on a miss, fetch from the network and, when the path falls under the
//!    API segment, persist a copy into the owning generation.
//!
//! Network failures surface to the caller unchanged. Nothing is retried.

mod policy;
mod write_back;

pub use policy::DynamicCachePolicy;
pub use write_back::WriteBack;

use crate::cache::{CacheStorage, GenerationHandle};
use crate::config::LookupScope;
use crate::error::Result;
use crate::models::{FetchRequest, RequestKey, ResponseSnapshot, ResponseSource};
use crate::network::Fetcher;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of intercepting one request.
#[derive(Debug)]
pub struct FetchOutcome {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
    /// Pending write of a dynamically cached response, if one was started.
    pub write_back: Option<WriteBack>,
}

impl FetchOutcome {
    pub fn from_cache(response: ResponseSnapshot) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
            write_back: None,
        }
    }

    pub fn from_network(response: ResponseSnapshot, write_back: Option<WriteBack>) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
            write_back,
        }
    }
}

/// Decides per request between cache and network.
pub struct RequestInterceptor {
    generation: GenerationHandle,
    scope: LookupScope,
    policy: DynamicCachePolicy,
    store: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl RequestInterceptor {
    pub fn new(
        generation: GenerationHandle,
        scope: LookupScope,
        policy: DynamicCachePolicy,
        store: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            generation,
            scope,
            policy,
            store,
            fetcher,
        }
    }

    pub fn generation(&self) -> &str {
        self.generation.name()
    }

    pub fn policy(&self) -> &DynamicCachePolicy {
        &self.policy
    }

    /// Look a key up according to the configured scope.
    ///
    /// With [`LookupScope::AllGenerations`] the own generation is consulted
    /// first, then every other generation in creation order. The store is
    /// queried on the blocking pool.
    pub async fn lookup(&self, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
        let store = self.store.clone();
        let generation = self.generation.name().to_string();
        let scope = self.scope;
        let key = key.clone();
        tokio::task::spawn_blocking(move || lookup_in(store.as_ref(), &generation, scope, &key))
            .await?
    }

    /// Answer one intercepted request.
    pub async fn handle(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let key = request.key();

        if request.is_cacheable_method() {
            match self.lookup(&key).await {
                Ok(Some(response)) => {
                    debug!("Cache hit: {}", key);
                    return Ok(FetchOutcome::from_cache(response));
                }
                Ok(None) => debug!("Cache miss: {}", key),
                Err(e) => warn!("Cache lookup failed for {}, using network: {}", key, e),
            }
        }

        let response = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Network fetch failed for {}: {}", key, e);
                return Err(e);
            }
        };

        let write_back = if self.should_persist(request, &response) {
            // One copy goes to the store, the other back to the page
            Some(WriteBack::spawn(
                self.store.clone(),
                self.generation.clone(),
                key,
                response.clone(),
            ))
        } else {
            None
        };

        Ok(FetchOutcome::from_network(response, write_back))
    }

    fn should_persist(&self, request: &FetchRequest, response: &ResponseSnapshot) -> bool {
        request.is_cacheable_method() && response.is_success() && self.policy.matches(request)
    }
}

fn lookup_in(
    store: &dyn CacheStorage,
    generation: &str,
    scope: LookupScope,
    key: &RequestKey,
) -> Result<Option<ResponseSnapshot>> {
    if let Some(response) = store.match_in(generation, key)? {
        return Ok(Some(response));
    }

    match scope {
        LookupScope::Generation => Ok(None),
        LookupScope::AllGenerations => {
            let entry = store.match_any(key)?;
            if let Some(ref entry) = entry {
                debug!(
                    "Serving {} from foreign generation '{}'",
                    key, entry.generation
                );
            }
            Ok(entry.map(|e| e.response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCacheStorage;
    use crate::error::CoordinatorError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned responses and counts calls.
    #[derive(Default)]
    struct CannedFetcher {
        responses: HashMap<String, ResponseSnapshot>,
        calls: AtomicUsize,
    }

    impl CannedFetcher {
        fn with(mut self, url: &str, response: ResponseSnapshot) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(&request.url)
                .cloned()
                .ok_or_else(|| CoordinatorError::Network {
                    message: format!("connection refused: {}", request.url),
                    cause: None,
                })
        }
    }

    fn interceptor(
        store: Arc<SqliteCacheStorage>,
        fetcher: Arc<CannedFetcher>,
        scope: LookupScope,
    ) -> RequestInterceptor {
        let handle = store.open("v2").unwrap();
        RequestInterceptor::new(
            handle,
            scope,
            DynamicCachePolicy::new("/api/"),
            store,
            fetcher,
        )
    }

    #[tokio::test]
    async fn test_hit_skips_network() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let fetcher = Arc::new(CannedFetcher::default());
        let interceptor = interceptor(store.clone(), fetcher.clone(), LookupScope::Generation);
        let handle = store.open("v2").unwrap();
        store
            .put(&handle, &RequestKey::get("/index.html"), &ResponseSnapshot::ok("cached"))
            .unwrap();

        let outcome = interceptor
            .handle(&FetchRequest::get("/index.html"))
            .await
            .unwrap();

        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(outcome.response.body.as_ref(), b"cached");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_api_miss_is_written_back() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let fetcher = Arc::new(
            CannedFetcher::default().with("/api/units/204", ResponseSnapshot::ok("{\"id\":204}")),
        );
        let interceptor = interceptor(store.clone(), fetcher.clone(), LookupScope::Generation);

        let outcome = interceptor
            .handle(&FetchRequest::get("/api/units/204"))
            .await
            .unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
        outcome.write_back.expect("write-back").wait().await.unwrap();

        let stored = store
            .match_in("v2", &RequestKey::get("/api/units/204"))
            .unwrap();
        assert_eq!(stored, Some(outcome.response));
    }

    #[tokio::test]
    async fn test_static_miss_is_not_persisted() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let fetcher =
            Arc::new(CannedFetcher::default().with("/about.html", ResponseSnapshot::ok("about")));
        let interceptor = interceptor(store.clone(), fetcher.clone(), LookupScope::Generation);

        let outcome = interceptor
            .handle(&FetchRequest::get("/about.html"))
            .await
            .unwrap();

        assert!(outcome.write_back.is_none());
        assert!(store.entry_keys("v2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_not_persisted() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let fetcher = Arc::new(
            CannedFetcher::default().with("/api/units/999", ResponseSnapshot::new(404, "")),
        );
        let interceptor = interceptor(store.clone(), fetcher.clone(), LookupScope::Generation);

        let outcome = interceptor
            .handle(&FetchRequest::get("/api/units/999"))
            .await
            .unwrap();

        assert_eq!(outcome.response.status, 404);
        assert!(outcome.write_back.is_none());
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let fetcher =
            Arc::new(CannedFetcher::default().with("/api/units", ResponseSnapshot::new(201, "")));
        let interceptor = interceptor(store.clone(), fetcher.clone(), LookupScope::Generation);
        let handle = store.open("v2").unwrap();
        store
            .put(&handle, &RequestKey::new("POST", "/api/units"), &ResponseSnapshot::ok("stale"))
            .unwrap();

        let outcome = interceptor
            .handle(&FetchRequest::new("POST", "/api/units").with_body("{}"))
            .await
            .unwrap();

        assert_eq!(outcome.source, ResponseSource::Network);
        assert!(outcome.write_back.is_none());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_surfaces() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let fetcher = Arc::new(CannedFetcher::default());
        let interceptor = interceptor(store, fetcher.clone(), LookupScope::AllGenerations);

        let result = interceptor.handle(&FetchRequest::get("/api/units")).await;

        assert!(matches!(result, Err(CoordinatorError::Network { .. })));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_scope_controls_foreign_generation_fallback() {
        let store = Arc::new(SqliteCacheStorage::in_memory().unwrap());
        let old = store.open("v1").unwrap();
        store
            .put(&old, &RequestKey::get("/legacy.js"), &ResponseSnapshot::ok("old"))
            .unwrap();
        let fetcher =
            Arc::new(CannedFetcher::default().with("/legacy.js", ResponseSnapshot::ok("new")));

        let scoped = interceptor(store.clone(), fetcher.clone(), LookupScope::Generation);
        let outcome = scoped.handle(&FetchRequest::get("/legacy.js")).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);

        let unscoped = interceptor(store, fetcher.clone(), LookupScope::AllGenerations);
        let outcome = unscoped
            .handle(&FetchRequest::get("/legacy.js"))
            .await
            .unwrap();
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(outcome.response.body.as_ref(), b"old");
        assert_eq!(fetcher.calls(), 1);
    }
}

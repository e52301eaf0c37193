//! One coordinator instance and its state machine.

use crate::cache::{CacheStorage, GenerationHandle};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::interceptor::{DynamicCachePolicy, FetchOutcome, RequestInterceptor};
use crate::lifecycle::{ClientRegistry, InstanceState};
use crate::models::{
    FetchRequest, NavigationAction, Notification, RequestKey, ResponseSnapshot,
};
use crate::network::Fetcher;
use crate::notifications::NotificationDispatcher;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub generation: String,
    pub entries: usize,
    pub total_size_bytes: u64,
}

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub generation: String,
    /// Stale generations that were deleted.
    pub evicted: Vec<String>,
    /// Stale generations that could not be deleted, with the reason.
    pub failed: Vec<(String, String)>,
    /// Pages whose controller changed.
    pub claimed: usize,
}

/// A coordinator instance bound to one version.
///
/// The instance owns the generation named after its version. It walks
/// `installing → installed → activating → activated`; any transition called
/// from the wrong state fails with [`CoordinatorError::InvalidState`].
pub struct CoordinatorInstance {
    id: Uuid,
    config: CoordinatorConfig,
    state: RwLock<InstanceState>,
    store: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    interceptor: RequestInterceptor,
    notifications: Arc<NotificationDispatcher>,
    clients: Arc<ClientRegistry>,
}

impl CoordinatorInstance {
    /// Create an instance in the `installing` state.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        notifications: Arc<NotificationDispatcher>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self::with_state(
            config,
            InstanceState::Installing,
            store,
            fetcher,
            notifications,
            clients,
        )
    }

    /// Re-adopt an already populated generation after a restart.
    pub(crate) fn restored(
        config: CoordinatorConfig,
        store: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        notifications: Arc<NotificationDispatcher>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self::with_state(
            config,
            InstanceState::Activated,
            store,
            fetcher,
            notifications,
            clients,
        )
    }

    fn with_state(
        config: CoordinatorConfig,
        state: InstanceState,
        store: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        notifications: Arc<NotificationDispatcher>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        let interceptor = RequestInterceptor::new(
            GenerationHandle::new(config.version.clone()),
            config.lookup_scope,
            DynamicCachePolicy::new(config.api_segment.clone()),
            store.clone(),
            fetcher.clone(),
        );

        Self {
            id: Uuid::new_v4(),
            config,
            state: RwLock::new(state),
            store,
            fetcher,
            interceptor,
            notifications,
            clients,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Version tag, which is also the name of the owned generation.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn state(&self) -> InstanceState {
        *self.state.read().await
    }

    /// Populate the generation with the install manifest.
    ///
    /// Every manifest entry is fetched before anything is written, and the
    /// writes land in one transaction. On failure the instance becomes
    /// redundant and a generation created by this install is removed again.
    pub async fn on_install(&self) -> Result<InstallReport> {
        self.transition(InstanceState::Installing, InstanceState::Installing)
            .await?;
        info!(
            "Installing coordinator {} ({} manifest entries)",
            self.version(),
            self.config.manifest.len()
        );

        match self.populate().await {
            Ok(report) => {
                *self.state.write().await = InstanceState::Installed;
                info!(
                    "Installed coordinator {}: {} entries, {} bytes",
                    self.version(),
                    report.entries,
                    report.total_size_bytes
                );
                Ok(report)
            }
            Err(e) => {
                *self.state.write().await = InstanceState::Redundant;
                error!("Install of coordinator {} failed: {}", self.version(), e);
                Err(CoordinatorError::InstallFailed {
                    generation: self.version().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport> {
        let existed = self.store.has(self.version())?;

        let fetches = self.config.manifest.iter().map(|path| async move {
            let request = FetchRequest::get(path);
            let response = self.fetcher.fetch(&request).await?;
            if !response.is_success() {
                return Err(CoordinatorError::UpstreamStatus {
                    url: request.url.clone(),
                    status: response.status,
                });
            }
            Ok::<(RequestKey, ResponseSnapshot), CoordinatorError>((request.key(), response))
        });
        let entries = try_join_all(fetches).await?;

        let total_size_bytes = entries.iter().map(|(_, r)| r.size_bytes()).sum();
        let report = InstallReport {
            generation: self.version().to_string(),
            entries: entries.len(),
            total_size_bytes,
        };

        let store = self.store.clone();
        let generation = self.version().to_string();
        let written = tokio::task::spawn_blocking(move || {
            let handle = store.open(&generation)?;
            store.put_all(&handle, &entries)
        })
        .await
        .map_err(CoordinatorError::from)
        .and_then(|result| result);

        if let Err(e) = written {
            if !existed {
                if let Err(cleanup) = self.store.delete(self.version()) {
                    warn!(
                        "Failed to remove partial generation {}: {}",
                        self.version(),
                        cleanup
                    );
                }
            }
            return Err(e);
        }

        Ok(report)
    }

    /// Take over: delete every other generation, then claim all pages.
    ///
    /// A generation that refuses to delete is logged and skipped; the sweep
    /// and the claim carry on.
    pub async fn on_activate(&self) -> Result<ActivationReport> {
        self.transition(InstanceState::Installed, InstanceState::Activating)
            .await?;
        info!("Activating coordinator {}", self.version());

        let mut report = ActivationReport {
            generation: self.version().to_string(),
            ..Default::default()
        };

        let store = self.store.clone();
        let keep = self.version().to_string();
        match tokio::task::spawn_blocking(move || evict_stale(store.as_ref(), &keep)).await {
            Ok((evicted, failed)) => {
                report.evicted = evicted;
                report.failed = failed;
            }
            Err(e) => warn!("Eviction sweep for {} aborted: {}", self.version(), e),
        }

        report.claimed = self.clients.claim(self.version()).await;
        *self.state.write().await = InstanceState::Activated;
        info!(
            "Coordinator {} activated, claimed {} page(s)",
            self.version(),
            report.claimed
        );

        Ok(report)
    }

    /// Answer a request from a controlled page.
    pub async fn on_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let state = self.state().await;
        if !state.is_serving() {
            return Err(CoordinatorError::InvalidState {
                expected: "activated",
                actual: state,
            });
        }
        self.interceptor.handle(request).await
    }

    pub async fn on_push(&self, payload: Option<&[u8]>) -> Notification {
        self.notifications.on_push(payload).await
    }

    pub async fn on_notification_click(
        &self,
        id: &str,
        action: Option<&str>,
    ) -> NavigationAction {
        self.notifications.on_click(id, action, &self.clients).await
    }

    /// Retire the instance. It serves nothing afterwards.
    pub async fn mark_redundant(&self) {
        let mut state = self.state.write().await;
        if !state.is_redundant() {
            info!("Coordinator {} is now redundant", self.version());
            *state = InstanceState::Redundant;
        }
    }

    async fn transition(&self, expected: InstanceState, next: InstanceState) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != expected {
            return Err(CoordinatorError::InvalidState {
                expected: expected.as_str(),
                actual: *state,
            });
        }
        *state = next;
        Ok(())
    }
}

impl std::fmt::Debug for CoordinatorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorInstance")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .finish_non_exhaustive()
    }
}

/// Delete every generation except `keep`, best-effort.
fn evict_stale(store: &dyn CacheStorage, keep: &str) -> (Vec<String>, Vec<(String, String)>) {
    let generations = store.keys().unwrap_or_else(|e| {
        warn!("Could not list generations for eviction: {}", e);
        Vec::new()
    });

    let mut evicted = Vec::new();
    let mut failed = Vec::new();
    for generation in generations.into_iter().filter(|g| g != keep) {
        match store.delete(&generation) {
            Ok(_) => {
                info!("Evicted stale generation {}", generation);
                evicted.push(generation);
            }
            Err(e) => {
                warn!("Failed to evict generation {}: {}", generation, e);
                failed.push((generation, e.to_string()));
            }
        }
    }
    (evicted, failed)
}

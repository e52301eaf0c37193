//! The per-origin registration holding active and waiting instances.

use crate::cache::{CacheStorage, SqliteCacheStorage, StorageStats};
use crate::config::{CoordinatorConfig, PathsConfig};
use crate::error::{CoordinatorError, Result};
use crate::interceptor::FetchOutcome;
use crate::lifecycle::{
    ActivationReport, ClientRegistry, CoordinatorInstance, InstallReport, InstanceState,
};
use crate::models::{FetchRequest, NavigationAction, Notification};
use crate::network::{Fetcher, HttpFetcher};
use crate::notifications::NotificationDispatcher;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// What a deploy did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// The requested version is already in control. Nothing was fetched.
    AlreadyActive { version: String },
    /// A new instance installed and took over.
    Activated {
        install: InstallReport,
        activation: ActivationReport,
    },
}

/// Summary of one instance for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: String,
    pub version: String,
    pub state: InstanceState,
}

/// Snapshot of the registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub active: Option<InstanceStatus>,
    pub waiting: Option<InstanceStatus>,
    pub installing: Option<InstanceStatus>,
    pub generations: Vec<String>,
    pub storage: StorageStats,
    pub visible_notifications: usize,
    pub clients: usize,
}

/// Holds the instances of one origin and drives their lifecycle.
///
/// At most one instance is active. A newly installed instance waits next
/// to it until activated; [`Registration::deploy`] does both in one step.
/// Lifecycle operations are serialized; request handling never waits on
/// them except for the brief swap of the active slot.
pub struct Registration {
    config: CoordinatorConfig,
    store: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    notifications: Arc<NotificationDispatcher>,
    clients: Arc<ClientRegistry>,
    active: RwLock<Option<Arc<CoordinatorInstance>>>,
    waiting: RwLock<Option<Arc<CoordinatorInstance>>>,
    installing: RwLock<Option<Arc<CoordinatorInstance>>>,
    lifecycle: Mutex<()>,
}

impl Registration {
    pub fn builder() -> RegistrationBuilder {
        RegistrationBuilder::new()
    }

    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let notifications = Arc::new(NotificationDispatcher::new(config.notification.clone()));
        Self {
            config,
            store,
            fetcher,
            notifications,
            clients: Arc::new(ClientRegistry::new()),
            active: RwLock::new(None),
            waiting: RwLock::new(None),
            installing: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStorage> {
        &self.store
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.notifications
    }

    /// The active instance, if any.
    pub async fn controller(&self) -> Option<Arc<CoordinatorInstance>> {
        self.active.read().await.clone()
    }

    /// The installed instance waiting to activate, if any.
    pub async fn waiting(&self) -> Option<Arc<CoordinatorInstance>> {
        self.waiting.read().await.clone()
    }

    /// Re-adopt the active generation recorded by a previous run.
    ///
    /// Returns the restored version. A record pointing at a generation that
    /// no longer exists is ignored; the next deploy installs from scratch.
    pub async fn restore(&self) -> Result<Option<String>> {
        let _guard = self.lifecycle.lock().await;

        let Some(version) = self.store.active_version()? else {
            debug!("No active generation recorded");
            return Ok(None);
        };
        if !self.store.has(&version)? {
            warn!(
                "Recorded active generation {} is missing, not restoring",
                version
            );
            return Ok(None);
        }

        let instance = Arc::new(CoordinatorInstance::restored(
            self.config.clone().with_version(version.clone()),
            self.store.clone(),
            self.fetcher.clone(),
            self.notifications.clone(),
            self.clients.clone(),
        ));
        self.clients.claim(&version).await;
        *self.active.write().await = Some(instance);

        info!("Restored active coordinator {}", version);
        Ok(Some(version))
    }

    /// Install `version` without activating it. The new instance waits.
    pub async fn install(&self, version: &str) -> Result<InstallReport> {
        let _guard = self.lifecycle.lock().await;
        self.install_locked(version).await
    }

    /// Activate the waiting instance.
    pub async fn activate_waiting(&self) -> Result<ActivationReport> {
        let _guard = self.lifecycle.lock().await;
        self.activate_locked().await
    }

    /// Install `version` and activate it right away.
    ///
    /// If the install fails the current controller stays in charge and the
    /// error is returned.
    pub async fn deploy(&self, version: &str) -> Result<DeployOutcome> {
        let _guard = self.lifecycle.lock().await;

        if let Some(active) = self.active.read().await.as_ref() {
            if active.version() == version {
                debug!("Coordinator {} already active", version);
                return Ok(DeployOutcome::AlreadyActive {
                    version: version.to_string(),
                });
            }
        }

        let install = self.install_locked(version).await?;
        let activation = self.activate_locked().await?;
        Ok(DeployOutcome::Activated {
            install,
            activation,
        })
    }

    async fn install_locked(&self, version: &str) -> Result<InstallReport> {
        let config = self.config.clone().with_version(version);
        config.validate()?;

        let instance = Arc::new(CoordinatorInstance::new(
            config,
            self.store.clone(),
            self.fetcher.clone(),
            self.notifications.clone(),
            self.clients.clone(),
        ));
        *self.installing.write().await = Some(instance.clone());

        let result = instance.on_install().await;
        *self.installing.write().await = None;
        let report = result?;

        let previous = self.waiting.write().await.replace(instance);
        if let Some(previous) = previous {
            previous.mark_redundant().await;
        }
        Ok(report)
    }

    async fn activate_locked(&self) -> Result<ActivationReport> {
        let instance = self
            .waiting
            .write()
            .await
            .take()
            .ok_or(CoordinatorError::NothingWaiting)?;

        let report = instance.on_activate().await?;

        let previous = self.active.write().await.replace(instance);
        if let Some(previous) = previous {
            previous.mark_redundant().await;
        }

        if let Err(e) = self.store.set_active_version(&report.generation) {
            warn!(
                "Failed to record {} as the active generation: {}",
                report.generation, e
            );
        }

        Ok(report)
    }

    /// Route a page request.
    ///
    /// With no active instance the request goes straight to the network and
    /// nothing is cached.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        match self.controller().await {
            Some(instance) => self.fetch_through(instance, request).await,
            None => self.pass_through(request).await,
        }
    }

    /// Serve a request through `instance`.
    ///
    /// An instance retired after it was picked hands the request to whoever
    /// replaced it, once.
    async fn fetch_through(
        &self,
        instance: Arc<CoordinatorInstance>,
        request: &FetchRequest,
    ) -> Result<FetchOutcome> {
        let result = instance.on_fetch(request).await;
        if !matches!(
            result,
            Err(CoordinatorError::InvalidState {
                actual: InstanceState::Redundant,
                ..
            })
        ) {
            return result;
        }

        match self.controller().await {
            Some(current) if !Arc::ptr_eq(&current, &instance) => {
                debug!(
                    "Coordinator {} retired mid-request, retrying {} on {}",
                    instance.version(),
                    request.key(),
                    current.version()
                );
                current.on_fetch(request).await
            }
            Some(_) => result,
            None => self.pass_through(request).await,
        }
    }

    async fn pass_through(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        debug!("No controller, passing {} through", request.key());
        let response = self.fetcher.fetch(request).await?;
        Ok(FetchOutcome::from_network(response, None))
    }

    /// Deliver a push message through the active instance.
    pub async fn push(&self, payload: Option<&[u8]>) -> Result<Notification> {
        let instance = self
            .controller()
            .await
            .ok_or(CoordinatorError::NoActiveInstance)?;
        Ok(instance.on_push(payload).await)
    }

    /// Deliver a notification click through the active instance.
    pub async fn notification_click(
        &self,
        id: &str,
        action: Option<&str>,
    ) -> Result<NavigationAction> {
        let instance = self
            .controller()
            .await
            .ok_or(CoordinatorError::NoActiveInstance)?;
        Ok(instance.on_notification_click(id, action).await)
    }

    pub async fn status(&self) -> Result<RegistrationStatus> {
        Ok(RegistrationStatus {
            active: describe(self.active.read().await.as_ref()).await,
            waiting: describe(self.waiting.read().await.as_ref()).await,
            installing: describe(self.installing.read().await.as_ref()).await,
            generations: self.store.keys()?,
            storage: self.store.stats()?,
            visible_notifications: self.notifications.visible().await.len(),
            clients: self.clients.len().await,
        })
    }
}

async fn describe(instance: Option<&Arc<CoordinatorInstance>>) -> Option<InstanceStatus> {
    let instance = instance?;
    Some(InstanceStatus {
        id: instance.id().to_string(),
        version: instance.version().to_string(),
        state: instance.state().await,
    })
}

/// Builder for a [`Registration`].
///
/// # Example
///
/// ```rust,ignore
/// use estate_cache::Registration;
///
/// let registration = Registration::builder()
///     .data_dir("/var/lib/estate-cache")
///     .upstream("http://127.0.0.1:3000")
///     .build()?;
/// registration.restore().await?;
/// registration.deploy("v2").await?;
/// ```
#[derive(Default)]
pub struct RegistrationBuilder {
    config: Option<CoordinatorConfig>,
    store: Option<Arc<dyn CacheStorage>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    data_dir: Option<PathBuf>,
    upstream: Option<String>,
}

impl RegistrationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator configuration. Default: [`CoordinatorConfig::default`].
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an explicit store. Takes precedence over [`Self::data_dir`].
    pub fn store(mut self, store: Arc<dyn CacheStorage>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an explicit fetcher. Takes precedence over [`Self::upstream`].
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Directory holding the SQLite cache database.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Origin that network fetches go to.
    pub fn upstream(mut self, origin: impl Into<String>) -> Self {
        self.upstream = Some(origin.into());
        self
    }

    pub fn build(self) -> Result<Registration> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store: Arc<dyn CacheStorage> = match (self.store, self.data_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(SqliteCacheStorage::new(
                dir.join(PathsConfig::CACHE_DB_FILENAME),
            )?),
            (None, None) => {
                return Err(CoordinatorError::Config {
                    message: "a store or a data directory is required".to_string(),
                })
            }
        };

        let fetcher: Arc<dyn Fetcher> = match (self.fetcher, self.upstream) {
            (Some(fetcher), _) => fetcher,
            (None, Some(origin)) => {
                Arc::new(HttpFetcher::with_timeout(&origin, config.fetch_timeout())?)
            }
            (None, None) => {
                return Err(CoordinatorError::Config {
                    message: "a fetcher or an upstream origin is required".to_string(),
                })
            }
        };

        Ok(Registration::new(config, store, fetcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResponseSnapshot, ResponseSource};
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[test]
    fn test_builder_requires_store() {
        let result = RegistrationBuilder::new()
            .upstream("http://127.0.0.1:3000")
            .build();
        assert!(matches!(result, Err(CoordinatorError::Config { .. })));
    }

    #[test]
    fn test_builder_requires_fetcher() {
        let temp_dir = TempDir::new().unwrap();
        let result = RegistrationBuilder::new().data_dir(temp_dir.path()).build();
        assert!(matches!(result, Err(CoordinatorError::Config { .. })));
    }

    #[test]
    fn test_builder_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let registration = Registration::builder()
            .data_dir(temp_dir.path().join("data"))
            .upstream("http://127.0.0.1:3000")
            .build()
            .unwrap();

        assert!(temp_dir
            .path()
            .join("data")
            .join(PathsConfig::CACHE_DB_FILENAME)
            .exists());
        assert_eq!(registration.config().version, CoordinatorConfig::DEFAULT_VERSION);
    }

    #[tokio::test]
    async fn test_push_without_controller() {
        let registration = Registration::builder()
            .store(Arc::new(SqliteCacheStorage::in_memory().unwrap()))
            .upstream("http://127.0.0.1:3000")
            .build()
            .unwrap();

        let result = registration.push(None).await;
        assert!(matches!(result, Err(CoordinatorError::NoActiveInstance)));
    }

    #[tokio::test]
    async fn test_activate_without_waiting() {
        let registration = Registration::builder()
            .store(Arc::new(SqliteCacheStorage::in_memory().unwrap()))
            .upstream("http://127.0.0.1:3000")
            .build()
            .unwrap();

        let result = registration.activate_waiting().await;
        assert!(matches!(result, Err(CoordinatorError::NothingWaiting)));
    }

    /// Answers every path with its tag and the path.
    struct TaggedSite(&'static str);

    #[async_trait]
    impl Fetcher for TaggedSite {
        async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
            Ok(ResponseSnapshot::ok(format!("{} {}", self.0, request.url)))
        }
    }

    #[tokio::test]
    async fn test_retired_instance_hands_request_to_successor() {
        let registration = Registration::builder()
            .store(Arc::new(SqliteCacheStorage::in_memory().unwrap()))
            .fetcher(Arc::new(TaggedSite("site")))
            .build()
            .unwrap();
        registration.deploy("v1").await.unwrap();
        let picked = registration.controller().await.unwrap();

        registration.deploy("v2").await.unwrap();
        let request = FetchRequest::get("/index.html");
        assert!(matches!(
            picked.on_fetch(&request).await,
            Err(CoordinatorError::InvalidState {
                actual: InstanceState::Redundant,
                ..
            })
        ));

        let outcome = registration.fetch_through(picked, &request).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(registration.controller().await.unwrap().version(), "v2");
        assert_eq!(outcome.response.body.as_ref(), b"site /index.html");
    }
}

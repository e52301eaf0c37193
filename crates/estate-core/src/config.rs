//! Centralized configuration for the cache coordinator.
//!
//! Constant tables live on unit structs; the per-deployment settings live on
//! [`CoordinatorConfig`], which can be loaded from a JSON file.

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = concat!("estate-cache/", env!("CARGO_PKG_VERSION"));
    /// Largest request body the adapter will buffer before forwarding.
    pub const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const DATA_DIR_NAME: &'static str = "estate-cache";
    pub const CACHE_DB_FILENAME: &'static str = "cache.sqlite";
    pub const CONFIG_FILENAME: &'static str = "coordinator.json";
}

/// Fixed notification rendering values.
pub struct NotificationDefaults;

impl NotificationDefaults {
    pub const TITLE: &'static str = "Property Listings";
    pub const FALLBACK_BODY: &'static str = "You have a new notification!";
    pub const ICON: &'static str = "/logo192.png";
    pub const BADGE: &'static str = "/logo192.png";
    pub const ACTION: &'static str = "open";
    pub const ACTION_TITLE: &'static str = "Open";
    pub const CLICK_URL: &'static str = "/";
}

/// Caps on in-memory bookkeeping. The oldest entry makes room first.
pub struct LimitsConfig;

impl LimitsConfig {
    /// Pages tracked by the client registry.
    pub const MAX_CLIENTS: usize = 256;
    /// Notifications kept on screen.
    pub const MAX_VISIBLE_NOTIFICATIONS: usize = 64;
}

/// Which generations a cache lookup may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupScope {
    /// Only the instance's own generation.
    Generation,
    /// The instance's own generation first, then every other generation in
    /// creation order. Leftovers of a not-yet-evicted generation can answer.
    #[default]
    AllGenerations,
}

/// Notification rendering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub fallback_body: String,
    pub icon: String,
    pub badge: String,
    pub action: String,
    pub action_title: String,
    /// Destination opened when the notification action is clicked.
    pub click_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: NotificationDefaults::TITLE.to_string(),
            fallback_body: NotificationDefaults::FALLBACK_BODY.to_string(),
            icon: NotificationDefaults::ICON.to_string(),
            badge: NotificationDefaults::BADGE.to_string(),
            action: NotificationDefaults::ACTION.to_string(),
            action_title: NotificationDefaults::ACTION_TITLE.to_string(),
            click_url: NotificationDefaults::CLICK_URL.to_string(),
        }
    }
}

/// Per-deployment coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Version tag of this build. Names the cache generation it owns.
    pub version: String,
    /// Paths fetched and cached verbatim at install time.
    pub manifest: Vec<String>,
    /// Requests whose path contains this segment are cached on the fly.
    pub api_segment: String,
    pub lookup_scope: LookupScope,
    /// Upper bound for one upstream fetch. `None` waits forever.
    pub fetch_timeout_secs: Option<u64>,
    pub notification: NotificationConfig,
}

impl CoordinatorConfig {
    pub const DEFAULT_VERSION: &'static str = "v1";
    pub const DEFAULT_API_SEGMENT: &'static str = "/api/";
    pub const DEFAULT_MANIFEST: [&'static str; 5] = [
        "/",
        "/index.html",
        "/static/css/main.css",
        "/static/js/bundle.js",
        "/logo192.png",
    ];

    /// Load a configuration file, falling back to defaults for missing fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::io_with_path(e, path))?;
        let config: CoordinatorConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(CoordinatorError::Config {
                message: "version must not be empty".to_string(),
            });
        }
        if self.api_segment.is_empty() {
            return Err(CoordinatorError::Config {
                message: "api_segment must not be empty".to_string(),
            });
        }
        if let Some(path) = self.manifest.iter().find(|p| !p.starts_with('/')) {
            return Err(CoordinatorError::Config {
                message: format!("manifest entry must be origin-relative: {}", path),
            });
        }
        if self.fetch_timeout_secs == Some(0) {
            return Err(CoordinatorError::Config {
                message: "fetch_timeout_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Same configuration with a different version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            version: Self::DEFAULT_VERSION.to_string(),
            manifest: Self::DEFAULT_MANIFEST.iter().map(|p| p.to_string()).collect(),
            api_segment: Self::DEFAULT_API_SEGMENT.to_string(),
            lookup_scope: LookupScope::default(),
            fetch_timeout_secs: Some(NetworkConfig::REQUEST_TIMEOUT.as_secs()),
            notification: NotificationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.manifest.len(), 5);
        assert_eq!(config.lookup_scope, LookupScope::AllGenerations);
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PathsConfig::CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"{"version": "2024.06.1", "lookup_scope": "generation", "notification": {"title": "Listings"}}"#,
        )
        .unwrap();

        let config = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(config.version, "2024.06.1");
        assert_eq!(config.lookup_scope, LookupScope::Generation);
        assert_eq!(config.notification.title, "Listings");
        assert_eq!(
            config.notification.fallback_body,
            NotificationDefaults::FALLBACK_BODY
        );
        assert_eq!(config.api_segment, "/api/");
    }

    #[test]
    fn test_validate_rejects_relative_manifest_entry() {
        let mut config = CoordinatorConfig::default();
        config.manifest.push("static/app.js".to_string());
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_version() {
        let config = CoordinatorConfig::default().with_version("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = CoordinatorConfig::load("/nonexistent/coordinator.json");
        assert!(matches!(result, Err(CoordinatorError::Io { .. })));
    }
}

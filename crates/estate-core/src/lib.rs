//! Estate Cache - Versioned resource cache and update-lifecycle coordinator.
//!
//! This crate keeps the listings frontend usable from a local cache and
//! rolls new versions of it out without mixing old and new assets. It has no
//! HTTP server of its own; the `estate-proxy` binary drives it.
//!
//! - [`Registration`] holds the active coordinator instance and the one
//!   waiting to replace it, and drives install and activation.
//! - [`cache`] stores responses in named generations, one per version.
//! - [`interceptor`] answers requests cache-first and caches API responses
//!   on the fly.
//! - [`notifications`] turns push messages into notifications and clicks
//!   into navigation.
//!
//! # Example
//!
//! ```rust,ignore
//! use estate_cache::{FetchRequest, Registration};
//!
//! #[tokio::main]
//! async fn main() -> estate_cache::Result<()> {
//!     let registration = Registration::builder()
//!         .data_dir("/var/lib/estate-cache")
//!         .upstream("http://127.0.0.1:3000")
//!         .build()?;
//!
//!     registration.restore().await?;
//!     registration.deploy("v2").await?;
//!
//!     let outcome = registration.handle_fetch(&FetchRequest::get("/index.html")).await?;
//!     println!("{} from {:?}", outcome.response.status, outcome.source);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod models;
pub mod network;
pub mod notifications;

// Re-export commonly used types
pub use cache::{CacheStorage, GenerationHandle, SqliteCacheStorage, StorageStats};
pub use config::{CoordinatorConfig, LookupScope, NotificationConfig};
pub use error::{CoordinatorError, Result};
pub use interceptor::{FetchOutcome, WriteBack};
pub use lifecycle::{
    ActivationReport, Client, ClientRegistry, CoordinatorInstance, DeployOutcome,
    InstallReport, InstanceState, Registration, RegistrationBuilder, RegistrationStatus,
};
pub use models::{
    FetchRequest, NavigationAction, Notification, RequestKey, ResponseSnapshot, ResponseSource,
};
pub use network::{Fetcher, HttpFetcher};
pub use notifications::NotificationDispatcher;

//! Estate Proxy - HTTP front for the cache coordinator.
//!
//! Sits between the listings frontend and its origin. Page requests are
//! answered cache-first by the active coordinator instance; a small admin
//! surface under `/__coordinator/` drives deploys and push notifications.

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use estate_cache::config::PathsConfig;
use estate_cache::{CoordinatorConfig, DeployOutcome, Registration};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "estate-proxy")]
#[command(about = "Cache-first HTTP front for the listings frontend")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Origin serving the frontend and its API
    #[arg(long)]
    upstream: String,

    /// Directory for the cache database (defaults to the user data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Coordinator configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Version tag to deploy at startup (overrides the config file)
    #[arg(long = "version", value_name = "TAG")]
    deploy_version: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(PathsConfig::DATA_DIR_NAME))
        .context("No local data directory on this platform; pass --data-dir")
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<CoordinatorConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = data_dir.join(PathsConfig::CONFIG_FILENAME);
            if !path.exists() {
                return Ok(CoordinatorConfig::default());
            }
            path
        }
    };

    info!("Loading configuration from {}", path.display());
    CoordinatorConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Estate Proxy");

    Url::parse(&args.upstream)
        .with_context(|| format!("Invalid upstream origin '{}'", args.upstream))?;

    let data_dir = match args.data_dir {
        Some(path) => path,
        None => default_data_dir()?,
    };
    info!("Data directory: {}", data_dir.display());

    let mut config = load_config(args.config.as_deref(), &data_dir)?;
    if let Some(version) = args.deploy_version {
        config = config.with_version(version);
    }
    let version = config.version.clone();

    let registration = Registration::builder()
        .config(config)
        .data_dir(&data_dir)
        .upstream(args.upstream.clone())
        .build()?;

    if let Some(restored) = registration.restore().await? {
        info!("Resuming with coordinator {}", restored);
    }

    // A failed deploy leaves the restored instance (if any) in charge
    match registration.deploy(&version).await {
        Ok(DeployOutcome::AlreadyActive { .. }) => info!("Coordinator {} already active", version),
        Ok(DeployOutcome::Activated { install, .. }) => info!(
            "Deployed coordinator {} ({} entries cached)",
            version, install.entries
        ),
        Err(e) => warn!("Deploy of {} failed: {}", version, e),
    }

    let addr = server::start_server(Arc::new(registration), &args.host, args.port).await?;

    // Machine-readable port line for supervisors and tests
    println!("PROXY_PORT={}", addr.port());

    info!("Proxy running on {} in front of {}", addr, args.upstream);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}

//! HTTP server implementation using Axum.

use crate::handler::{
    handle_deploy, handle_health, handle_intercept, handle_notification_click, handle_push,
    handle_status,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use estate_cache::config::NetworkConfig;
use estate_cache::Registration;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub registration: Arc<Registration>,
}

/// Build the router.
///
/// Admin routes live under `/__coordinator/`; everything else is a page
/// request for the coordinator. CORS applies to the admin routes only so
/// proxied responses carry nothing the origin did not send.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/deploy", post(handle_deploy))
        .route("/push", post(handle_push))
        .route("/notifications/:id/click", post(handle_notification_click))
        .layer(cors);

    Router::new()
        .nest("/__coordinator", admin)
        .fallback(handle_intercept)
        .layer(DefaultBodyLimit::max(NetworkConfig::MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the proxy.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    registration: Arc<Registration>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState { registration });
    let app = router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

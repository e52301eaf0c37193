//! Request handlers.

use crate::server::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use estate_cache::config::NetworkConfig;
use estate_cache::network::is_hop_by_hop;
use estate_cache::{CoordinatorError, FetchRequest, ResponseSnapshot, WriteBack};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Body of `POST /__coordinator/deploy`.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub version: String,
}

/// Query of `POST /__coordinator/notifications/:id/click`.
#[derive(Debug, Default, Deserialize)]
pub struct ClickParams {
    pub action: Option<String>,
}

/// Headers the proxy never copies between the two sides.
fn is_framing_header(name: &str) -> bool {
    is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length")
}

fn error_response(err: &CoordinatorError) -> Response {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn handle_status(State(state): State<Arc<AppState>>) -> Response {
    match state.registration.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_deploy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeployRequest>,
) -> Response {
    match state.registration.deploy(&request.version).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!("Deploy of {} failed: {}", request.version, e);
            error_response(&e)
        }
    }
}

/// Deliver a push message. The raw body is the payload; an empty body
/// counts as no payload.
pub async fn handle_push(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload = (!body.is_empty()).then_some(body.as_ref());
    match state.registration.push(payload).await {
        Ok(notification) => Json(notification).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_notification_click(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ClickParams>,
) -> Response {
    match state
        .registration
        .notification_click(&id, params.action.as_deref())
        .await
    {
        Ok(navigation) => Json(navigation).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Every non-admin request: hand it to the coordinator.
///
/// Failures answer `502 Bad Gateway` with an empty body.
pub async fn handle_intercept(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, NetworkConfig::MAX_REQUEST_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut fetch = FetchRequest::new(parts.method.as_str(), url);
    for (name, value) in &parts.headers {
        if is_framing_header(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            fetch = fetch.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        fetch = fetch.with_body(body);
    }

    match state.registration.handle_fetch(&fetch).await {
        Ok(outcome) => {
            debug!("{} answered from {:?}", fetch.key(), outcome.source);
            if let Some(write_back) = outcome.write_back {
                watch_write_back(write_back);
            }
            snapshot_response(outcome.response)
        }
        Err(e) => {
            warn!("Interception failed for {}: {}", fetch.key(), e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Log a failed write-back without holding up the response.
fn watch_write_back(write_back: WriteBack) {
    tokio::spawn(async move {
        let key = write_back.key().to_string();
        let generation = write_back.generation().to_string();
        if let Err(e) = write_back.wait().await {
            warn!("Write-back of {} into {} failed: {}", key, generation, e);
        }
    });
}

/// Replay a stored or fetched response to the page.
fn snapshot_response(snapshot: ResponseSnapshot) -> Response {
    let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &snapshot.headers {
        if !is_framing_header(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    builder
        .body(Body::from(snapshot.body))
        .unwrap_or_else(|e| {
            warn!("Cannot replay response: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use async_trait::async_trait;
    use axum::http::Request as HttpRequest;
    use estate_cache::{Fetcher, Registration, SqliteCacheStorage};
    use serde_json::Value;
    use tower::ServiceExt;

    /// Origin with a fixed set of pages; anything else fails to connect.
    struct FixedOrigin;

    #[async_trait]
    impl Fetcher for FixedOrigin {
        async fn fetch(&self, request: &FetchRequest) -> estate_cache::Result<ResponseSnapshot> {
            if request.url == "/down" {
                return Err(CoordinatorError::Network {
                    message: "connection refused".to_string(),
                    cause: None,
                });
            }
            Ok(ResponseSnapshot::ok(format!("origin {}", request.url))
                .with_header("content-type", "text/plain")
                .with_header("connection", "close"))
        }
    }

    fn app() -> (axum::Router, Arc<Registration>) {
        let registration = Arc::new(
            Registration::builder()
                .store(Arc::new(SqliteCacheStorage::in_memory().unwrap()))
                .fetcher(Arc::new(FixedOrigin))
                .build()
                .unwrap(),
        );
        let state = Arc::new(AppState {
            registration: registration.clone(),
        });
        (router(state), registration)
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[test]
    fn test_snapshot_response_drops_framing_headers() {
        let response = snapshot_response(
            ResponseSnapshot::ok("hello")
                .with_header("etag", "\"abc\"")
                .with_header("transfer-encoding", "chunked")
                .with_header("content-length", "999"),
        );

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("etag").unwrap(), "\"abc\"");
        assert!(response.headers().get("transfer-encoding").is_none());
        assert!(response.headers().get("content-length").is_none());
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&CoordinatorError::NothingWaiting);
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = error_response(&CoordinatorError::NoActiveInstance);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(
                HttpRequest::get("/__coordinator/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_pass_through_without_controller() {
        let (app, _) = app();
        let response = app
            .oneshot(HttpRequest::get("/listings").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("connection").is_none());
        assert_eq!(body_bytes(response).await.as_ref(), b"origin /listings");
    }

    #[tokio::test]
    async fn test_network_failure_is_bad_gateway_without_body() {
        let (app, _) = app();
        let response = app
            .oneshot(HttpRequest::get("/down").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_push_requires_active_instance() {
        let (app, _) = app();
        let response = app
            .oneshot(
                HttpRequest::post("/__coordinator/push")
                    .body(Body::from("Open house Saturday"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_deploy_then_push_and_click() {
        let (app, registration) = app();

        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/__coordinator/deploy")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"version":"v7"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["outcome"], "activated");
        assert_eq!(registration.controller().await.unwrap().version(), "v7");

        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/__coordinator/push")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let notification: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(notification["body"], "You have a new notification!");

        let id = notification["id"].as_str().unwrap();
        let response = app
            .oneshot(
                HttpRequest::post(format!("/__coordinator/notifications/{}/click?action=open", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let navigation: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(navigation["type"], "open_window");
        assert_eq!(navigation["url"], "/");
    }
}

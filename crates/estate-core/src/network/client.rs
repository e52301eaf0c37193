//! HTTP fetcher for the site's origin.
//!
//! Provides a wrapper around reqwest with:
//! - Origin-relative request resolution
//! - Optional per-request timeout
//! - Hop-by-hop header filtering in both directions

use crate::config::NetworkConfig;
use crate::error::{CoordinatorError, Result};
use crate::models::{FetchRequest, ResponseSnapshot};
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Headers that describe one connection, not the resource.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Whether a header must not be forwarded or replayed.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot>;
}

/// Fetcher that talks to the real origin over HTTP.
pub struct HttpFetcher {
    client: Client,
    origin: Url,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    /// Create a fetcher for `origin` with the default timeout.
    pub fn new(origin: &str) -> Result<Self> {
        Self::with_timeout(origin, Some(NetworkConfig::REQUEST_TIMEOUT))
    }

    /// Create a fetcher with a custom timeout. `None` never times out.
    pub fn with_timeout(origin: &str, timeout: Option<Duration>) -> Result<Self> {
        let origin = Url::parse(origin).map_err(|e| CoordinatorError::Config {
            message: format!("Invalid upstream origin '{}': {}", origin, e),
        })?;

        let mut builder = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            // Redirects are replayed to the page verbatim, not followed here
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| CoordinatorError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            cause: None,
        })?;

        Ok(Self {
            client,
            origin,
            timeout,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Map a reqwest failure while sending or reading a response.
    fn transport_error(
        &self,
        request: &FetchRequest,
        url: &Url,
        err: reqwest::Error,
    ) -> CoordinatorError {
        if err.is_timeout() {
            CoordinatorError::Timeout(self.timeout.unwrap_or_default())
        } else {
            CoordinatorError::Network {
                message: format!("{} {} failed: {}", request.method, url, err),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }

    /// Resolve an origin-relative URL against the upstream origin.
    ///
    /// Anything that resolves off the origin (another scheme, host or
    /// port) is rejected.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        let resolved = self.origin.join(url).map_err(|e| CoordinatorError::Config {
            message: format!("Cannot resolve '{}' against {}: {}", url, self.origin, e),
        })?;

        if resolved.origin() != self.origin.origin() {
            return Err(CoordinatorError::Config {
                message: format!("'{}' resolves outside of {}", url, self.origin),
            });
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<ResponseSnapshot> {
        let url = self.resolve(&request.url)?;
        let method = Method::from_str(&request.method).map_err(|e| CoordinatorError::Other(
            format!("Invalid HTTP method '{}': {}", request.method, e),
        ))?;

        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(request, &url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(request, &url, e))?;

        debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());

        Ok(ResponseSnapshot {
            status,
            headers,
            body,
        })
    }
}

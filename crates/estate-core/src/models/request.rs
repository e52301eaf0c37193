//! Intercepted requests and their cache identity.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A request issued by a controlled page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Upper-cased HTTP method.
    pub method: String,
    /// Origin-relative URL (path and query).
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: impl AsRef<str>, url: impl AsRef<str>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: normalize_url(url.as_ref()),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl AsRef<str>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Only idempotent reads have a meaningful cache identity.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == "GET"
    }

    /// The path portion of the URL, without query string or fragment.
    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Identity of a cached entry: method plus origin-relative URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    pub fn new(method: impl AsRef<str>, url: impl AsRef<str>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: normalize_url(url.as_ref()),
        }
    }

    pub fn get(url: impl AsRef<str>) -> Self {
        Self::new("GET", url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Storage form, `"GET /index.html"`.
    pub fn as_storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Reduce absolute URLs to path + query; keep relative ones as given.
///
/// Fragments never reach the network and are dropped. Leading slashes
/// collapse to one so a path can never read as a protocol-relative URL.
pub fn normalize_url(raw: &str) -> String {
    let relative = match url::Url::parse(raw) {
        Ok(parsed) if parsed.has_host() => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        _ => raw.split('#').next().unwrap_or_default().to_string(),
    };
    format!("/{}", relative.trim_start_matches(['/', '\\']))
}

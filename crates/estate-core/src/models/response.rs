//! Stored and served response snapshots.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A complete, replayable HTTP response.
///
/// The body is reference-counted, so cloning a snapshot hands out another
/// copy of a single-read body without duplicating the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn size_bytes(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Cache,
    Network,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let snapshot = ResponseSnapshot::ok("{}").with_header("Content-Type", "application/json");
        assert_eq!(snapshot.header("content-type"), Some("application/json"));
        assert_eq!(snapshot.header("etag"), None);
    }

    #[test]
    fn test_success_range() {
        assert!(ResponseSnapshot::new(204, "").is_success());
        assert!(!ResponseSnapshot::new(304, "").is_success());
        assert!(!ResponseSnapshot::new(500, "").is_success());
    }

    #[test]
    fn test_clone_shares_body() {
        let original = ResponseSnapshot::ok(vec![1u8; 1024]);
        let copy = original.clone();
        assert_eq!(original.body.as_ptr(), copy.body.as_ptr());
        assert_eq!(copy.size_bytes(), 1024);
    }
}

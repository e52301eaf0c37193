//! Which network responses get cached on the fly.

use crate::models::FetchRequest;

/// Caches responses for requests whose path contains a designated segment.
///
/// The match is a substring test on the path only (the query string is
/// ignored), so every subpath under the segment qualifies: with `/api/`,
/// `/api/units`, `/api/units/204/photos` and `/v2/api/search` all match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicCachePolicy {
    segment: String,
}

impl DynamicCachePolicy {
    pub fn new(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
        }
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn matches(&self, request: &FetchRequest) -> bool {
        request.path().contains(&self.segment)
    }
}

//! Network access for the interceptor and the install step.
//!
//! This module provides:
//! - The [`Fetcher`] seam the coordinator fetches through
//! - An HTTP implementation against the site's origin

mod client;

pub use client::{is_hop_by_hop, Fetcher, HttpFetcher};

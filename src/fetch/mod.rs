//! Retrieval of the upstream GTFS-RT feed.
//!
//! One GET per call, bounded by a timeout, decoded with [`parse_feed`]. Retry
//! policy lives in [`crate::scheduler`], not here.

mod basic;
mod client;
mod source;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use source::{FeedSource, HttpFeed};

use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;
use tracing::debug;

use crate::error::FetchError;
use crate::gtfs_rt::FeedMessage;
use crate::parser::parse_feed;

/// Performs a GET and returns the body of a successful response.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &Url) -> Result<Bytes, FetchError> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.clone());

    let resp = client.execute(req).await.map_err(FetchError::Network)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    resp.bytes().await.map_err(FetchError::Network)
}

/// Fetches and decodes one feed message.
///
/// # Errors
///
/// [`FetchError::Timeout`] if the request and body read together exceed
/// `timeout`, [`FetchError::Network`] or [`FetchError::Status`] for transport
/// problems, [`FetchError::Malformed`] if the body is not a `FeedMessage`.
#[tracing::instrument(skip_all, fields(url = %url))]
pub async fn fetch_feed<C: HttpClient>(
    client: &C,
    url: &Url,
    timeout: Duration,
) -> Result<FeedMessage, FetchError> {
    let bytes = tokio::time::timeout(timeout, fetch_bytes(client, url))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;
    debug!(bytes = bytes.len(), "Feed bytes received, parsing");

    let feed = parse_feed(&bytes)?;
    debug!(entity_count = feed.entity.len(), "Feed parsed successfully");

    Ok(feed)
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use super::{HttpClient, fetch_feed};
use crate::error::FetchError;
use crate::gtfs_rt::FeedMessage;

/// Something that can produce one decoded feed per call.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<FeedMessage, FetchError>;
}

/// A [`FeedSource`] backed by a GET against a fixed URL.
pub struct HttpFeed<C> {
    client: C,
    url: Url,
    timeout: Duration,
}

impl<C: HttpClient> HttpFeed<C> {
    pub fn new(client: C, url: Url, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for HttpFeed<C> {
    async fn fetch(&self) -> Result<FeedMessage, FetchError> {
        fetch_feed(&self.client, &self.url, self.timeout).await
    }
}

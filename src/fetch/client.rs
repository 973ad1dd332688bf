use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes a prepared request. The seam tests use to stand in for upstream.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

use std::time::Duration;

use gator_core::error::AppError;
use gator_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; MechGator/1.0)";
const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8";

/// HTTP fetcher using reqwest.
///
/// Sends a browser-like User-Agent, accepts both HTML and JSON, and maps
/// non-2xx responses to [`AppError::HttpError`].
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::build(timeout, DEFAULT_USER_AGENT)
    }

    pub fn build(timeout: Duration, user_agent: &str) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let parsed =
            Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::HttpError(format!(
                "URL scheme '{}' is not allowed (only http/https)",
                parsed.scheme()
            )));
        }

        tracing::debug!(url, "Fetching");
        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(msg) if msg.contains("not allowed")));
    }

    #[tokio::test]
    async fn test_rejects_unparseable_url() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch("shop.test/products.json").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(_)));
    }
}

//! Plain HTTP fetcher built on `reqwest`.

use super::{Document, Fetcher, USER_AGENT};
use crate::error::ScrapeError;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Fetches pages and documents over HTTP(S) with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a client with the portal-friendly User-Agent and a per-request
    /// timeout.
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/pdf;q=0.9,*/*;q=0.8"),
        );
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    async fn get(&self, url: &str) -> Result<Response, ScrapeError> {
        let response = self.client.get(url).send().await.map_err(|e| self.classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            ScrapeError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            ScrapeError::Http(e)
        }
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        let t0 = Instant::now();
        let response = self.get(url).await?;
        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(body)
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_document(&self, url: &str) -> Result<Document, ScrapeError> {
        let t0 = Instant::now();
        let response = self.get(url).await?;
        let final_url = response.url().to_string();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let disposition = header(CONTENT_DISPOSITION);
        let bytes = response.bytes().await.map_err(|e| self.classify(url, e))?;
        debug!(
            bytes = bytes.len(),
            content_type = content_type.as_deref().unwrap_or("-"),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched document"
        );
        Ok(Document {
            bytes: bytes.to_vec(),
            content_type,
            disposition,
            final_url,
        })
    }
}

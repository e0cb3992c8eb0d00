//! HTTP JSON fetcher
//!
//! GETs a JSON array of records. With `max_pages` set, requests carry
//! `page=N` and paging stops at the first empty page or at the limit.

use super::{split_records, FetchError, FetchPage, RequestGate, SourceFetcher};
use crate::error::{PipelineError, PipelineResult};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("localist/", env!("CARGO_PKG_VERSION"));

pub struct HttpJsonFetcher {
    client: Client,
    url: String,
    api_key: Option<String>,
    max_pages: Option<u32>,
}

impl HttpJsonFetcher {
    pub fn new(url: String, api_key: Option<String>, max_pages: Option<u32>) -> PipelineResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Fetch(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            api_key,
            max_pages,
        })
    }
}

#[async_trait::async_trait]
impl SourceFetcher for HttpJsonFetcher {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_page(&self, page: u32, gate: &RequestGate) -> Result<Option<FetchPage>, FetchError> {
        match self.max_pages {
            None if page > 1 => return Ok(None),
            Some(limit) if page > limit => return Ok(None),
            _ => {}
        }

        gate.wait().await;

        let mut request = self.client.get(&self.url);
        if self.max_pages.is_some() {
            request = request.query(&[("page", page)]);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(url = %self.url, page, "Fetching raw records");

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Fatal(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Fatal(format!("{} rejected credentials ({})", self.url, status)));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal(format!("{} returned {}", self.url, status)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::Item(format!("page {} is not valid JSON: {}", page, e)))?;
        let items = split_records(body).map_err(|e| FetchError::Item(format!("page {}: {}", page, e)))?;

        if items.is_empty() && self.max_pages.is_some() {
            return Ok(None);
        }

        Ok(Some(FetchPage {
            items,
            failures: Vec::new(),
        }))
    }
}

//! Source fetchers
//!
//! A fetcher hands the Collector pages of raw JSON records. How it gets
//! them (files, HTTP) stays behind [`SourceFetcher`]; the Collector only
//! needs the [`RawRecord`] shape.

pub mod http_json;
pub mod json_file;

pub use http_json::HttpJsonFetcher;
pub use json_file::JsonFileFetcher;

use crate::error::PipelineResult;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use localist_common::config::{FetcherConfig, SourceConfig};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Fetch failure classes
#[derive(Debug, Error)]
pub enum FetchError {
    /// Source-level failure (auth, transport, missing input); ends the run
    #[error("{0}")]
    Fatal(String),

    /// A page that could not be used; counted and paging stops
    #[error("{0}")]
    Item(String),
}

/// One page of raw records
#[derive(Debug, Default)]
pub struct FetchPage {
    pub items: Vec<Value>,
    /// Elements or files that could not be read, one message each
    pub failures: Vec<String>,
}

/// Blocking floor between two outbound requests to the same source
///
/// The first request passes immediately; each later one waits until at
/// least the configured interval has elapsed since the previous permit.
pub struct RequestGate {
    limiter: Option<DefaultDirectRateLimiter>,
    interval: Duration,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        // One permit per period, no burst
        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            limiter,
            interval: min_interval,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for permission to send the next request
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Page-oriented access to one external source
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Human-readable origin for logs
    fn describe(&self) -> String;

    /// Fetch page `page` (1-based); `Ok(None)` when there are no more pages
    async fn fetch_page(&self, page: u32, gate: &RequestGate) -> Result<Option<FetchPage>, FetchError>;
}

/// Normalized raw record, the only shape the Collector relies on
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "city_id")]
    pub city: Option<String>,
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude", alias = "lon")]
    pub lng: Option<f64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, alias = "rating_scale")]
    pub rating_scale: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "list_position", alias = "rank")]
    pub list_position: Option<i64>,
    #[serde(default, alias = "mention_count")]
    pub mention_count: Option<i64>,
    #[serde(default, alias = "review_count")]
    pub review_count: Option<i64>,
    #[serde(
        default,
        alias = "source_native_id",
        alias = "id",
        deserialize_with = "string_or_number"
    )]
    pub source_native_id: Option<String>,
}

impl RawRecord {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        RawRecord::deserialize(value)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Build the fetcher a source is configured with
///
/// Relative file paths resolve under the root folder.
pub fn fetcher_from_config(source: &SourceConfig, root_folder: &Path) -> PipelineResult<Box<dyn SourceFetcher>> {
    match &source.fetcher {
        FetcherConfig::JsonFile { path } => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                root_folder.join(path)
            };
            Ok(Box::new(JsonFileFetcher::new(path)))
        }
        FetcherConfig::HttpJson {
            url,
            api_key_env,
            max_pages,
        } => {
            let api_key = api_key_env.as_deref().and_then(|var| match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    tracing::warn!(source_id = %source.id, env = var, "API key variable not set");
                    None
                }
            });
            Ok(Box::new(HttpJsonFetcher::new(url.clone(), api_key, *max_pages)?))
        }
    }
}

/// Split a JSON document into records: an array, or an object wrapping one
pub(crate) fn split_records(document: Value) -> Result<Vec<Value>, String> {
    match document {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["results", "items", "venues", "data"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            Err("expected a JSON array of records".to_string())
        }
        _ => Err("expected a JSON array of records".to_string()),
    }
}

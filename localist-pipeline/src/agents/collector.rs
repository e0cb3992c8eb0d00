//! Source Collector
//!
//! One per data source. Pulls pages from the source's fetcher and upserts
//! them as Bronze rows keyed by (source_id, source_native_id). Each page is
//! committed before the next is requested, so a source failure mid-run
//! keeps everything already written.

use super::AgentContext;
use crate::db::bronze::{self, NewBronzeRecord};
use crate::error::{PipelineError, PipelineResult};
use crate::fetchers::{FetchError, RawRecord, RequestGate, SourceFetcher};
use crate::types::{Agent, MetricsCell, RunCounters};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use localist_common::db::models::{AgentKind, DataSource};
use localist_common::events::PipelineEvent;
use localist_common::{time, Payload};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Default scale assumed for a rating that does not state one
const DEFAULT_RATING_SCALE: f64 = 5.0;

pub struct Collector {
    name: String,
    source: DataSource,
    default_city: Option<String>,
    fetcher: Box<dyn SourceFetcher>,
    gate: RequestGate,
    ctx: AgentContext,
    metrics: MetricsCell,
}

impl Collector {
    pub fn new(
        ctx: AgentContext,
        source: DataSource,
        default_city: Option<String>,
        fetcher: Box<dyn SourceFetcher>,
    ) -> Self {
        let gate = RequestGate::from_millis(source.min_request_interval_ms.max(0) as u64);
        Self {
            name: format!("collector:{}", source.id),
            source,
            default_city,
            fetcher,
            gate,
            ctx,
            metrics: MetricsCell::default(),
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Turn one raw JSON element into a Bronze row for this source
    pub fn normalize(&self, value: &Value, fetched_at: DateTime<Utc>) -> PipelineResult<NewBronzeRecord> {
        if !value.is_object() {
            return Err(PipelineError::InvalidRecord("record is not a JSON object".to_string()));
        }
        let raw = RawRecord::from_value(value)
            .map_err(|e| PipelineError::InvalidRecord(e.to_string()))?;

        let name = raw
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PipelineError::InvalidRecord("record has no name".to_string()))?
            .to_string();

        let city = raw
            .city
            .as_deref()
            .or(self.default_city.as_deref())
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PipelineError::InvalidRecord(format!("'{}' has no city", name)))?;

        if let Some(lat) = raw.lat {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(PipelineError::InvalidRecord(format!("'{}' latitude {} out of range", name, lat)));
            }
        }
        if let Some(lng) = raw.lng {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(PipelineError::InvalidRecord(format!("'{}' longitude {} out of range", name, lng)));
            }
        }

        let rating_scale = match (raw.rating, raw.rating_scale) {
            (_, Some(scale)) if scale <= 0.0 => {
                return Err(PipelineError::InvalidRecord(format!("'{}' has rating scale {}", name, scale)));
            }
            (_, Some(scale)) => Some(scale),
            (Some(_), None) => Some(DEFAULT_RATING_SCALE),
            (None, None) => None,
        };

        let source_native_id = raw
            .source_native_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{}_{}", name, city));

        Ok(NewBronzeRecord {
            kind: self.source.source_type.bronze_kind(),
            source_id: self.source.id.clone(),
            source_native_id,
            name,
            address: raw.address.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
            city,
            latitude: raw.lat,
            longitude: raw.lng,
            category: raw.category,
            cuisine: raw.cuisine,
            tags: raw.tags,
            rating: raw.rating,
            rating_scale,
            review_count: raw.review_count,
            list_position: raw.list_position.filter(|p| *p > 0),
            mention_count: Some(raw.mention_count.unwrap_or(1)),
            raw_payload: Payload::from(value.clone()),
            fetched_at,
        })
    }

    async fn store(&self, value: &Value, counters: &mut RunCounters) {
        let record = match self.normalize(value, time::now()) {
            Ok(record) => record,
            Err(e) => {
                counters.failed += 1;
                warn!(agent = %self.name, error = %e, "Skipping raw record");
                return;
            }
        };

        let max_wait = self.ctx.settings.max_lock_wait_ms;
        let result = retry_on_lock("bronze upsert", max_wait, || bronze::upsert_record(&self.ctx.pool, &record)).await;

        match result {
            Ok(outcome) if outcome.created => counters.created += 1,
            Ok(_) => counters.updated += 1,
            Err(e) => {
                counters.failed += 1;
                warn!(
                    agent = %self.name,
                    native_id = %record.source_native_id,
                    error = %e,
                    "Failed to upsert Bronze record"
                );
            }
        }
    }

    fn announce(&self, created: u64) {
        if created > 0 {
            self.ctx.events.emit_lossy(PipelineEvent::BronzeInserted {
                source_id: self.source.id.clone(),
                created,
                timestamp: time::now(),
            });
        }
    }
}

#[async_trait::async_trait]
impl Agent for Collector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Collector
    }

    async fn execute(&self, counters: &mut RunCounters) -> PipelineResult<()> {
        info!(
            agent = %self.name,
            origin = %self.fetcher.describe(),
            min_interval_ms = self.gate.interval().as_millis() as u64,
            "Collecting"
        );

        let mut page = 1u32;
        loop {
            let fetched = match self.fetcher.fetch_page(page, &self.gate).await {
                Ok(Some(fetched)) => fetched,
                Ok(None) => break,
                Err(FetchError::Item(message)) => {
                    counters.failed += 1;
                    counters.warn(format!("{}: {}", self.name, message));
                    break;
                }
                Err(FetchError::Fatal(message)) => {
                    self.announce(counters.created);
                    return Err(PipelineError::SourceFailure {
                        source_id: self.source.id.clone(),
                        message,
                    });
                }
            };

            debug!(agent = %self.name, page, items = fetched.items.len(), "Fetched page");

            for failure in &fetched.failures {
                counters.failed += 1;
                warn!(agent = %self.name, error = %failure, "Unreadable raw input");
            }

            for value in &fetched.items {
                counters.processed += 1;
                self.store(value, counters).await;
            }

            page += 1;
        }

        self.announce(counters.created);
        Ok(())
    }

    fn metrics_cell(&self) -> &MetricsCell {
        &self.metrics
    }
}

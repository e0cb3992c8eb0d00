//! Reconciler
//!
//! Matches pending Bronze records against active Silver venues of the same
//! city. Above the similarity threshold the record is folded into the best
//! candidate; otherwise it seeds a new venue. Claim, match and mapping for
//! one record share a transaction, so two overlapping runs can never map
//! the same record twice.

use super::AgentContext;
use crate::db::{bronze, mappings, silver};
use crate::error::PipelineResult;
use crate::matching::best_match;
use crate::types::{Agent, MetricsCell, RunCounters};
use crate::utils::retry_on_lock;
use localist_common::db::models::{AgentKind, BronzeRecord};
use localist_common::events::PipelineEvent;
use localist_common::{time, Result};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// What happened to one claimed record
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub silver_id: String,
    /// False when the record seeded a new venue
    pub merged: bool,
    pub match_confidence: f64,
    pub source_count: i64,
}

pub struct Reconciler {
    ctx: AgentContext,
    metrics: MetricsCell,
}

impl Reconciler {
    pub const NAME: &'static str = "reconciler";

    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            metrics: MetricsCell::default(),
        }
    }

    /// Claim and reconcile one record
    ///
    /// `Ok(None)` means another runner claimed it first.
    pub async fn reconcile_record(&self, record: &BronzeRecord) -> Result<Option<ReconcileOutcome>> {
        let settings = &self.ctx.settings;
        let mut tx = self.ctx.pool.begin().await?;

        if !bronze::claim_record(&mut *tx, record.kind, &record.id).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let candidates = silver::active_in_city(&mut *tx, &record.city).await?;
        let best = best_match(record, &candidates, settings.proximity_meters);

        let (silver_id, merged, match_confidence) = match best {
            Some((idx, score)) if score.total > settings.similarity_threshold => {
                let venue = &candidates[idx];
                debug!(
                    bronze_id = %record.id,
                    silver_id = %venue.id,
                    score = score.total,
                    distance_m = score.distance_meters,
                    "Matched existing venue"
                );
                silver::absorb_record(&mut *tx, &venue.id, record).await?;
                (venue.id.clone(), true, score.total)
            }
            best => {
                let id = silver::insert_from_record(&mut *tx, record).await?;
                debug!(
                    bronze_id = %record.id,
                    silver_id = %id,
                    best_score = best.map(|(_, s)| s.total),
                    "Created venue"
                );
                (id, false, 1.0)
            }
        };

        mappings::insert_mapping(&mut *tx, &silver_id, record, match_confidence).await?;
        let (source_count, _) = silver::refresh_source_stats(&mut *tx, &silver_id).await?;

        tx.commit().await?;

        Ok(Some(ReconcileOutcome {
            silver_id,
            merged,
            match_confidence,
            source_count,
        }))
    }
}

#[async_trait::async_trait]
impl Agent for Reconciler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Reconciler
    }

    async fn execute(&self, counters: &mut RunCounters) -> PipelineResult<()> {
        let pool = &self.ctx.pool;
        let settings = &self.ctx.settings;

        let pending = bronze::pending_with_coordinates(pool, settings.reconcile_batch_size).await?;
        let waiting = bronze::count_pending_without_coordinates(pool).await?;
        if waiting > 0 {
            counters.skipped += waiting as u64;
            counters.warn(format!("{} pending Bronze records have no coordinates", waiting));
        }

        info!(pending = pending.len(), "Reconciling Bronze records");

        let mut cities = BTreeSet::new();
        let mut touched = 0u64;

        for record in &pending {
            counters.processed += 1;

            let result = retry_on_lock("reconcile record", settings.max_lock_wait_ms, || {
                self.reconcile_record(record)
            })
            .await;

            match result {
                Ok(Some(outcome)) => {
                    if outcome.merged {
                        counters.updated += 1;
                    } else {
                        counters.created += 1;
                    }
                    touched += 1;
                    cities.insert(record.city.clone());
                }
                Ok(None) => {
                    counters.skipped += 1;
                    debug!(bronze_id = %record.id, "Record already claimed");
                }
                Err(e) => {
                    counters.failed += 1;
                    warn!(bronze_id = %record.id, source_id = %record.source_id, error = %e, "Reconciliation failed");
                    if let Err(mark_err) = bronze::mark_error(pool, record.kind, &record.id, &e.to_string()).await {
                        warn!(bronze_id = %record.id, error = %mark_err, "Failed to mark record as errored");
                    }
                }
            }
        }

        if touched > 0 {
            self.ctx.events.emit_lossy(PipelineEvent::SilverUpdated {
                origin: AgentKind::Reconciler,
                cities: cities.into_iter().collect(),
                venues: touched,
                timestamp: time::now(),
            });
        }

        Ok(())
    }

    fn metrics_cell(&self) -> &MetricsCell {
        &self.metrics
    }
}

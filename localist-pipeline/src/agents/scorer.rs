//! Scorer
//!
//! Recomputes aggregate expert and consumer scores of Silver venues from
//! their mapped Bronze evidence, weighted by each source's authority.
//! Only venues whose scores are older than the cooldown are revisited.

use super::AgentContext;
use crate::db::mappings::{self, SourceEvidence};
use crate::db::silver::{self, VenueScores};
use crate::error::PipelineResult;
use crate::types::{Agent, MetricsCell, RunCounters};
use crate::utils::retry_on_lock;
use localist_common::db::models::{AgentKind, SilverVenue, SourceType};
use localist_common::events::PipelineEvent;
use localist_common::time;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Position score for an expert mention without a rank
const UNRANKED_POSITION_SCORE: f64 = 0.5;
const EXPERT_SHARE: f64 = 0.7;
const CONSUMER_SHARE: f64 = 0.3;
/// Distinct sources needed before a venue counts as verified
const VERIFIED_MIN_SOURCES: usize = 2;

fn position_score(list_position: Option<i64>) -> f64 {
    match list_position {
        Some(p) if p > 0 => 1.0 / p as f64,
        _ => UNRANKED_POSITION_SCORE,
    }
}

/// `100 · Σ(w · mentions · positionScore) / Σ(w)` over expert lists
pub fn expert_score(evidence: &[SourceEvidence]) -> f64 {
    let (numerator, weights) = evidence
        .iter()
        .filter(|e| e.source_type == SourceType::ExpertList)
        .fold((0.0, 0.0), |(num, den), e| {
            let mentions = e.mention_count.unwrap_or(1).max(0) as f64;
            (
                num + e.authority_weight * mentions * position_score(e.list_position),
                den + e.authority_weight,
            )
        });

    if weights <= 0.0 {
        return 0.0;
    }
    (100.0 * numerator / weights).clamp(0.0, 100.0)
}

/// Authority-weighted mean of consumer ratings rescaled to 0..100
pub fn consumer_score(evidence: &[SourceEvidence]) -> f64 {
    let (numerator, weights) = evidence
        .iter()
        .filter(|e| e.source_type == SourceType::ConsumerReview)
        .filter_map(|e| {
            let rating = e.rating?;
            let scale = e.rating_scale.unwrap_or(5.0);
            if scale <= 0.0 {
                return None;
            }
            Some((e.authority_weight, (rating / scale * 100.0).clamp(0.0, 100.0)))
        })
        .fold((0.0, 0.0), |(num, den), (weight, normalized)| {
            (num + weight * normalized, den + weight)
        });

    if weights <= 0.0 {
        return 0.0;
    }
    (numerator / weights).clamp(0.0, 100.0)
}

pub fn compute_scores(evidence: &[SourceEvidence]) -> VenueScores {
    let expert = expert_score(evidence);
    let consumer = consumer_score(evidence);
    let sources: HashSet<&str> = evidence.iter().map(|e| e.source_id.as_str()).collect();

    VenueScores {
        expert_score: expert,
        consumer_score: consumer,
        aggregated_rating: EXPERT_SHARE * expert + CONSUMER_SHARE * consumer,
        verified: sources.len() >= VERIFIED_MIN_SOURCES,
    }
}

pub struct Scorer {
    ctx: AgentContext,
    metrics: MetricsCell,
}

impl Scorer {
    pub const NAME: &'static str = "scorer";

    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            metrics: MetricsCell::default(),
        }
    }

    /// Rescore one venue; returns true when any stored value changed
    async fn rescore(&self, venue: &SilverVenue) -> localist_common::Result<bool> {
        let evidence = mappings::evidence_for_venue(&self.ctx.pool, &venue.id).await?;
        let scores = compute_scores(&evidence);

        retry_on_lock("update scores", self.ctx.settings.max_lock_wait_ms, || {
            silver::update_scores(&self.ctx.pool, &venue.id, &scores)
        })
        .await?;

        let changed = scores.expert_score != venue.expert_score
            || scores.consumer_score != venue.consumer_score
            || scores.verified != venue.verified;

        debug!(
            silver_id = %venue.id,
            expert = scores.expert_score,
            consumer = scores.consumer_score,
            sources = evidence.len(),
            changed,
            "Scored venue"
        );
        Ok(changed)
    }
}

#[async_trait::async_trait]
impl Agent for Scorer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Scorer
    }

    async fn execute(&self, counters: &mut RunCounters) -> PipelineResult<()> {
        let cutoff = time::now() - self.ctx.settings.scorer_cooldown;
        let stale = silver::stale_for_scoring(&self.ctx.pool, cutoff).await?;

        info!(stale = stale.len(), "Scoring Silver venues");

        let mut cities = BTreeSet::new();
        for venue in &stale {
            counters.processed += 1;
            match self.rescore(venue).await {
                Ok(true) => {
                    counters.updated += 1;
                    cities.insert(venue.city.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    counters.failed += 1;
                    warn!(silver_id = %venue.id, error = %e, "Scoring failed");
                }
            }
        }

        if counters.processed > 0 && counters.failed == counters.processed {
            counters.warn(format!("Scoring failed for all {} stale venues", counters.processed));
        }

        if counters.updated > 0 {
            self.ctx.events.emit_lossy(PipelineEvent::SilverUpdated {
                origin: AgentKind::Scorer,
                cities: cities.into_iter().collect(),
                venues: counters.updated,
                timestamp: time::now(),
            });
        }

        Ok(())
    }

    fn metrics_cell(&self) -> &MetricsCell {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expert(source: &str, weight: f64, position: Option<i64>, mentions: i64) -> SourceEvidence {
        SourceEvidence {
            source_id: source.to_string(),
            source_type: SourceType::ExpertList,
            authority_weight: weight,
            rating: None,
            rating_scale: None,
            list_position: position,
            mention_count: Some(mentions),
        }
    }

    fn review(source: &str, weight: f64, rating: f64, scale: f64) -> SourceEvidence {
        SourceEvidence {
            source_id: source.to_string(),
            source_type: SourceType::ConsumerReview,
            authority_weight: weight,
            rating: Some(rating),
            rating_scale: Some(scale),
            list_position: None,
            mention_count: Some(1),
        }
    }

    #[test]
    fn test_no_evidence_scores_zero() {
        let scores = compute_scores(&[]);
        assert_eq!(scores.expert_score, 0.0);
        assert_eq!(scores.consumer_score, 0.0);
        assert_eq!(scores.aggregated_rating, 0.0);
        assert!(!scores.verified);
    }

    #[test]
    fn test_expert_score_uses_position() {
        // (1.0·1·1/1 + 1.0·1·1/4) / 2 · 100 = 62.5
        let evidence = [expert("eater", 1.0, Some(1), 1), expert("infatuation", 1.0, Some(4), 1)];
        assert!((expert_score(&evidence) - 62.5).abs() < 1e-9);
    }

    #[test]
    fn test_unranked_mention_scores_half() {
        assert!((expert_score(&[expert("blog", 2.0, None, 1)]) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_expert_score_is_clamped() {
        assert_eq!(expert_score(&[expert("guide", 1.0, Some(1), 5)]), 100.0);
    }

    #[test]
    fn test_consumer_score_weighted_mean() {
        // 4.5/5 = 90 at weight 1, 8/10 = 80 at weight 3 → (90 + 240) / 4 = 82.5
        let evidence = [review("yelp", 1.0, 4.5, 5.0), review("tripadvisor", 3.0, 8.0, 10.0)];
        assert!((consumer_score(&evidence) - 82.5).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_and_verified() {
        let evidence = [expert("eater", 1.0, Some(2), 1), review("yelp", 1.0, 4.0, 5.0)];
        let scores = compute_scores(&evidence);
        assert!((scores.expert_score - 50.0).abs() < 1e-9);
        assert!((scores.consumer_score - 80.0).abs() < 1e-9);
        assert!((scores.aggregated_rating - (0.7 * 50.0 + 0.3 * 80.0)).abs() < 1e-9);
        assert!(scores.verified);
    }

    #[test]
    fn test_directory_evidence_counts_for_verification_only() {
        let mut listing = review("osm", 1.0, 0.0, 5.0);
        listing.source_type = SourceType::Directory;
        let evidence = [listing, review("yelp", 1.0, 5.0, 5.0)];
        let scores = compute_scores(&evidence);
        assert_eq!(scores.consumer_score, 100.0);
        assert!(scores.verified);
    }
}

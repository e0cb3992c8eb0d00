//! Curator
//!
//! Ranks eligible Silver venues with a versioned curation algorithm and
//! publishes the top entries as a Gold list. The list is replaced in one
//! transaction; when nothing is eligible the previous list stays as is.

use super::AgentContext;
use crate::db::algorithms;
use crate::db::gold::{self, NewGoldItem, NewGoldList};
use crate::db::mappings;
use crate::db::silver::{self, EligibilityQuery};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{Agent, MetricsCell, RunCounters};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use localist_common::config::CuratorConfig;
use localist_common::db::models::{AgentKind, CurationAlgorithm, SilverVenue};
use localist_common::events::PipelineEvent;
use localist_common::{time, Payload};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Average days per month used for recency decay
const DAYS_PER_MONTH: f64 = 30.4375;
/// Recency points lost per month since verification
const RECENCY_DECAY_PER_MONTH: f64 = 50.0 / 12.0;

/// What one curator publishes
#[derive(Debug, Clone, PartialEq)]
pub struct CuratorTarget {
    pub slug: String,
    pub title: String,
    pub city: Option<String>,
    pub category: Option<String>,
    /// Every one of these tags must be present on a venue
    pub required_tags: Vec<String>,
    pub algorithm: String,
    pub target_venue_count: usize,
}

impl CuratorTarget {
    pub fn from_config(config: &CuratorConfig) -> PipelineResult<Self> {
        if config.target_venue_count == 0 {
            return Err(PipelineError::Config("curator target_venue_count must be positive".to_string()));
        }

        let city = config.city.as_deref().map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty());
        let category = config.category.clone().filter(|c| !c.trim().is_empty());

        let slug = match (&config.name, &city, &category) {
            (Some(name), _, _) => slugify(name),
            (None, Some(city), Some(category)) => slugify(&format!("{}-{}", city, category)),
            (None, Some(city), None) => slugify(&format!("{}-all", city)),
            (None, None, Some(category)) => slugify(&format!("all-{}", category)),
            (None, None, None) => {
                return Err(PipelineError::Config(
                    "curator needs a name, a city or a category".to_string(),
                ))
            }
        };
        if slug.is_empty() {
            return Err(PipelineError::Config("curator name produces an empty slug".to_string()));
        }

        let title = match (&config.name, &city, &category) {
            (Some(name), _, _) => name.clone(),
            (None, Some(city), Some(category)) => format!("Top {} in {}", category, city),
            (None, Some(city), None) => format!("Top venues in {}", city),
            (None, None, Some(category)) => format!("Top {}", category),
            (None, None, None) => slug.clone(),
        };

        Ok(Self {
            slug,
            title,
            city,
            category,
            required_tags: config.required_tags.iter().map(|t| t.trim().to_lowercase()).collect(),
            algorithm: config.algorithm.clone(),
            target_venue_count: config.target_venue_count,
        })
    }

    fn filter_payload(&self) -> Payload {
        Payload::new()
            .with("city", json!(self.city))
            .with("category", json!(self.category))
            .with("requiredTags", json!(self.required_tags))
            .with("targetVenueCount", self.target_venue_count)
    }

    fn accepts(&self, venue: &SilverVenue) -> bool {
        self.required_tags
            .iter()
            .all(|required| venue.tags.iter().any(|t| t.eq_ignore_ascii_case(required)))
    }
}

/// Lowercase ASCII slug with single dashes
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// 100 when just verified, 50 at 12 months, 0 from 24 months on
pub fn recency_score(last_verified_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(verified) = last_verified_at else {
        return 0.0;
    };
    let days = (now - verified).num_seconds() as f64 / 86_400.0;
    let months = (days / DAYS_PER_MONTH).max(0.0);
    (100.0 - RECENCY_DECAY_PER_MONTH * months).clamp(0.0, 100.0)
}

/// Sum of boost factors over the venue's tags, category and cuisine
pub fn boost_score(venue: &SilverVenue, boost_factors: &BTreeMap<String, f64>) -> f64 {
    if boost_factors.is_empty() {
        return 0.0;
    }
    let features: BTreeSet<String> = venue
        .tags
        .iter()
        .map(String::as_str)
        .chain(venue.category.as_deref())
        .chain(venue.cuisine.as_deref())
        .map(|f| f.trim().to_lowercase())
        .collect();

    boost_factors
        .iter()
        .filter(|(feature, _)| features.contains(&feature.to_lowercase()))
        .map(|(_, boost)| boost)
        .sum()
}

/// Per-venue score components
#[derive(Debug, Clone)]
pub struct ScoredVenue {
    pub venue: SilverVenue,
    pub recency_score: f64,
    pub boost_score: f64,
    pub final_score: f64,
}

pub fn score_venue(venue: SilverVenue, algorithm: &CurationAlgorithm, now: DateTime<Utc>) -> ScoredVenue {
    let recency = recency_score(venue.last_verified_at, now);
    let boost = boost_score(&venue, &algorithm.boost_factors);
    let expert = venue.expert_score.clamp(0.0, 100.0);
    let consumer = venue.consumer_score.clamp(0.0, 100.0);

    let weighted = algorithm.expert_weight * expert
        + algorithm.consumer_weight * consumer
        + algorithm.recency_weight * recency
        + boost;

    ScoredVenue {
        venue,
        recency_score: recency,
        boost_score: boost,
        final_score: weighted.clamp(0.0, 100.0),
    }
}

/// Final score descending, then source count descending, then name, then id
pub fn ranking_order(a: &ScoredVenue, b: &ScoredVenue) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| b.venue.source_count.cmp(&a.venue.source_count))
        .then_with(|| a.venue.canonical_name.cmp(&b.venue.canonical_name))
        .then_with(|| a.venue.id.cmp(&b.venue.id))
}

/// Score, order and cut to `limit`
pub fn rank(
    venues: Vec<SilverVenue>,
    algorithm: &CurationAlgorithm,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<ScoredVenue> {
    let mut scored: Vec<ScoredVenue> = venues.into_iter().map(|v| score_venue(v, algorithm, now)).collect();
    scored.sort_by(ranking_order);
    scored.truncate(limit);
    scored
}

pub struct Curator {
    name: String,
    target: CuratorTarget,
    ctx: AgentContext,
    metrics: MetricsCell,
}

impl Curator {
    pub fn new(ctx: AgentContext, target: CuratorTarget) -> Self {
        Self {
            name: format!("curator:{}", target.slug),
            target,
            ctx,
            metrics: MetricsCell::default(),
        }
    }

    pub fn target(&self) -> &CuratorTarget {
        &self.target
    }

    async fn breakdown(&self, scored: &ScoredVenue, algorithm: &CurationAlgorithm) -> PipelineResult<Payload> {
        let mut authority = serde_json::Map::new();
        for mapping in mappings::mappings_for_venue(&self.ctx.pool, &scored.venue.id).await? {
            let weight = algorithm.source_weights.get(&mapping.source_id).copied().unwrap_or(1.0);
            authority.insert(mapping.source_id, json!(weight));
        }

        Ok(Payload::new()
            .with("expertScore", scored.venue.expert_score)
            .with("consumerScore", scored.venue.consumer_score)
            .with("recencyScore", scored.recency_score)
            .with("boostScore", scored.boost_score)
            .with("finalScore", scored.final_score)
            .with(
                "weights",
                json!({
                    "expert": algorithm.expert_weight,
                    "consumer": algorithm.consumer_weight,
                    "recency": algorithm.recency_weight,
                }),
            )
            .with("sourceCount", scored.venue.source_count)
            .with("confidenceScore", scored.venue.confidence_score)
            .with("sourceAuthority", authority)
            .with("algorithm", algorithm.name.as_str())
            .with("algorithmVersion", algorithm.version))
    }
}

#[async_trait::async_trait]
impl Agent for Curator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Curator
    }

    fn city(&self) -> Option<&str> {
        self.target.city.as_deref()
    }

    async fn execute(&self, counters: &mut RunCounters) -> PipelineResult<()> {
        let pool = &self.ctx.pool;
        let target = &self.target;

        let algorithm = algorithms::latest_algorithm(pool, &target.algorithm)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("curation algorithm '{}'", target.algorithm)))?;

        let query = EligibilityQuery {
            city: target.city.clone(),
            category: target.category.clone(),
            min_confidence_score: algorithm.min_confidence_score,
            min_source_count: algorithm.min_source_count,
        };
        let eligible: Vec<SilverVenue> = silver::eligible_venues(pool, &query)
            .await?
            .into_iter()
            .filter(|v| target.accepts(v))
            .collect();

        counters.processed = eligible.len() as u64;

        if eligible.is_empty() {
            counters.warn(format!(
                "No venues meet the thresholds for '{}'; previous list left in place",
                target.slug
            ));
            return Ok(());
        }

        let ranked = rank(eligible, &algorithm, time::now(), target.target_venue_count);
        counters.skipped = counters.processed - ranked.len() as u64;

        let mut items = Vec::with_capacity(ranked.len());
        for scored in &ranked {
            items.push(NewGoldItem {
                silver_venue_id: scored.venue.id.clone(),
                canonical_name: scored.venue.canonical_name.clone(),
                final_score: scored.final_score,
                score_breakdown: self.breakdown(scored, &algorithm).await?,
            });
        }

        let header = NewGoldList {
            slug: target.slug.clone(),
            title: target.title.clone(),
            city: target.city.clone(),
            category: target.category.clone(),
            filter: target.filter_payload(),
            algorithm_id: algorithm.id.clone(),
            algorithm_version: algorithm.version,
        };

        let list = retry_on_lock("publish gold list", self.ctx.settings.max_lock_wait_ms, || {
            gold::replace_list(pool, &header, &items)
        })
        .await?;

        counters.created = items.len() as u64;

        debug!(slug = %list.slug, top = ?ranked.first().map(|s| &s.venue.canonical_name), "Ranked list");
        info!(
            slug = %list.slug,
            items = list.item_count,
            algorithm = %algorithm.name,
            version = algorithm.version,
            "Published Gold list"
        );

        self.ctx.events.emit_lossy(PipelineEvent::GoldPublished {
            list_id: list.id,
            slug: list.slug,
            city: list.city,
            category: list.category,
            item_count: items.len() as u64,
            timestamp: list.published_at,
        });

        Ok(())
    }

    fn metrics_cell(&self) -> &MetricsCell {
        &self.metrics
    }
}

//! Database models shared across the pipeline layers

use crate::{Error, Payload, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What kind of evidence a data source provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Curated "best of" lists with optional rank positions
    ExpertList,
    /// Consumer rating sites
    ConsumerReview,
    /// Plain venue directories (maps, listings)
    Directory,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ExpertList => "expert_list",
            SourceType::ConsumerReview => "consumer_review",
            SourceType::Directory => "directory",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "expert_list" => Ok(SourceType::ExpertList),
            "consumer_review" => Ok(SourceType::ConsumerReview),
            "directory" => Ok(SourceType::Directory),
            other => Err(Error::InvalidInput(format!("unknown source type '{}'", other))),
        }
    }

    /// Bronze table that records from this kind of source land in
    pub fn bronze_kind(&self) -> BronzeKind {
        match self {
            SourceType::ExpertList => BronzeKind::List,
            SourceType::ConsumerReview => BronzeKind::Review,
            SourceType::Directory => BronzeKind::Venue,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bronze record variant; each maps to its own staging table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BronzeKind {
    Venue,
    List,
    Review,
}

impl BronzeKind {
    pub const ALL: [BronzeKind; 3] = [BronzeKind::Venue, BronzeKind::List, BronzeKind::Review];

    pub fn table(&self) -> &'static str {
        match self {
            BronzeKind::Venue => "bronze_venues",
            BronzeKind::List => "bronze_lists",
            BronzeKind::Review => "bronze_reviews",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BronzeKind::Venue => "venue",
            BronzeKind::List => "list",
            BronzeKind::Review => "review",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "venue" => Ok(BronzeKind::Venue),
            "list" => Ok(BronzeKind::List),
            "review" => Ok(BronzeKind::Review),
            other => Err(Error::InvalidInput(format!("unknown bronze kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(ProcessingStatus::Pending),
            "processed" => Ok(ProcessingStatus::Processed),
            "error" => Ok(ProcessingStatus::Error),
            other => Err(Error::InvalidInput(format!("unknown processing status '{}'", other))),
        }
    }
}

/// Registered external data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    /// Static trust score used by the Scorer
    pub authority_weight: f64,
    pub min_request_interval_ms: i64,
    pub enabled: bool,
}

/// Raw per-source staging record (any Bronze variant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BronzeRecord {
    pub id: String,
    pub kind: BronzeKind,
    pub source_id: String,
    pub source_native_id: String,
    pub name: String,
    pub address: Option<String>,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category: Option<String>,
    pub cuisine: Option<String>,
    pub tags: Vec<String>,
    pub rating: Option<f64>,
    pub rating_scale: Option<f64>,
    pub review_count: Option<i64>,
    pub list_position: Option<i64>,
    pub mention_count: Option<i64>,
    pub raw_payload: Payload,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl BronzeRecord {
    /// Both coordinates present
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

/// Canonical deduplicated venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilverVenue {
    pub id: String,
    pub canonical_name: String,
    pub normalized_name: String,
    pub address: Option<String>,
    pub normalized_address: Option<String>,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: Option<String>,
    pub cuisine: Option<String>,
    pub tags: Vec<String>,
    pub confidence_score: f64,
    pub source_count: i64,
    pub expert_score: f64,
    pub consumer_score: f64,
    pub aggregated_rating: f64,
    pub verified: bool,
    pub active: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub scores_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bronze → Silver edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapping {
    pub id: String,
    pub silver_id: String,
    pub bronze_id: String,
    pub bronze_kind: BronzeKind,
    pub source_id: String,
    pub match_confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Versioned weighting configuration for the Curator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationAlgorithm {
    pub id: String,
    pub name: String,
    pub version: i64,
    pub expert_weight: f64,
    pub consumer_weight: f64,
    pub recency_weight: f64,
    /// Audit only; not part of the final score
    pub source_weights: BTreeMap<String, f64>,
    pub boost_factors: BTreeMap<String, f64>,
    pub min_source_count: i64,
    pub min_confidence_score: f64,
    /// Set once a published list references this version
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

/// Weight values for creating or re-tuning an algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmWeights {
    pub expert_weight: f64,
    pub consumer_weight: f64,
    pub recency_weight: f64,
    pub source_weights: BTreeMap<String, f64>,
    pub boost_factors: BTreeMap<String, f64>,
    pub min_source_count: i64,
    pub min_confidence_score: f64,
}

impl Default for AlgorithmWeights {
    fn default() -> Self {
        Self {
            expert_weight: 0.5,
            consumer_weight: 0.3,
            recency_weight: 0.2,
            source_weights: BTreeMap::new(),
            boost_factors: BTreeMap::new(),
            min_source_count: 1,
            min_confidence_score: 0.5,
        }
    }
}

impl From<&CurationAlgorithm> for AlgorithmWeights {
    fn from(algorithm: &CurationAlgorithm) -> Self {
        Self {
            expert_weight: algorithm.expert_weight,
            consumer_weight: algorithm.consumer_weight,
            recency_weight: algorithm.recency_weight,
            source_weights: algorithm.source_weights.clone(),
            boost_factors: algorithm.boost_factors.clone(),
            min_source_count: algorithm.min_source_count,
            min_confidence_score: algorithm.min_confidence_score,
        }
    }
}

/// Published ranked list header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldList {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub city: Option<String>,
    pub category: Option<String>,
    pub filter: Payload,
    pub algorithm_id: String,
    pub algorithm_version: i64,
    pub item_count: i64,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldListItem {
    pub id: String,
    pub gold_list_id: String,
    pub silver_venue_id: String,
    pub position: i64,
    pub canonical_name: String,
    pub final_score: f64,
    pub score_breakdown: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Collector,
    Reconciler,
    Scorer,
    Curator,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Collector => "collector",
            AgentKind::Reconciler => "reconciler",
            AgentKind::Scorer => "scorer",
            AgentKind::Curator => "curator",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-agent lifecycle state
///
/// `Idle → Running → (Idle | Error)`; `Paused` is an operator override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown run status '{}'", other))),
        }
    }
}

/// One execution of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub agent_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub failed: i64,
    pub skipped: i64,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_selects_bronze_table() {
        assert_eq!(SourceType::ExpertList.bronze_kind().table(), "bronze_lists");
        assert_eq!(SourceType::ConsumerReview.bronze_kind().table(), "bronze_reviews");
        assert_eq!(SourceType::Directory.bronze_kind().table(), "bronze_venues");
    }

    #[test]
    fn test_enum_strings_parse_back() {
        for kind in BronzeKind::ALL {
            assert_eq!(BronzeKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(SourceType::parse("consumer_review").unwrap(), SourceType::ConsumerReview);
        assert!(SourceType::parse("blog").is_err());
        assert_eq!(RunStatus::parse("failed").unwrap(), RunStatus::Failed);
    }
}

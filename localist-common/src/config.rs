//! Bootstrap configuration loading and root folder resolution
//!
//! The TOML file carries everything the pipeline needs at startup: where
//! the database lives, matching thresholds, scoring cooldown, and which
//! sources and curators to register. A missing file is not fatal; the
//! built-in defaults are used and a warning is logged.

use crate::db::models::SourceType;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "LOCALIST_ROOT_FOLDER";

/// Default database file name under the root folder
pub const DEFAULT_DATABASE_FILE: &str = "localist.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalistConfig {
    /// Root folder for the database and logs
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// SQLite database path; relative paths resolve under the root folder
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub curators: Vec<CuratorConfig>,

    /// Algorithms seeded (as version 1) when absent from the database
    #[serde(default)]
    pub algorithms: Vec<AlgorithmConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Deduplication thresholds, global for every city and category
#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// A candidate must score strictly above this to be merged
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Distance in meters at which the location component reaches zero
    #[serde(default = "default_proximity_meters")]
    pub proximity_meters: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            proximity_meters: default_proximity_meters(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Venues scored more recently than this are skipped
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Upper bound on retrying writes that hit SQLite lock contention
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Wire Bronze/Silver/Gold events to downstream agent runs
    #[serde(default = "default_true")]
    pub event_triggers: bool,

    #[serde(default = "default_reconciler_schedule")]
    pub reconciler_schedule: Option<String>,

    #[serde(default = "default_scorer_schedule")]
    pub scorer_schedule: Option<String>,

    /// Event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_triggers: true,
            reconciler_schedule: default_reconciler_schedule(),
            scorer_schedule: default_scorer_schedule(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// One external data source and the collector that ingests it
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Operator-assigned slug, also the Bronze `source_id`
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source_type: SourceType,
    #[serde(default = "default_authority_weight")]
    pub authority_weight: f64,
    /// Blocking floor between two outbound requests to this source
    #[serde(default)]
    pub min_request_interval_ms: u64,
    /// City applied to records that carry none
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    pub fetcher: FetcherConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// How a collector obtains raw records
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// A JSON array file, or a directory of them
    JsonFile { path: PathBuf },
    /// A JSON array served over HTTP
    HttpJson {
        url: String,
        /// Name of an environment variable holding a bearer token
        #[serde(default)]
        api_key_env: Option<String>,
        /// Follow `page=N` until an empty page or this many pages
        #[serde(default)]
        max_pages: Option<u32>,
    },
}

/// One curated Gold list
#[derive(Debug, Clone, Deserialize)]
pub struct CuratorConfig {
    /// Custom list name; defaults to `<city>-<category>`
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub required_tags: Vec<String>,
    #[serde(default = "default_algorithm_name")]
    pub algorithm: String,
    #[serde(default = "default_target_venue_count")]
    pub target_venue_count: usize,
    #[serde(default)]
    pub schedule: Option<String>,
}

/// Seed definition of a curation algorithm
#[derive(Debug, Clone, Deserialize)]
pub struct AlgorithmConfig {
    pub name: String,
    pub expert_weight: f64,
    pub consumer_weight: f64,
    pub recency_weight: f64,
    /// Per-source authority recorded in each list item's score breakdown.
    /// Ranking does not read it: Silver scores already carry each source's
    /// `authority_weight`.
    #[serde(default)]
    pub source_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub boost_factors: BTreeMap<String, f64>,
    #[serde(default = "default_min_source_count")]
    pub min_source_count: i64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence_score: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_proximity_meters() -> f64 {
    50.0
}

fn default_cooldown_minutes() -> u64 {
    60
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_reconciler_schedule() -> Option<String> {
    Some("15m".to_string())
}

fn default_scorer_schedule() -> Option<String> {
    Some("1h".to_string())
}

fn default_event_capacity() -> usize {
    256
}

fn default_authority_weight() -> f64 {
    1.0
}

fn default_algorithm_name() -> String {
    "balanced".to_string()
}

fn default_target_venue_count() -> usize {
    25
}

fn default_min_source_count() -> i64 {
    1
}

fn default_min_confidence() -> f64 {
    0.5
}

impl LocalistConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LocalistConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit path or the platform default
    ///
    /// A missing file yields the defaults. A file that exists but does not
    /// parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(&p)
                    .map_err(|e| Error::Config(format!("Read {} failed: {}", p.display(), e)))?;
                info!("Loaded configuration from {}", p.display());
                Self::from_toml_str(&text)
            }
            Some(p) => {
                warn!("Config file {} not found, using defaults", p.display());
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let t = self.matching.similarity_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(Error::Config(format!(
                "matching.similarity_threshold must be within [0, 1], got {}",
                t
            )));
        }
        if self.matching.proximity_meters <= 0.0 {
            return Err(Error::Config(
                "matching.proximity_meters must be positive".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(Error::Config("source id must not be empty".to_string()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(Error::Config(format!("duplicate source id '{}'", source.id)));
            }
            if source.authority_weight < 0.0 {
                return Err(Error::Config(format!(
                    "source '{}' has a negative authority_weight",
                    source.id
                )));
            }
        }

        for curator in &self.curators {
            if curator.name.is_none() && (curator.city.is_none() || curator.category.is_none()) {
                return Err(Error::Config(
                    "curator needs either a name or both city and category".to_string(),
                ));
            }
            if curator.target_venue_count == 0 {
                return Err(Error::Config("curator target_venue_count must be > 0".to_string()));
            }
        }

        Ok(())
    }

    /// Resolve the database file path against the root folder
    pub fn resolve_database_path(&self, root_folder: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root_folder.join(p),
            None => root_folder.join(DEFAULT_DATABASE_FILE),
        }
    }
}

/// Root folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config value
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &LocalistConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("localist").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/localist/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("localist"))
        .unwrap_or_else(|| PathBuf::from("./localist_data"))
}

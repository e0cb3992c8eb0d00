//! # Localist pipeline
//!
//! Bronze/Silver/Gold venue reconciliation:
//! - [`agents`]: Collector, Reconciler, Scorer and Curator stages
//! - [`coordinator`]: agent registry, scheduling, event triggers, run history
//! - [`db`]: per-layer SQLite repositories
//! - [`fetchers`]: raw record sources handed to Collectors
//! - [`matching`]: name/address/geo similarity used for deduplication

pub mod agents;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fetchers;
pub mod matching;
pub mod types;
pub mod utils;

pub use crate::coordinator::Coordinator;
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::types::{Agent, AgentMetrics, RunCounters};

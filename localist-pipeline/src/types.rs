//! Core types and the agent capability trait
//!
//! Every pipeline stage (Collector, Reconciler, Scorer, Curator) implements
//! [`Agent`]. The coordinator composes them through a name-keyed registry
//! and never needs to know which concrete stage it is running.

use crate::error::PipelineResult;
use localist_common::db::models::AgentKind;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Counters for one agent run
///
/// Passed by `&mut` into [`Agent::execute`] so partial progress survives a
/// run that ends in an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunCounters {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    pub skipped: u64,
    pub warnings: Vec<String>,
}

impl RunCounters {
    /// Record a warning that belongs on the AgentRun
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Cumulative metrics an agent reports about itself
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub runs: u64,
    pub failures: u64,
    pub total_processed: u64,
    pub total_created: u64,
    pub total_updated: u64,
    pub total_failed: u64,
    pub last_run: Option<RunCounters>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Interior-mutable metrics holder embedded in each agent
#[derive(Debug, Default)]
pub struct MetricsCell(Mutex<AgentMetrics>);

impl MetricsCell {
    pub fn record(&self, counters: &RunCounters, elapsed: Duration, error: Option<String>) {
        let mut m = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        m.runs += 1;
        if error.is_some() {
            m.failures += 1;
        }
        m.total_processed += counters.processed;
        m.total_created += counters.created;
        m.total_updated += counters.updated;
        m.total_failed += counters.failed;
        m.last_run = Some(counters.clone());
        m.last_duration_ms = Some(elapsed.as_millis() as u64);
        m.last_error = error;
    }

    pub fn snapshot(&self) -> AgentMetrics {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Capability set shared by every pipeline stage
///
/// # Example
/// ```rust,ignore
/// struct Noop { metrics: MetricsCell }
///
/// #[async_trait::async_trait]
/// impl Agent for Noop {
///     fn name(&self) -> &str { "noop" }
///     fn kind(&self) -> AgentKind { AgentKind::Scorer }
///     async fn execute(&self, counters: &mut RunCounters) -> PipelineResult<()> {
///         counters.processed += 1;
///         Ok(())
///     }
///     fn metrics_cell(&self) -> &MetricsCell { &self.metrics }
/// }
/// ```
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Registry key, unique per coordinator
    fn name(&self) -> &str;

    fn kind(&self) -> AgentKind;

    /// City partition this agent works on, if any
    fn city(&self) -> Option<&str> {
        None
    }

    /// Process one batch; counters are updated as work happens
    async fn execute(&self, counters: &mut RunCounters) -> PipelineResult<()>;

    /// Metrics storage the coordinator records finished runs into
    fn metrics_cell(&self) -> &MetricsCell;

    fn metrics(&self) -> AgentMetrics {
        self.metrics_cell().snapshot()
    }
}

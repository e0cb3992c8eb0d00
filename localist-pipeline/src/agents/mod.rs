//! Pipeline stage agents
//!
//! Collector → Bronze → Reconciler/Scorer → Silver → Curator → Gold.
//! Each stage is an [`Agent`](crate::types::Agent) the coordinator runs by
//! name.

pub mod collector;
pub mod curator;
pub mod reconciler;
pub mod scorer;

pub use collector::Collector;
pub use curator::{Curator, CuratorTarget};
pub use reconciler::Reconciler;
pub use scorer::Scorer;

use crate::config::PipelineSettings;
use localist_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared handles every agent is built with
#[derive(Clone)]
pub struct AgentContext {
    pub pool: SqlitePool,
    pub events: EventBus,
    pub settings: Arc<PipelineSettings>,
}

impl AgentContext {
    pub fn new(pool: SqlitePool, events: EventBus, settings: PipelineSettings) -> Self {
        Self {
            pool,
            events,
            settings: Arc::new(settings),
        }
    }
}

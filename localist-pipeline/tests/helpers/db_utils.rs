//! Database Test Utilities

use super::fixtures::NewRecordBuilder;
use localist_common::db::init_database;
use localist_common::db::models::{BronzeKind, DataSource, SourceType};
use localist_common::events::EventBus;
use localist_pipeline::agents::AgentContext;
use localist_pipeline::config::PipelineSettings;
use localist_pipeline::db::{bronze, sources};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a temporary database with the full schema
///
/// Keep the returned TempDir alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("test_localist.db")).await.unwrap();
    (temp_dir, pool)
}

/// Agent context with default settings and a fresh event bus
pub fn test_context(pool: &SqlitePool) -> AgentContext {
    AgentContext::new(pool.clone(), EventBus::new(64), PipelineSettings::default())
}

/// Register a data source row and return it
pub async fn register_source(pool: &SqlitePool, id: &str, source_type: SourceType) -> DataSource {
    let source = DataSource {
        id: id.to_string(),
        name: id.to_string(),
        source_type,
        authority_weight: 1.0,
        min_request_interval_ms: 0,
        enabled: true,
    };
    sources::upsert_source(pool, &source).await.unwrap();
    source
}

/// Upsert a Bronze row built from `builder`, returning its id
pub async fn insert_bronze(pool: &SqlitePool, builder: NewRecordBuilder) -> (BronzeKind, String) {
    let record = builder.build();
    let kind = record.kind;
    let outcome = bronze::upsert_record(pool, &record).await.unwrap();
    (kind, outcome.id)
}

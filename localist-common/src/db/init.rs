//! Database initialization
//!
//! Opens (or creates) the SQLite database, applies connection pragmas and
//! creates every table idempotently. Safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL lets readers keep a consistent snapshot while a Gold list is rebuilt
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_data_sources_table(pool).await?;
    for table in ["bronze_venues", "bronze_lists", "bronze_reviews"] {
        create_bronze_table(pool, table).await?;
    }
    create_silver_venues_table(pool).await?;
    create_mapping_table(pool).await?;
    create_curation_algorithms_table(pool).await?;
    create_gold_tables(pool).await?;
    create_agent_tables(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_data_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            source_type TEXT NOT NULL,
            authority_weight REAL NOT NULL DEFAULT 1.0,
            min_request_interval_ms INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// The three Bronze variants share one column layout so the reconciler
/// can treat them uniformly; variant-specific columns are nullable.
async fn create_bronze_table(pool: &SqlitePool, table: &str) -> Result<()> {
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES data_sources(id),
            source_native_id TEXT NOT NULL,
            name TEXT NOT NULL,
            address TEXT,
            city TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            category TEXT,
            cuisine TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            rating REAL,
            rating_scale REAL,
            review_count INTEGER,
            list_position INTEGER,
            mention_count INTEGER,
            raw_payload TEXT NOT NULL DEFAULT '{{}}',
            processing_status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            fetched_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT,
            UNIQUE (source_id, source_native_id)
        )
        "#
    );
    sqlx::query(&ddl).execute(pool).await?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table} (processing_status, created_at)"
    );
    sqlx::query(&index).execute(pool).await?;

    Ok(())
}

async fn create_silver_venues_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS silver_venues (
            id TEXT PRIMARY KEY,
            canonical_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            address TEXT,
            normalized_address TEXT,
            city TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            category TEXT,
            cuisine TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            confidence_score REAL NOT NULL DEFAULT 0.0
                CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
            source_count INTEGER NOT NULL DEFAULT 0,
            expert_score REAL NOT NULL DEFAULT 0.0,
            consumer_score REAL NOT NULL DEFAULT 0.0,
            aggregated_rating REAL NOT NULL DEFAULT 0.0,
            verified INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            last_verified_at TEXT,
            scores_updated_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_silver_venues_city ON silver_venues (city, active, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_mapping_table(pool: &SqlitePool) -> Result<()> {
    // bronze_id is unique on its own: a Bronze record maps to at most one venue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS venue_source_mapping (
            id TEXT PRIMARY KEY,
            silver_id TEXT NOT NULL REFERENCES silver_venues(id),
            bronze_id TEXT NOT NULL UNIQUE,
            bronze_kind TEXT NOT NULL,
            source_id TEXT NOT NULL REFERENCES data_sources(id),
            match_confidence REAL NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (silver_id, bronze_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mapping_silver ON venue_source_mapping (silver_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_curation_algorithms_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS curation_algorithms (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            expert_weight REAL NOT NULL,
            consumer_weight REAL NOT NULL,
            recency_weight REAL NOT NULL,
            source_weights TEXT NOT NULL DEFAULT '{}',
            boost_factors TEXT NOT NULL DEFAULT '{}',
            min_source_count INTEGER NOT NULL DEFAULT 1,
            min_confidence_score REAL NOT NULL DEFAULT 0.0,
            locked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (name, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_gold_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gold_lists (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            city TEXT,
            category TEXT,
            filter TEXT NOT NULL DEFAULT '{}',
            algorithm_id TEXT NOT NULL REFERENCES curation_algorithms(id),
            algorithm_version INTEGER NOT NULL,
            item_count INTEGER NOT NULL DEFAULT 0,
            published_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gold_list_items (
            id TEXT PRIMARY KEY,
            gold_list_id TEXT NOT NULL REFERENCES gold_lists(id) ON DELETE CASCADE,
            silver_venue_id TEXT NOT NULL REFERENCES silver_venues(id),
            position INTEGER NOT NULL CHECK (position >= 1),
            canonical_name TEXT NOT NULL,
            final_score REAL NOT NULL,
            score_breakdown TEXT NOT NULL DEFAULT '{}',
            UNIQUE (gold_list_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_agent_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            name TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'idle',
            schedule TEXT,
            registered_at TEXT NOT NULL,
            last_run_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_runs (
            id TEXT PRIMARY KEY,
            agent_name TEXT NOT NULL REFERENCES agents(name),
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            warnings TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_agent ON agent_runs (agent_name, started_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

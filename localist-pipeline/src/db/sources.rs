//! Data source registry operations

use localist_common::db::models::{DataSource, SourceType};
use localist_common::{time, Error, Result};
use sqlx::{Row, SqlitePool};

/// Insert or refresh a data source definition
pub async fn upsert_source(pool: &SqlitePool, source: &DataSource) -> Result<()> {
    let now = time::now_db();
    sqlx::query(
        r#"
        INSERT INTO data_sources (
            id, name, source_type, authority_weight, min_request_interval_ms,
            enabled, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            source_type = excluded.source_type,
            authority_weight = excluded.authority_weight,
            min_request_interval_ms = excluded.min_request_interval_ms,
            enabled = excluded.enabled,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&source.id)
    .bind(&source.name)
    .bind(source.source_type.as_str())
    .bind(source.authority_weight)
    .bind(source.min_request_interval_ms)
    .bind(source.enabled)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DataSource> {
    let source_type: String = row.get("source_type");
    Ok(DataSource {
        id: row.get("id"),
        name: row.get("name"),
        source_type: SourceType::parse(&source_type)?,
        authority_weight: row.get("authority_weight"),
        min_request_interval_ms: row.get("min_request_interval_ms"),
        enabled: row.get("enabled"),
    })
}

pub async fn get_source(pool: &SqlitePool, id: &str) -> Result<DataSource> {
    let row = sqlx::query(
        "SELECT id, name, source_type, authority_weight, min_request_interval_ms, enabled FROM data_sources WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("data source '{}'", id)))?;

    source_from_row(&row)
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<DataSource>> {
    let rows = sqlx::query(
        "SELECT id, name, source_type, authority_weight, min_request_interval_ms, enabled FROM data_sources ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(source_from_row).collect()
}

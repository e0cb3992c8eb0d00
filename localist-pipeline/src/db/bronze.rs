//! Bronze staging operations
//!
//! Rows are keyed by (source_id, source_native_id). Re-ingestion refreshes
//! content and timestamps in place; rows are never deleted and only the
//! processing status changes after insert.

use super::{parse_tags, tags_to_json};
use chrono::{DateTime, Utc};
use localist_common::db::models::{BronzeKind, BronzeRecord, ProcessingStatus};
use localist_common::{time, Payload, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Normalized record ready to upsert
#[derive(Debug, Clone)]
pub struct NewBronzeRecord {
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
    pub fetched_at: DateTime<Utc>,
}

/// Result of one upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: String,
    /// False when an existing row was refreshed
    pub created: bool,
}

const COLUMNS: &str = "id, source_id, source_native_id, name, address, city, latitude, longitude, \
     category, cuisine, tags, rating, rating_scale, review_count, list_position, mention_count, \
     raw_payload, processing_status, error_message, fetched_at, created_at, updated_at, processed_at";

/// Insert a new Bronze row or refresh the existing one for the same native id
pub async fn upsert_record(pool: &SqlitePool, record: &NewBronzeRecord) -> Result<UpsertOutcome> {
    let table = record.kind.table();
    let tags = tags_to_json(&record.tags)?;
    let payload = record.raw_payload.to_json()?;
    let fetched_at = time::to_db(record.fetched_at);
    let now = time::now_db();

    let mut tx = pool.begin().await?;

    let existing: Option<String> = sqlx::query_scalar(&format!(
        "SELECT id FROM {table} WHERE source_id = ? AND source_native_id = ?"
    ))
    .bind(&record.source_id)
    .bind(&record.source_native_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match existing {
        Some(id) => {
            sqlx::query(&format!(
                r#"
                UPDATE {table} SET
                    name = ?, address = ?, city = ?, latitude = ?, longitude = ?,
                    category = ?, cuisine = ?, tags = ?, rating = ?, rating_scale = ?,
                    review_count = ?, list_position = ?, mention_count = ?,
                    raw_payload = ?, fetched_at = ?, updated_at = ?
                WHERE id = ?
                "#
            ))
            .bind(&record.name)
            .bind(&record.address)
            .bind(&record.city)
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(&record.category)
            .bind(&record.cuisine)
            .bind(&tags)
            .bind(record.rating)
            .bind(record.rating_scale)
            .bind(record.review_count)
            .bind(record.list_position)
            .bind(record.mention_count)
            .bind(&payload)
            .bind(&fetched_at)
            .bind(&now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

            UpsertOutcome { id, created: false }
        }
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(&format!(
                r#"
                INSERT INTO {table} (
                    id, source_id, source_native_id, name, address, city, latitude, longitude,
                    category, cuisine, tags, rating, rating_scale, review_count, list_position,
                    mention_count, raw_payload, processing_status, fetched_at, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
                "#
            ))
            .bind(&id)
            .bind(&record.source_id)
            .bind(&record.source_native_id)
            .bind(&record.name)
            .bind(&record.address)
            .bind(&record.city)
            .bind(record.latitude)
            .bind(record.longitude)
            .bind(&record.category)
            .bind(&record.cuisine)
            .bind(&tags)
            .bind(record.rating)
            .bind(record.rating_scale)
            .bind(record.review_count)
            .bind(record.list_position)
            .bind(record.mention_count)
            .bind(&payload)
            .bind(&fetched_at)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            UpsertOutcome { id, created: true }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

fn record_from_row(kind: BronzeKind, row: &sqlx::sqlite::SqliteRow) -> Result<BronzeRecord> {
    let tags: String = row.get("tags");
    let payload: String = row.get("raw_payload");
    let status: String = row.get("processing_status");
    let fetched_at: String = row.get("fetched_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(BronzeRecord {
        id: row.get("id"),
        kind,
        source_id: row.get("source_id"),
        source_native_id: row.get("source_native_id"),
        name: row.get("name"),
        address: row.get("address"),
        city: row.get("city"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        category: row.get("category"),
        cuisine: row.get("cuisine"),
        tags: parse_tags(&tags)?,
        rating: row.get("rating"),
        rating_scale: row.get("rating_scale"),
        review_count: row.get("review_count"),
        list_position: row.get("list_position"),
        mention_count: row.get("mention_count"),
        raw_payload: Payload::from_json(&payload)?,
        processing_status: ProcessingStatus::parse(&status)?,
        error_message: row.get("error_message"),
        fetched_at: time::from_db(&fetched_at)?,
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
        processed_at: time::from_db_opt(row.get("processed_at"))?,
    })
}

pub async fn get_record(pool: &SqlitePool, kind: BronzeKind, id: &str) -> Result<Option<BronzeRecord>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM {} WHERE id = ?", kind.table()))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| record_from_row(kind, &r)).transpose()
}

/// All rows from one source, oldest first
pub async fn records_for_source(
    pool: &SqlitePool,
    kind: BronzeKind,
    source_id: &str,
) -> Result<Vec<BronzeRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM {} WHERE source_id = ? ORDER BY created_at, id",
        kind.table()
    ))
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| record_from_row(kind, r)).collect()
}

/// Pending records with both coordinates, across all variants, oldest first
pub async fn pending_with_coordinates(pool: &SqlitePool, limit: i64) -> Result<Vec<BronzeRecord>> {
    let mut records = Vec::new();
    for kind in BronzeKind::ALL {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM {}
            WHERE processing_status = 'pending'
              AND latitude IS NOT NULL AND longitude IS NOT NULL
            ORDER BY created_at, id
            LIMIT ?
            "#,
            kind.table()
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;

        for row in &rows {
            records.push(record_from_row(kind, row)?);
        }
    }

    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    records.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    Ok(records)
}

/// Pending records that cannot be reconciled yet (no coordinates)
pub async fn count_pending_without_coordinates(pool: &SqlitePool) -> Result<i64> {
    let mut total = 0;
    for kind in BronzeKind::ALL {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE processing_status = 'pending' AND (latitude IS NULL OR longitude IS NULL)",
            kind.table()
        ))
        .fetch_one(pool)
        .await?;
        total += count;
    }
    Ok(total)
}

/// Atomically move a record from pending to processed
///
/// Returns false when another runner already claimed it.
pub async fn claim_record(conn: &mut SqliteConnection, kind: BronzeKind, id: &str) -> Result<bool> {
    let result = sqlx::query(&format!(
        "UPDATE {} SET processing_status = 'processed', processed_at = ?, error_message = NULL \
         WHERE id = ? AND processing_status = 'pending'",
        kind.table()
    ))
    .bind(time::now_db())
    .bind(id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a record as failed reconciliation
pub async fn mark_error(pool: &SqlitePool, kind: BronzeKind, id: &str, message: &str) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET processing_status = 'error', error_message = ?, processed_at = ? WHERE id = ?",
        kind.table()
    ))
    .bind(message)
    .bind(time::now_db())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Operator reset of one record back to pending
///
/// A record that is already mapped to a venue stays processed.
pub async fn reset_to_pending(pool: &SqlitePool, kind: BronzeKind, id: &str) -> Result<bool> {
    let result = sqlx::query(&format!(
        r#"
        UPDATE {} SET processing_status = 'pending', error_message = NULL, processed_at = NULL
        WHERE id = ?
          AND NOT EXISTS (SELECT 1 FROM venue_source_mapping m WHERE m.bronze_id = ?)
        "#,
        kind.table()
    ))
    .bind(id)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Operator reset of every errored record from one source
pub async fn reset_errors_for_source(pool: &SqlitePool, source_id: &str) -> Result<u64> {
    let mut total = 0;
    for kind in BronzeKind::ALL {
        let result = sqlx::query(&format!(
            "UPDATE {} SET processing_status = 'pending', error_message = NULL, processed_at = NULL \
             WHERE source_id = ? AND processing_status = 'error'",
            kind.table()
        ))
        .bind(source_id)
        .execute(pool)
        .await?;
        total += result.rows_affected();
    }
    Ok(total)
}

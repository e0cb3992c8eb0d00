//! Silver venue operations
//!
//! Venues are created by the Reconciler and afterwards only updated; nothing
//! here deletes a row.

use super::{clean_tags, parse_tags, tags_to_json};
use crate::matching::{normalize, normalize_opt};
use chrono::{DateTime, Utc};
use localist_common::db::models::{BronzeRecord, SilverVenue};
use localist_common::{time, Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

const COLUMNS: &str = "id, canonical_name, normalized_name, address, normalized_address, city, \
     latitude, longitude, category, cuisine, tags, confidence_score, source_count, expert_score, \
     consumer_score, aggregated_rating, verified, active, last_verified_at, scores_updated_at, \
     created_at, updated_at";

fn venue_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SilverVenue> {
    let tags: String = row.get("tags");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(SilverVenue {
        id: row.get("id"),
        canonical_name: row.get("canonical_name"),
        normalized_name: row.get("normalized_name"),
        address: row.get("address"),
        normalized_address: row.get("normalized_address"),
        city: row.get("city"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        category: row.get("category"),
        cuisine: row.get("cuisine"),
        tags: parse_tags(&tags)?,
        confidence_score: row.get("confidence_score"),
        source_count: row.get("source_count"),
        expert_score: row.get("expert_score"),
        consumer_score: row.get("consumer_score"),
        aggregated_rating: row.get("aggregated_rating"),
        verified: row.get("verified"),
        active: row.get("active"),
        last_verified_at: time::from_db_opt(row.get("last_verified_at"))?,
        scores_updated_at: time::from_db_opt(row.get("scores_updated_at"))?,
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
    })
}

/// Match candidates for a city, oldest first
pub async fn active_in_city(conn: &mut SqliteConnection, city: &str) -> Result<Vec<SilverVenue>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM silver_venues WHERE city = ? AND active = 1 ORDER BY created_at, id"
    ))
    .bind(city)
    .fetch_all(conn)
    .await?;

    rows.iter().map(venue_from_row).collect()
}

pub async fn get_venue(pool: &SqlitePool, id: &str) -> Result<Option<SilverVenue>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM silver_venues WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(venue_from_row).transpose()
}

pub async fn list_by_city(pool: &SqlitePool, city: &str) -> Result<Vec<SilverVenue>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM silver_venues WHERE city = ? ORDER BY created_at, id"
    ))
    .bind(city)
    .fetch_all(pool)
    .await?;

    rows.iter().map(venue_from_row).collect()
}

/// Create a new canonical venue seeded from a Bronze record
///
/// Source statistics start at zero; the caller maps the record and then
/// calls [`refresh_source_stats`].
pub async fn insert_from_record(conn: &mut SqliteConnection, record: &BronzeRecord) -> Result<String> {
    let (latitude, longitude) = record
        .coordinates()
        .ok_or_else(|| Error::InvalidInput(format!("record {} has no coordinates", record.id)))?;

    let id = Uuid::new_v4().to_string();
    let now = time::now_db();
    let tags = tags_to_json(&clean_tags(&record.tags))?;

    sqlx::query(
        r#"
        INSERT INTO silver_venues (
            id, canonical_name, normalized_name, address, normalized_address, city,
            latitude, longitude, category, cuisine, tags, last_verified_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(record.name.trim())
    .bind(normalize(&record.name))
    .bind(&record.address)
    .bind(normalize_opt(record.address.as_deref()))
    .bind(&record.city)
    .bind(latitude)
    .bind(longitude)
    .bind(&record.category)
    .bind(&record.cuisine)
    .bind(&tags)
    .bind(time::to_db(record.fetched_at))
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await?;

    Ok(id)
}

/// Fold a matched Bronze record into an existing venue
///
/// Only fills gaps: canonical name and coordinates stay with the venue.
/// New evidence makes the stored scores stale.
pub async fn absorb_record(conn: &mut SqliteConnection, silver_id: &str, record: &BronzeRecord) -> Result<()> {
    let existing: String = sqlx::query_scalar("SELECT tags FROM silver_venues WHERE id = ?")
        .bind(silver_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("silver venue '{}'", silver_id)))?;

    let mut tags = parse_tags(&existing)?;
    tags.extend(record.tags.iter().cloned());
    let tags = tags_to_json(&clean_tags(&tags))?;

    sqlx::query(
        r#"
        UPDATE silver_venues SET
            address = COALESCE(address, ?),
            normalized_address = COALESCE(normalized_address, ?),
            category = COALESCE(category, ?),
            cuisine = COALESCE(cuisine, ?),
            tags = ?,
            last_verified_at = CASE
                WHEN last_verified_at IS NULL OR last_verified_at < ? THEN ?
                ELSE last_verified_at
            END,
            scores_updated_at = NULL,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&record.address)
    .bind(normalize_opt(record.address.as_deref()))
    .bind(&record.category)
    .bind(&record.cuisine)
    .bind(&tags)
    .bind(time::to_db(record.fetched_at))
    .bind(time::to_db(record.fetched_at))
    .bind(time::now_db())
    .bind(silver_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// `avg_match_confidence · (1 − 0.5^source_count)`, clamped to [0, 1]
pub fn confidence_from_sources(avg_match_confidence: f64, source_count: i64) -> f64 {
    if source_count <= 0 {
        return 0.0;
    }
    let agreement = 1.0 - 0.5f64.powi(source_count.min(i32::MAX as i64) as i32);
    (avg_match_confidence * agreement).clamp(0.0, 1.0)
}

/// Recompute source_count and confidence from the mapping table
pub async fn refresh_source_stats(conn: &mut SqliteConnection, silver_id: &str) -> Result<(i64, f64)> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(DISTINCT source_id) AS sources, COALESCE(AVG(match_confidence), 0.0) AS avg_conf
        FROM venue_source_mapping
        WHERE silver_id = ?
        "#,
    )
    .bind(silver_id)
    .fetch_one(&mut *conn)
    .await?;

    let source_count: i64 = row.get("sources");
    let avg: f64 = row.get("avg_conf");
    let confidence = confidence_from_sources(avg, source_count);

    sqlx::query(
        "UPDATE silver_venues SET source_count = ?, confidence_score = ?, updated_at = ? WHERE id = ?",
    )
    .bind(source_count)
    .bind(confidence)
    .bind(time::now_db())
    .bind(silver_id)
    .execute(conn)
    .await?;

    Ok((source_count, confidence))
}

/// Venues whose scores were never computed or are older than `cutoff`
pub async fn stale_for_scoring(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<SilverVenue>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {COLUMNS} FROM silver_venues
        WHERE active = 1 AND (scores_updated_at IS NULL OR scores_updated_at < ?)
        ORDER BY created_at, id
        "#
    ))
    .bind(time::to_db(cutoff))
    .fetch_all(pool)
    .await?;

    rows.iter().map(venue_from_row).collect()
}

/// Computed aggregate scores for one venue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VenueScores {
    pub expert_score: f64,
    pub consumer_score: f64,
    pub aggregated_rating: f64,
    pub verified: bool,
}

pub async fn update_scores(pool: &SqlitePool, silver_id: &str, scores: &VenueScores) -> Result<()> {
    let now = time::now_db();
    sqlx::query(
        r#"
        UPDATE silver_venues SET
            expert_score = ?, consumer_score = ?, aggregated_rating = ?,
            verified = ?, scores_updated_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(scores.expert_score)
    .bind(scores.consumer_score)
    .bind(scores.aggregated_rating)
    .bind(scores.verified)
    .bind(&now)
    .bind(&now)
    .bind(silver_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Threshold query used by curators
#[derive(Debug, Clone, Default)]
pub struct EligibilityQuery {
    pub city: Option<String>,
    /// Case-insensitive match on category or cuisine
    pub category: Option<String>,
    pub min_confidence_score: f64,
    pub min_source_count: i64,
}

/// Active venues meeting the thresholds, oldest first
pub async fn eligible_venues(pool: &SqlitePool, query: &EligibilityQuery) -> Result<Vec<SilverVenue>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {COLUMNS} FROM silver_venues
        WHERE active = 1
          AND confidence_score >= ?1
          AND source_count >= ?2
          AND (?3 IS NULL OR city = ?3)
          AND (?4 IS NULL OR lower(category) = lower(?4) OR lower(cuisine) = lower(?4))
        ORDER BY created_at, id
        "#
    ))
    .bind(query.min_confidence_score)
    .bind(query.min_source_count)
    .bind(&query.city)
    .bind(&query.category)
    .fetch_all(pool)
    .await?;

    rows.iter().map(venue_from_row).collect()
}

//! Bronze → Silver mapping operations
//!
//! Append-only. `bronze_id` is unique, so a record maps to at most one venue.

use localist_common::db::models::{BronzeKind, BronzeRecord, SourceMapping, SourceType};
use localist_common::{time, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

pub async fn insert_mapping(
    conn: &mut SqliteConnection,
    silver_id: &str,
    record: &BronzeRecord,
    match_confidence: f64,
) -> Result<SourceMapping> {
    let mapping = SourceMapping {
        id: Uuid::new_v4().to_string(),
        silver_id: silver_id.to_string(),
        bronze_id: record.id.clone(),
        bronze_kind: record.kind,
        source_id: record.source_id.clone(),
        match_confidence: match_confidence.clamp(0.0, 1.0),
        created_at: time::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO venue_source_mapping (
            id, silver_id, bronze_id, bronze_kind, source_id, match_confidence, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&mapping.id)
    .bind(&mapping.silver_id)
    .bind(&mapping.bronze_id)
    .bind(mapping.bronze_kind.as_str())
    .bind(&mapping.source_id)
    .bind(mapping.match_confidence)
    .bind(time::to_db(mapping.created_at))
    .execute(conn)
    .await?;

    Ok(mapping)
}

pub async fn mappings_for_venue(pool: &SqlitePool, silver_id: &str) -> Result<Vec<SourceMapping>> {
    let rows = sqlx::query(
        r#"
        SELECT id, silver_id, bronze_id, bronze_kind, source_id, match_confidence, created_at
        FROM venue_source_mapping
        WHERE silver_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(silver_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.get("bronze_kind");
            let created_at: String = row.get("created_at");
            Ok(SourceMapping {
                id: row.get("id"),
                silver_id: row.get("silver_id"),
                bronze_id: row.get("bronze_id"),
                bronze_kind: BronzeKind::parse(&kind)?,
                source_id: row.get("source_id"),
                match_confidence: row.get("match_confidence"),
                created_at: time::from_db(&created_at)?,
            })
        })
        .collect()
}

/// One mapped Bronze record as the Scorer sees it
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEvidence {
    pub source_id: String,
    pub source_type: SourceType,
    pub authority_weight: f64,
    pub rating: Option<f64>,
    pub rating_scale: Option<f64>,
    pub list_position: Option<i64>,
    pub mention_count: Option<i64>,
}

/// Every mapped Bronze record of a venue joined to its source
pub async fn evidence_for_venue(pool: &SqlitePool, silver_id: &str) -> Result<Vec<SourceEvidence>> {
    let selects: Vec<String> = BronzeKind::ALL
        .iter()
        .map(|kind| {
            format!(
                r#"
                SELECT s.id AS source_id, s.source_type, s.authority_weight,
                       b.rating, b.rating_scale, b.list_position, b.mention_count,
                       m.created_at AS mapped_at, m.id AS mapping_id
                FROM venue_source_mapping m
                JOIN {table} b ON b.id = m.bronze_id
                JOIN data_sources s ON s.id = m.source_id
                WHERE m.silver_id = ?1 AND m.bronze_kind = '{kind}'
                "#,
                table = kind.table(),
                kind = kind.as_str(),
            )
        })
        .collect();
    // Compound ORDER BY terms must name result columns
    let sql = format!("{} ORDER BY mapped_at, mapping_id", selects.join(" UNION ALL "));

    let rows = sqlx::query(&sql).bind(silver_id).fetch_all(pool).await?;

    rows.iter()
        .map(|row| {
            let source_type: String = row.get("source_type");
            Ok(SourceEvidence {
                source_id: row.get("source_id"),
                source_type: SourceType::parse(&source_type)?,
                authority_weight: row.get("authority_weight"),
                rating: row.get("rating"),
                rating_scale: row.get("rating_scale"),
                list_position: row.get("list_position"),
                mention_count: row.get("mention_count"),
            })
        })
        .collect()
}

/// Venues whose stored source_count disagrees with the mapping table
pub async fn source_count_mismatches(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT v.id FROM silver_venues v
        WHERE v.source_count != (
            SELECT COUNT(DISTINCT m.source_id) FROM venue_source_mapping m WHERE m.silver_id = v.id
        )
        ORDER BY v.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

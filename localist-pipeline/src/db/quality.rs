//! Data-quality aggregates for external dashboards

use localist_common::db::models::BronzeKind;
use localist_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Default, Serialize)]
pub struct BronzeSourceStats {
    pub source_id: String,
    pub pending: i64,
    pub processed: i64,
    pub error: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SilverCityStats {
    pub city: String,
    pub venues: i64,
    pub avg_confidence: f64,
    pub verified: i64,
    pub multi_source: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GoldStats {
    pub lists: i64,
    pub items: i64,
    pub avg_final_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DataQualityReport {
    pub bronze: Vec<BronzeSourceStats>,
    pub silver: Vec<SilverCityStats>,
    pub gold: GoldStats,
}

pub async fn data_quality_report(pool: &SqlitePool) -> Result<DataQualityReport> {
    Ok(DataQualityReport {
        bronze: bronze_stats(pool).await?,
        silver: silver_stats(pool).await?,
        gold: gold_stats(pool).await?,
    })
}

/// Processing status counts per source across all Bronze variants
pub async fn bronze_stats(pool: &SqlitePool) -> Result<Vec<BronzeSourceStats>> {
    let selects: Vec<String> = BronzeKind::ALL
        .iter()
        .map(|kind| format!("SELECT source_id, processing_status FROM {}", kind.table()))
        .collect();
    let sql = format!(
        r#"
        SELECT source_id,
               SUM(CASE WHEN processing_status = 'pending' THEN 1 ELSE 0 END) AS pending,
               SUM(CASE WHEN processing_status = 'processed' THEN 1 ELSE 0 END) AS processed,
               SUM(CASE WHEN processing_status = 'error' THEN 1 ELSE 0 END) AS error
        FROM ({}) GROUP BY source_id ORDER BY source_id
        "#,
        selects.join(" UNION ALL ")
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| BronzeSourceStats {
            source_id: row.get("source_id"),
            pending: row.get("pending"),
            processed: row.get("processed"),
            error: row.get("error"),
        })
        .collect())
}

pub async fn silver_stats(pool: &SqlitePool) -> Result<Vec<SilverCityStats>> {
    let rows = sqlx::query(
        r#"
        SELECT city,
               COUNT(*) AS venues,
               AVG(confidence_score) AS avg_confidence,
               SUM(CASE WHEN verified = 1 THEN 1 ELSE 0 END) AS verified,
               SUM(CASE WHEN source_count >= 2 THEN 1 ELSE 0 END) AS multi_source
        FROM silver_venues
        WHERE active = 1
        GROUP BY city
        ORDER BY city
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SilverCityStats {
            city: row.get("city"),
            venues: row.get("venues"),
            avg_confidence: row.get("avg_confidence"),
            verified: row.get("verified"),
            multi_source: row.get("multi_source"),
        })
        .collect())
}

pub async fn gold_stats(pool: &SqlitePool) -> Result<GoldStats> {
    let row = sqlx::query(
        r#"
        SELECT (SELECT COUNT(*) FROM gold_lists) AS lists,
               COUNT(*) AS items,
               AVG(final_score) AS avg_final_score
        FROM gold_list_items
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(GoldStats {
        lists: row.get("lists"),
        items: row.get("items"),
        avg_final_score: row.get("avg_final_score"),
    })
}

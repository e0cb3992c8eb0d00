//! Curation algorithm versions
//!
//! A version referenced by a published list is locked and never changes
//! again; re-tuning a locked version creates the next one.

use localist_common::db::models::{AlgorithmWeights, CurationAlgorithm};
use localist_common::{time, Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// Name of the algorithm seeded into every new database
pub const DEFAULT_ALGORITHM: &str = "balanced";

const COLUMNS: &str = "id, name, version, expert_weight, consumer_weight, recency_weight, \
     source_weights, boost_factors, min_source_count, min_confidence_score, locked, created_at";

fn parse_weight_map(text: &str, column: &str) -> Result<BTreeMap<String, f64>> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

fn algorithm_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CurationAlgorithm> {
    let source_weights: String = row.get("source_weights");
    let boost_factors: String = row.get("boost_factors");
    let created_at: String = row.get("created_at");

    Ok(CurationAlgorithm {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        expert_weight: row.get("expert_weight"),
        consumer_weight: row.get("consumer_weight"),
        recency_weight: row.get("recency_weight"),
        source_weights: parse_weight_map(&source_weights, "source_weights")?,
        boost_factors: parse_weight_map(&boost_factors, "boost_factors")?,
        min_source_count: row.get("min_source_count"),
        min_confidence_score: row.get("min_confidence_score"),
        locked: row.get("locked"),
        created_at: time::from_db(&created_at)?,
    })
}

fn validate_weights(weights: &AlgorithmWeights) -> Result<()> {
    let core = [weights.expert_weight, weights.consumer_weight, weights.recency_weight];
    if core.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(Error::InvalidInput(
            "algorithm weights must be finite and non-negative".to_string(),
        ));
    }
    if weights.boost_factors.values().any(|b| !b.is_finite()) {
        return Err(Error::InvalidInput("boost factors must be finite".to_string()));
    }
    if !(0.0..=1.0).contains(&weights.min_confidence_score) {
        return Err(Error::InvalidInput(
            "min_confidence_score must be within [0, 1]".to_string(),
        ));
    }
    if weights.min_source_count < 0 {
        return Err(Error::InvalidInput("min_source_count must not be negative".to_string()));
    }
    Ok(())
}

async fn algorithm_by_id(conn: &mut SqliteConnection, id: &str) -> Result<CurationAlgorithm> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM curation_algorithms WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("curation algorithm '{}'", id)))?;

    algorithm_from_row(&row)
}

pub async fn get_algorithm(pool: &SqlitePool, id: &str) -> Result<CurationAlgorithm> {
    let mut conn = pool.acquire().await?;
    algorithm_by_id(&mut *conn, id).await
}

/// Highest version of a named algorithm
pub async fn latest_algorithm(pool: &SqlitePool, name: &str) -> Result<Option<CurationAlgorithm>> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM curation_algorithms WHERE name = ? ORDER BY version DESC LIMIT 1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(algorithm_from_row).transpose()
}

pub async fn list_versions(pool: &SqlitePool, name: &str) -> Result<Vec<CurationAlgorithm>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM curation_algorithms WHERE name = ? ORDER BY version"
    ))
    .bind(name)
    .fetch_all(pool)
    .await?;

    rows.iter().map(algorithm_from_row).collect()
}

/// Insert a new unlocked version and return its id
async fn insert_version(
    conn: &mut SqliteConnection,
    name: &str,
    version: i64,
    weights: &AlgorithmWeights,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO curation_algorithms (
            id, name, version, expert_weight, consumer_weight, recency_weight,
            source_weights, boost_factors, min_source_count, min_confidence_score,
            locked, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(version)
    .bind(weights.expert_weight)
    .bind(weights.consumer_weight)
    .bind(weights.recency_weight)
    .bind(serde_json::to_string(&weights.source_weights)?)
    .bind(serde_json::to_string(&weights.boost_factors)?)
    .bind(weights.min_source_count)
    .bind(weights.min_confidence_score)
    .bind(time::now_db())
    .execute(conn)
    .await?;

    info!(algorithm = name, version, "Created curation algorithm version");
    Ok(id)
}

/// Apply new weights to a named algorithm
///
/// Creates version 1 for an unknown name, updates an unlocked latest
/// version in place, and creates version+1 when the latest is locked.
pub async fn retune_algorithm(
    pool: &SqlitePool,
    name: &str,
    weights: &AlgorithmWeights,
) -> Result<CurationAlgorithm> {
    validate_weights(weights)?;

    let mut tx = pool.begin().await?;

    // First statement writes, so the lock check and the change share one
    // write lock with any concurrent publish
    let updated = sqlx::query(
        r#"
        UPDATE curation_algorithms SET
            expert_weight = ?, consumer_weight = ?, recency_weight = ?,
            source_weights = ?, boost_factors = ?,
            min_source_count = ?, min_confidence_score = ?
        WHERE locked = 0 AND id = (
            SELECT id FROM curation_algorithms WHERE name = ? ORDER BY version DESC LIMIT 1
        )
        "#,
    )
    .bind(weights.expert_weight)
    .bind(weights.consumer_weight)
    .bind(weights.recency_weight)
    .bind(serde_json::to_string(&weights.source_weights)?)
    .bind(serde_json::to_string(&weights.boost_factors)?)
    .bind(weights.min_source_count)
    .bind(weights.min_confidence_score)
    .bind(name)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let id: String = if updated > 0 {
        sqlx::query_scalar("SELECT id FROM curation_algorithms WHERE name = ? ORDER BY version DESC LIMIT 1")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?
    } else {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM curation_algorithms WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;
        insert_version(&mut *tx, name, next, weights).await?
    };

    let algorithm = algorithm_by_id(&mut *tx, &id).await?;
    tx.commit().await?;

    if updated > 0 {
        info!(algorithm = name, version = algorithm.version, "Re-tuned curation algorithm in place");
    }
    Ok(algorithm)
}

/// Make sure the latest version of `name` carries `weights`
///
/// Leaves the table untouched when it already does.
pub async fn ensure_algorithm(
    pool: &SqlitePool,
    name: &str,
    weights: &AlgorithmWeights,
) -> Result<CurationAlgorithm> {
    if let Some(current) = latest_algorithm(pool, name).await? {
        if AlgorithmWeights::from(&current) == *weights {
            return Ok(current);
        }
    }
    retune_algorithm(pool, name, weights).await
}

/// Seed the default algorithm when no version of it exists
pub async fn seed_default_algorithm(pool: &SqlitePool) -> Result<CurationAlgorithm> {
    match latest_algorithm(pool, DEFAULT_ALGORITHM).await? {
        Some(existing) => Ok(existing),
        None => retune_algorithm(pool, DEFAULT_ALGORITHM, &AlgorithmWeights::default()).await,
    }
}

/// Lock a version; called inside the Gold publish transaction
pub async fn lock_algorithm(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("UPDATE curation_algorithms SET locked = 1 WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_negative_weight() {
        let weights = AlgorithmWeights {
            consumer_weight: -0.1,
            ..Default::default()
        };
        assert!(validate_weights(&weights).is_err());
        assert!(validate_weights(&AlgorithmWeights::default()).is_ok());
    }

    #[test]
    fn test_validate_allows_negative_boost() {
        let mut weights = AlgorithmWeights::default();
        weights.boost_factors.insert("closed_mondays".to_string(), -5.0);
        assert!(validate_weights(&weights).is_ok());
    }
}

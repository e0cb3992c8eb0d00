//! Gold list publication
//!
//! A list is always replaced wholesale inside one transaction, so a reader
//! sees either the previous items or the new ones and never a mix.

use super::algorithms::lock_algorithm;
use localist_common::db::models::{GoldList, GoldListItem};
use localist_common::{time, Payload, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// List header to publish
#[derive(Debug, Clone)]
pub struct NewGoldList {
    pub slug: String,
    pub title: String,
    pub city: Option<String>,
    pub category: Option<String>,
    pub filter: Payload,
    pub algorithm_id: String,
    pub algorithm_version: i64,
}

/// Ranked entry; position comes from its index
#[derive(Debug, Clone)]
pub struct NewGoldItem {
    pub silver_venue_id: String,
    pub canonical_name: String,
    pub final_score: f64,
    pub score_breakdown: Payload,
}

/// Replace a list (creating it on first publish) and lock its algorithm
pub async fn replace_list(pool: &SqlitePool, list: &NewGoldList, items: &[NewGoldItem]) -> Result<GoldList> {
    let now = time::now();
    let now_db = time::to_db(now);
    let filter = list.filter.to_json()?;

    let mut tx = pool.begin().await?;

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM gold_lists WHERE slug = ?")
        .bind(&list.slug)
        .fetch_optional(&mut *tx)
        .await?;

    let list_id = match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE gold_lists SET
                    title = ?, city = ?, category = ?, filter = ?,
                    algorithm_id = ?, algorithm_version = ?, item_count = ?, published_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&list.title)
            .bind(&list.city)
            .bind(&list.category)
            .bind(&filter)
            .bind(&list.algorithm_id)
            .bind(list.algorithm_version)
            .bind(items.len() as i64)
            .bind(&now_db)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM gold_list_items WHERE gold_list_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO gold_lists (
                    id, slug, title, city, category, filter, algorithm_id,
                    algorithm_version, item_count, published_at, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&list.slug)
            .bind(&list.title)
            .bind(&list.city)
            .bind(&list.category)
            .bind(&filter)
            .bind(&list.algorithm_id)
            .bind(list.algorithm_version)
            .bind(items.len() as i64)
            .bind(&now_db)
            .bind(&now_db)
            .execute(&mut *tx)
            .await?;
            id
        }
    };

    for (idx, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO gold_list_items (
                id, gold_list_id, silver_venue_id, position, canonical_name,
                final_score, score_breakdown
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&list_id)
        .bind(&item.silver_venue_id)
        .bind(idx as i64 + 1)
        .bind(&item.canonical_name)
        .bind(item.final_score)
        .bind(item.score_breakdown.to_json()?)
        .execute(&mut *tx)
        .await?;
    }

    lock_algorithm(&mut *tx, &list.algorithm_id).await?;

    tx.commit().await?;

    Ok(GoldList {
        id: list_id,
        slug: list.slug.clone(),
        title: list.title.clone(),
        city: list.city.clone(),
        category: list.category.clone(),
        filter: list.filter.clone(),
        algorithm_id: list.algorithm_id.clone(),
        algorithm_version: list.algorithm_version,
        item_count: items.len() as i64,
        published_at: now,
    })
}

fn list_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<GoldList> {
    let filter: String = row.get("filter");
    let published_at: String = row.get("published_at");
    Ok(GoldList {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        city: row.get("city"),
        category: row.get("category"),
        filter: Payload::from_json(&filter)?,
        algorithm_id: row.get("algorithm_id"),
        algorithm_version: row.get("algorithm_version"),
        item_count: row.get("item_count"),
        published_at: time::from_db(&published_at)?,
    })
}

const LIST_COLUMNS: &str = "id, slug, title, city, category, filter, algorithm_id, \
     algorithm_version, item_count, published_at";

pub async fn get_list_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<GoldList>> {
    let row = sqlx::query(&format!("SELECT {LIST_COLUMNS} FROM gold_lists WHERE slug = ?"))
        .bind(slug)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(list_from_row).transpose()
}

pub async fn list_lists(pool: &SqlitePool) -> Result<Vec<GoldList>> {
    let rows = sqlx::query(&format!("SELECT {LIST_COLUMNS} FROM gold_lists ORDER BY slug"))
        .fetch_all(pool)
        .await?;

    rows.iter().map(list_from_row).collect()
}

/// Items of a list in rank order
pub async fn list_items(pool: &SqlitePool, list_id: &str) -> Result<Vec<GoldListItem>> {
    let rows = sqlx::query(
        r#"
        SELECT id, gold_list_id, silver_venue_id, position, canonical_name, final_score, score_breakdown
        FROM gold_list_items
        WHERE gold_list_id = ?
        ORDER BY position
        "#,
    )
    .bind(list_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let breakdown: String = row.get("score_breakdown");
            Ok(GoldListItem {
                id: row.get("id"),
                gold_list_id: row.get("gold_list_id"),
                silver_venue_id: row.get("silver_venue_id"),
                position: row.get("position"),
                canonical_name: row.get("canonical_name"),
                final_score: row.get("final_score"),
                score_breakdown: Payload::from_json(&breakdown)?,
            })
        })
        .collect()
}

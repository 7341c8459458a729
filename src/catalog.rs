//! Catalog maintenance: the indexing queue, activation, merge suggestions
//! and the paginated feed of active positions.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::db;
use crate::error::{Error, Result};
use crate::models::{CatalogItem, SuggestedMerge};
use crate::normalize::catalog_description;

pub const TARGET_CATALOG: &str = "catalog";

/// Upper bound on rows returned by any feed.
pub const MAX_BATCH_LIMIT: i64 = 1000;

/// Ids per `IN (...)` list when activating in bulk.
const ACTIVATE_CHUNK: usize = 500;

/// Validate a caller-supplied limit and clamp it to [`MAX_BATCH_LIMIT`].
pub(crate) fn clamp_limit(limit: i64) -> Result<i64> {
    if limit <= 0 {
        return Err(Error::validation(format!(
            "limit must be positive, got {}",
            limit
        )));
    }
    Ok(limit.min(MAX_BATCH_LIMIT))
}

pub(crate) fn item_from_row(row: &SqliteRow) -> CatalogItem {
    let standard_job_title: String = row.get("standard_job_title");
    let unit: Option<String> = row.get("unit");
    CatalogItem {
        id: row.get("id"),
        description: catalog_description(&standard_job_title, unit.as_deref()),
        standard_job_title,
        unit,
    }
}

/// `POSITION` rows still waiting for the external indexer, oldest first.
pub async fn get_unindexed_catalog_items(pool: &SqlitePool, limit: i64) -> Result<Vec<CatalogItem>> {
    let limit = clamp_limit(limit)?;

    let rows = sqlx::query(
        r#"
        SELECT cp.id, cp.standard_job_title, u.normalized_name AS unit
        FROM catalog_positions cp
        LEFT JOIN units u ON u.id = cp.unit_id
        WHERE cp.status = 'pending_indexing' AND cp.kind = 'POSITION'
        ORDER BY cp.id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(item_from_row).collect())
}

/// Move pending rows to `active`. Ids that are unknown or not pending are
/// skipped. Returns the number of rows that changed.
pub async fn mark_catalog_items_as_active(pool: &SqlitePool, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let now = Utc::now().timestamp();
    let mut tx = db::begin_write(pool).await?;
    let mut activated = 0u64;

    for chunk in ids.chunks(ACTIVATE_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE catalog_positions SET status = 'active', updated_at = ",
        );
        qb.push_bind(now);
        qb.push(" WHERE status = 'pending_indexing' AND id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        activated += qb.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;

    info!(
        target: TARGET_CATALOG,
        requested = ids.len(),
        activated,
        "catalog items activated"
    );
    Ok(activated)
}

/// Record that `duplicate_id` looks like a copy of `main_id`.
///
/// Returns `false` without writing for a self-merge. Re-suggesting an
/// existing pair replaces its score.
pub async fn suggest_merge(pool: &SqlitePool, merge: &SuggestedMerge) -> Result<bool> {
    if merge.main_id <= 0 || merge.duplicate_id <= 0 {
        return Err(Error::validation(format!(
            "catalog ids must be positive, got {} and {}",
            merge.main_id, merge.duplicate_id
        )));
    }
    if !(0.0..=1.0).contains(&merge.score) {
        return Err(Error::validation(format!(
            "score must be within [0, 1], got {}",
            merge.score
        )));
    }
    if merge.main_id == merge.duplicate_id {
        debug!(target: TARGET_CATALOG, id = merge.main_id, "ignoring self-merge");
        return Ok(false);
    }

    for id in [merge.main_id, merge.duplicate_id] {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM catalog_positions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            return Err(Error::not_found("catalog position", id));
        }
    }

    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO suggested_merges (main_id, duplicate_id, score, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(main_id, duplicate_id) DO UPDATE SET
            score = excluded.score,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(merge.main_id)
    .bind(merge.duplicate_id)
    .bind(merge.score)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(true)
}

/// One page of `active` rows ordered by id.
pub async fn get_all_active_catalog_items(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<CatalogItem>> {
    let limit = clamp_limit(limit)?;
    if offset < 0 {
        return Err(Error::validation(format!(
            "offset must not be negative, got {}",
            offset
        )));
    }

    let rows = sqlx::query(
        r#"
        SELECT cp.id, cp.standard_job_title, u.normalized_name AS unit
        FROM catalog_positions cp
        LEFT JOIN units u ON u.id = cp.unit_id
        WHERE cp.status = 'active'
        ORDER BY cp.id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(item_from_row).collect())
}

/// Highest-scoring merge suggestions first.
pub async fn list_suggested_merges(pool: &SqlitePool, limit: i64) -> Result<Vec<SuggestedMerge>> {
    let limit = clamp_limit(limit)?;

    let rows = sqlx::query(
        "SELECT main_id, duplicate_id, score FROM suggested_merges ORDER BY score DESC, id LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SuggestedMerge {
            main_id: row.get("main_id"),
            duplicate_id: row.get("duplicate_id"),
            score: row.get("score"),
        })
        .collect())
}

//! Unmatched-position feed and match application.
//!
//! An imported `POSITION` item with no live cache entry is bound to a draft
//! catalog position and stays in the unmatched feed until an external
//! classifier picks its canonical catalog position through
//! [`match_position`]. The match also writes the matching cache, so later
//! imports of the same title bind directly.
//!
//! Cache entries are keyed by `(job_title_hash, norm_version)` and expire
//! after the configured TTL. Expiry is applied at lookup time;
//! [`purge_expired_cache`] removes dead entries on demand.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::catalog::clamp_limit;
use crate::config::MatchingConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::normalize::rich_context;

pub const TARGET_MATCHING: &str = "matching";

/// Maximum ancestor depth followed when building breadcrumbs.
const MAX_BREADCRUMB_DEPTH: i64 = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedPosition {
    pub position_item_id: i64,
    pub raw_job_title: String,
    pub rich_context: String,
    pub draft_catalog_id: i64,
    pub standard_job_title: String,
    pub job_title_hash: Option<String>,
}

/// A classifier's verdict for one position item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub position_item_id: i64,
    pub catalog_position_id: i64,
    pub job_title_hash: String,
    /// Defaults to 1 when absent or zero.
    #[serde(default)]
    pub norm_version: Option<i64>,
}

/// Canonical catalog id cached for `hash`, ignoring expired entries.
pub(crate) async fn lookup_cached(
    conn: &mut SqliteConnection,
    hash: &str,
    norm_version: i64,
    now: i64,
) -> Result<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT catalog_position_id FROM matching_cache
        WHERE job_title_hash = ? AND norm_version = ? AND expires_at > ?
        "#,
    )
    .bind(hash)
    .bind(norm_version)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Titles of the HEADER / LOT_HEADER ancestors of an item, outermost first.
async fn breadcrumbs(
    conn: &mut SqliteConnection,
    proposal_id: i64,
    position_key: &str,
) -> Result<Vec<String>> {
    let titles: Vec<String> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE ancestors(position_key, parent_key, job_title, item_kind, depth) AS (
            SELECT position_key, parent_key, job_title, item_kind, 0
            FROM position_items
            WHERE proposal_id = ? AND position_key = ?
            UNION ALL
            SELECT p.position_key, p.parent_key, p.job_title, p.item_kind, a.depth + 1
            FROM position_items p
            JOIN ancestors a ON p.position_key = a.parent_key
            WHERE p.proposal_id = ? AND a.depth < ?
        )
        SELECT job_title FROM ancestors
        WHERE depth > 0 AND item_kind IN ('HEADER', 'LOT_HEADER')
        ORDER BY depth DESC
        "#,
    )
    .bind(proposal_id)
    .bind(position_key)
    .bind(proposal_id)
    .bind(MAX_BREADCRUMB_DEPTH)
    .fetch_all(&mut *conn)
    .await?;
    Ok(titles)
}

/// Items still bound to a draft catalog position, oldest first.
pub async fn get_unmatched_positions(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<UnmatchedPosition>> {
    let limit = clamp_limit(limit)?;
    let mut conn = pool.acquire().await?;

    let rows = sqlx::query(
        r#"
        SELECT pi.id, pi.proposal_id, pi.position_key, pi.job_title, pi.job_title_hash,
               pi.draft_catalog_position_id, cp.standard_job_title
        FROM position_items pi
        JOIN catalog_positions cp ON cp.id = pi.draft_catalog_position_id
        WHERE pi.draft_catalog_position_id IS NOT NULL
        ORDER BY pi.id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut unmatched = Vec::with_capacity(rows.len());
    for row in rows {
        let proposal_id: i64 = row.get("proposal_id");
        let position_key: String = row.get("position_key");
        let raw_job_title: String = row.get("job_title");

        let path = breadcrumbs(&mut conn, proposal_id, &position_key).await?;

        unmatched.push(UnmatchedPosition {
            position_item_id: row.get("id"),
            rich_context: rich_context(&path, &raw_job_title),
            raw_job_title,
            draft_catalog_id: row.get("draft_catalog_position_id"),
            standard_job_title: row.get("standard_job_title"),
            job_title_hash: row.get("job_title_hash"),
        });
    }

    debug!(target: TARGET_MATCHING, limit, returned = unmatched.len(), "unmatched feed");
    Ok(unmatched)
}

/// Bind a position item to its canonical catalog position and remember
/// the verdict in the matching cache. Both writes commit together.
pub async fn match_position(
    pool: &SqlitePool,
    config: &MatchingConfig,
    request: &MatchRequest,
) -> Result<()> {
    if request.position_item_id <= 0 || request.catalog_position_id <= 0 {
        return Err(Error::validation(format!(
            "ids must be positive, got position item {} and catalog position {}",
            request.position_item_id, request.catalog_position_id
        )));
    }
    let hash = request.job_title_hash.trim();
    if hash.is_empty() {
        return Err(Error::validation("job title hash must not be empty"));
    }
    let norm_version = match request.norm_version {
        None | Some(0) => 1,
        Some(version) if version < 0 => {
            return Err(Error::validation(format!(
                "norm version must not be negative, got {}",
                version
            )))
        }
        Some(version) => version,
    };

    let now = Utc::now().timestamp();
    let expires_at = now + config.cache_ttl().num_seconds();
    let mut tx = db::begin_write(pool).await?;

    let catalog: Option<i64> = sqlx::query_scalar("SELECT id FROM catalog_positions WHERE id = ?")
        .bind(request.catalog_position_id)
        .fetch_optional(&mut *tx)
        .await?;
    if catalog.is_none() {
        return Err(Error::not_found(
            "catalog position",
            request.catalog_position_id,
        ));
    }

    let updated = sqlx::query(
        r#"
        UPDATE position_items
        SET catalog_position_id = ?, draft_catalog_position_id = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.catalog_position_id)
    .bind(now)
    .bind(request.position_item_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(Error::not_found("position item", request.position_item_id));
    }

    sqlx::query(
        r#"
        INSERT INTO matching_cache (job_title_hash, norm_version, catalog_position_id, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(job_title_hash, norm_version) DO UPDATE SET
            catalog_position_id = excluded.catalog_position_id,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(hash)
    .bind(norm_version)
    .bind(request.catalog_position_id)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        target: TARGET_MATCHING,
        position_item_id = request.position_item_id,
        catalog_position_id = request.catalog_position_id,
        norm_version,
        "position matched"
    );
    Ok(())
}

/// Delete cache entries past their expiry. Returns how many were removed.
pub async fn purge_expired_cache(pool: &SqlitePool) -> Result<u64> {
    let removed = sqlx::query("DELETE FROM matching_cache WHERE expires_at <= ?")
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?
        .rows_affected();

    info!(target: TARGET_MATCHING, removed, "expired cache entries purged");
    Ok(removed)
}

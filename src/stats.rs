//! Database statistics.
//!
//! A quick overview of what has been imported and how far matching and
//! indexing have progressed. Used by `tender stats`.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::Result;

/// Row counts per table, in display order.
const COUNTED_TABLES: &[(&str, &str)] = &[
    ("Tenders", "tenders"),
    ("Lots", "lots"),
    ("Proposals", "proposals"),
    ("Contractors", "contractors"),
    ("Position items", "position_items"),
    ("Summary lines", "summary_lines"),
    ("Catalog", "catalog_positions"),
    ("Merge suggestions", "suggested_merges"),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct DbStats {
    pub tables: Vec<(String, i64)>,
    /// `(kind, status, count)` for every catalog combination present.
    pub catalog: Vec<(String, String, i64)>,
    pub unmatched_items: i64,
    pub cache_live: i64,
    pub cache_expired: i64,
    pub last_import_ts: Option<i64>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<DbStats> {
    let mut stats = DbStats::default();

    for (label, table) in COUNTED_TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await?;
        stats.tables.push((label.to_string(), count));
    }

    let rows = sqlx::query(
        r#"
        SELECT kind, status, COUNT(*) AS n
        FROM catalog_positions
        GROUP BY kind, status
        ORDER BY kind, status
        "#,
    )
    .fetch_all(pool)
    .await?;
    stats.catalog = rows
        .iter()
        .map(|row| (row.get("kind"), row.get("status"), row.get("n")))
        .collect();

    stats.unmatched_items = sqlx::query_scalar(
        "SELECT COUNT(*) FROM position_items WHERE draft_catalog_position_id IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    let now = Utc::now().timestamp();
    let cache = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN expires_at > ? THEN 1 ELSE 0 END), 0) AS live,
            COALESCE(SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END), 0) AS expired
        FROM matching_cache
        "#,
    )
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;
    stats.cache_live = cache.get("live");
    stats.cache_expired = cache.get("expired");

    stats.last_import_ts = sqlx::query_scalar("SELECT MAX(updated_at) FROM tenders")
        .fetch_one(pool)
        .await?;

    Ok(stats)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, pool: &SqlitePool) -> anyhow::Result<()> {
    let stats = collect_stats(pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Tender Harness — Database Stats");
    println!("===============================");
    println!();
    println!("  Database:          {}", config.db.path.display());
    println!("  Size:              {}", format_bytes(db_size));
    println!(
        "  Last import:       {}",
        stats
            .last_import_ts
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    for (label, count) in &stats.tables {
        println!("  {:<18} {}", format!("{}:", label), count);
    }
    println!("  {:<18} {}", "Unmatched items:", stats.unmatched_items);
    println!(
        "  {:<18} {} live / {} expired",
        "Matching cache:", stats.cache_live, stats.cache_expired
    );

    if !stats.catalog.is_empty() {
        println!();
        println!("  Catalog:");
        println!("  {:<12} {:<18} {:>8}", "KIND", "STATUS", "COUNT");
        println!("  {}", "-".repeat(40));
        for (kind, status, count) in &stats.catalog {
            println!("  {:<12} {:<18} {:>8}", kind, status, count);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_database_counts_zero() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("stats.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let stats = collect_stats(&pool).await.unwrap();

        assert_eq!(stats.tables.len(), COUNTED_TABLES.len());
        assert!(stats.tables.iter().all(|(_, n)| *n == 0));
        assert!(stats.catalog.is_empty());
        assert_eq!((stats.cache_live, stats.cache_expired), (0, 0));
        assert_eq!(stats.last_import_ts, None);
    }

    #[tokio::test]
    async fn stats_print_through_callers_pool() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("stats.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        run_stats(&config, &pool).await.unwrap();

        assert!(!pool.is_closed());
        assert_eq!(collect_stats(&pool).await.unwrap().unmatched_items, 0);
    }

    #[test]
    fn bytes_render_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}

//! SQLite connection management.
//!
//! WAL mode lets the matching/catalog readers run while an import holds the
//! write lock. The busy timeout makes concurrent imports queue on that lock
//! instead of failing immediately, which only works when a writer takes the
//! lock before its first read: [`begin_write`] opens every write transaction
//! with `BEGIN IMMEDIATE`. Foreign keys are enforced so a match can
//! never point a position item at a catalog row that does not exist.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::error::{Result, ResultExt};

pub const TARGET_DB: &str = "db";

/// Create a connection pool to the configured SQLite database.
///
/// Creates the database file and parent directories if they don't exist.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(sqlx::Error::Io)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;

    info!(target: TARGET_DB, path = %db_path.display(), "database pool ready");
    Ok(pool)
}

/// Begin a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads first and writes later cannot wait for
/// the lock once another writer has committed past its snapshot; SQLite
/// fails it with `SQLITE_BUSY` straight away. Taking the lock up front lets
/// the busy timeout queue writers instead.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_writer_waits_for_the_first() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("nested").join("db.sqlite"));
        let pool = connect(&config).await.unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        let mut first = begin_write(&pool).await.unwrap();
        sqlx::query("INSERT INTO t (v) VALUES (1)")
            .execute(&mut *first)
            .await
            .unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut second = begin_write(&pool).await?;
                let seen: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
                    .fetch_one(&mut *second)
                    .await?;
                sqlx::query("INSERT INTO t (v) VALUES (2)")
                    .execute(&mut *second)
                    .await?;
                second.commit().await?;
                Ok::<_, crate::error::Error>(seen)
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(config.db.path.exists());
    }
}

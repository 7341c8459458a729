//! Database schema. Every statement is idempotent, so `tender init` can be
//! run against an existing database.

use sqlx::SqlitePool;
use tracing::info;

use crate::db::TARGET_DB;
use crate::error::{Result, ResultExt};

const SCHEMA: &[(&str, &str)] = &[
    (
        "objects",
        r#"
        CREATE TABLE IF NOT EXISTS objects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            address TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "executors",
        r#"
        CREATE TABLE IF NOT EXISTS executors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            phone TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "contractors",
        r#"
        CREATE TABLE IF NOT EXISTS contractors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            inn TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            address TEXT,
            accreditation TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "units",
        r#"
        CREATE TABLE IF NOT EXISTS units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            normalized_name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "catalog_positions",
        r#"
        CREATE TABLE IF NOT EXISTS catalog_positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            standard_job_title TEXT NOT NULL,
            unit_id INTEGER,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES units(id)
        )
        "#,
    ),
    // A missing unit is one key value, not "distinct from everything".
    (
        "idx_catalog_positions_key",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_positions_key ON catalog_positions(standard_job_title, IFNULL(unit_id, 0))",
    ),
    (
        "idx_catalog_positions_status",
        "CREATE INDEX IF NOT EXISTS idx_catalog_positions_status ON catalog_positions(status, kind)",
    ),
    (
        "tenders",
        r#"
        CREATE TABLE IF NOT EXISTS tenders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            etp_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            object_id INTEGER NOT NULL,
            executor_id INTEGER,
            prepared_at TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (object_id) REFERENCES objects(id),
            FOREIGN KEY (executor_id) REFERENCES executors(id)
        )
        "#,
    ),
    (
        "lots",
        r#"
        CREATE TABLE IF NOT EXISTS lots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tender_id INTEGER NOT NULL,
            lot_key TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(tender_id, lot_key),
            FOREIGN KEY (tender_id) REFERENCES tenders(id)
        )
        "#,
    ),
    (
        "proposals",
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lot_id INTEGER NOT NULL,
            contractor_id INTEGER NOT NULL,
            proposal_key TEXT NOT NULL,
            is_baseline BOOLEAN NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(lot_id, contractor_id),
            FOREIGN KEY (lot_id) REFERENCES lots(id),
            FOREIGN KEY (contractor_id) REFERENCES contractors(id)
        )
        "#,
    ),
    (
        "proposal_additional_info",
        r#"
        CREATE TABLE IF NOT EXISTS proposal_additional_info (
            proposal_id INTEGER NOT NULL,
            info_key TEXT NOT NULL,
            info_value TEXT NOT NULL,
            PRIMARY KEY (proposal_id, info_key),
            FOREIGN KEY (proposal_id) REFERENCES proposals(id)
        )
        "#,
    ),
    (
        "position_items",
        r#"
        CREATE TABLE IF NOT EXISTS position_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id INTEGER NOT NULL,
            position_key TEXT NOT NULL,
            parent_key TEXT,
            number TEXT,
            job_title TEXT NOT NULL,
            comment TEXT,
            unit_id INTEGER,
            quantity REAL,
            unit_price REAL,
            total_cost REAL,
            is_chapter BOOLEAN NOT NULL,
            item_kind TEXT NOT NULL,
            job_title_hash TEXT,
            catalog_position_id INTEGER,
            draft_catalog_position_id INTEGER,
            updated_at INTEGER NOT NULL,
            UNIQUE(proposal_id, position_key),
            FOREIGN KEY (proposal_id) REFERENCES proposals(id),
            FOREIGN KEY (unit_id) REFERENCES units(id),
            FOREIGN KEY (catalog_position_id) REFERENCES catalog_positions(id),
            FOREIGN KEY (draft_catalog_position_id) REFERENCES catalog_positions(id)
        )
        "#,
    ),
    (
        "idx_position_items_draft",
        "CREATE INDEX IF NOT EXISTS idx_position_items_draft ON position_items(draft_catalog_position_id)",
    ),
    (
        "summary_lines",
        r#"
        CREATE TABLE IF NOT EXISTS summary_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id INTEGER NOT NULL,
            summary_key TEXT NOT NULL,
            job_title TEXT NOT NULL,
            total_cost REAL,
            vat REAL,
            updated_at INTEGER NOT NULL,
            UNIQUE(proposal_id, summary_key),
            FOREIGN KEY (proposal_id) REFERENCES proposals(id)
        )
        "#,
    ),
    (
        "tender_documents",
        r#"
        CREATE TABLE IF NOT EXISTS tender_documents (
            tender_id INTEGER PRIMARY KEY,
            raw BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (tender_id) REFERENCES tenders(id)
        )
        "#,
    ),
    (
        "matching_cache",
        r#"
        CREATE TABLE IF NOT EXISTS matching_cache (
            job_title_hash TEXT NOT NULL,
            norm_version INTEGER NOT NULL,
            catalog_position_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (job_title_hash, norm_version),
            FOREIGN KEY (catalog_position_id) REFERENCES catalog_positions(id)
        )
        "#,
    ),
    (
        "suggested_merges",
        r#"
        CREATE TABLE IF NOT EXISTS suggested_merges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            main_id INTEGER NOT NULL,
            duplicate_id INTEGER NOT NULL,
            score REAL NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(main_id, duplicate_id),
            FOREIGN KEY (main_id) REFERENCES catalog_positions(id),
            FOREIGN KEY (duplicate_id) REFERENCES catalog_positions(id)
        )
        "#,
    ),
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for (name, statement) in SCHEMA {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .with_context(|| format!("creating {}", name))?;
    }

    info!(target: TARGET_DB, statements = SCHEMA.len(), "schema up to date");
    Ok(())
}

//! # Tender Harness CLI (`tender`)
//!
//! The `tender` binary drives the reconciliation engine: schema setup,
//! tender import, the matching feed and catalog maintenance.
//!
//! ## Usage
//!
//! ```bash
//! tender --config ./config/tender.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tender init` | Create the SQLite database and run schema migrations |
//! | `tender import <file>` | Import a parsed tender document (JSON) |
//! | `tender stats` | Show table counts and matching/indexing progress |
//! | `tender raw <tender-id>` | Print the stored raw document |
//! | `tender match unmatched` | JSON feed of items awaiting a catalog match |
//! | `tender match apply` | Bind an item to a catalog position and cache it |
//! | `tender catalog pending` | JSON feed of catalog rows awaiting indexing |
//! | `tender catalog activate <ids>` | Mark indexed catalog rows active |
//! | `tender catalog merge` | Record a merge suggestion |
//! | `tender catalog merges` | List merge suggestions, best first |
//! | `tender catalog active` | Page through active catalog rows |
//! | `tender catalog scan` | Suggest merges for near-identical titles |
//! | `tender cache purge` | Delete expired matching-cache entries |
//!
//! Feeds are printed as JSON on stdout; logs go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use tender_harness::config::{self, Config};
use tender_harness::duplicates::{DuplicateScan, DEFAULT_THRESHOLD};
use tender_harness::matching::MatchRequest;
use tender_harness::models::SuggestedMerge;
use tender_harness::payload::TenderPayload;
use tender_harness::{catalog, db, import, logging, matching, migrate, stats};

/// Tender Harness CLI — tender import and catalog reconciliation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only the `[db]` section is required.
#[derive(Parser)]
#[command(
    name = "tender",
    about = "Tender Harness — tender import and catalog reconciliation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tender.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it against an existing database is safe.
    Init,

    /// Import a parsed tender document.
    ///
    /// The whole document is written in one transaction. Re-importing the
    /// same document resolves to the same ids and changes nothing.
    Import {
        /// Path to the JSON document.
        file: PathBuf,
    },

    /// Show database statistics.
    Stats,

    /// Print the raw document stored for a tender.
    Raw {
        /// External (ETP) tender id.
        tender_id: String,
    },

    /// Unmatched-position feed and match application.
    Match {
        #[command(subcommand)]
        action: MatchAction,
    },

    /// Catalog indexing and merge suggestions.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Matching-cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum MatchAction {
    /// Items still bound to a draft catalog position (JSON).
    Unmatched {
        /// Maximum number of items (clamped to 1000).
        #[arg(long, default_value = "100")]
        limit: i64,
    },

    /// Bind an item to its canonical catalog position.
    Apply {
        /// Position item id.
        #[arg(long)]
        item: i64,

        /// Canonical catalog position id.
        #[arg(long)]
        catalog: i64,

        /// Job-title hash the verdict is cached under.
        #[arg(long)]
        hash: String,

        /// Normalization version (defaults to 1).
        #[arg(long)]
        norm_version: Option<i64>,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Catalog positions awaiting indexing (JSON).
    Pending {
        #[arg(long, default_value = "100")]
        limit: i64,
    },

    /// Mark catalog positions as indexed.
    Activate {
        /// Catalog position ids.
        ids: Vec<i64>,
    },

    /// Record that one catalog position duplicates another.
    Merge {
        #[arg(long)]
        main: i64,

        #[arg(long)]
        duplicate: i64,

        /// Similarity score in [0, 1].
        #[arg(long)]
        score: f64,
    },

    /// Merge suggestions, highest score first (JSON).
    Merges {
        #[arg(long, default_value = "100")]
        limit: i64,
    },

    /// Active catalog positions ordered by id (JSON).
    Active {
        #[arg(long, default_value = "100")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Suggest merges for near-identical titles within a unit.
    Scan {
        /// Minimum Jaro-Winkler similarity.
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete expired matching-cache entries.
    Purge,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging.filter);

    let pool = db::connect(&cfg).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            run_import(&cfg, &pool, &file).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg, &pool).await?;
        }
        Commands::Raw { tender_id } => {
            let raw = import::get_raw_document(&pool, &tender_id).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&raw)?;
            stdout.flush()?;
        }
        Commands::Match { action } => match action {
            MatchAction::Unmatched { limit } => {
                print_json(&matching::get_unmatched_positions(&pool, limit).await?)?;
            }
            MatchAction::Apply {
                item,
                catalog,
                hash,
                norm_version,
            } => {
                let request = MatchRequest {
                    position_item_id: item,
                    catalog_position_id: catalog,
                    job_title_hash: hash,
                    norm_version,
                };
                matching::match_position(&pool, &cfg.matching, &request).await?;
                println!("matched item {} to catalog position {}", item, catalog);
                println!("ok");
            }
        },
        Commands::Catalog { action } => match action {
            CatalogAction::Pending { limit } => {
                print_json(&catalog::get_unindexed_catalog_items(&pool, limit).await?)?;
            }
            CatalogAction::Activate { ids } => {
                let activated = catalog::mark_catalog_items_as_active(&pool, &ids).await?;
                println!("activate");
                println!("  requested: {}", ids.len());
                println!("  activated: {}", activated);
                println!("ok");
            }
            CatalogAction::Merge {
                main,
                duplicate,
                score,
            } => {
                let merge = SuggestedMerge {
                    main_id: main,
                    duplicate_id: duplicate,
                    score,
                };
                if catalog::suggest_merge(&pool, &merge).await? {
                    println!("suggested merge {} <- {} ({:.3})", main, duplicate, score);
                } else {
                    println!("ignored self-merge of {}", main);
                }
                println!("ok");
            }
            CatalogAction::Merges { limit } => {
                print_json(&catalog::list_suggested_merges(&pool, limit).await?)?;
            }
            CatalogAction::Active { limit, offset } => {
                print_json(&catalog::get_all_active_catalog_items(&pool, limit, offset).await?)?;
            }
            CatalogAction::Scan { threshold } => {
                let report = DuplicateScan::new(threshold)?.run(&pool).await?;
                println!("scan");
                println!("  scanned: {}", report.scanned);
                println!("  suggested: {}", report.suggested);
                println!("ok");
            }
        },
        Commands::Cache { action } => match action {
            CacheAction::Purge => {
                let removed = matching::purge_expired_cache(&pool).await?;
                println!("purged {} expired cache entries", removed);
                println!("ok");
            }
        },
    }

    pool.close().await;
    Ok(())
}

async fn run_import(cfg: &Config, pool: &sqlx::SqlitePool, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read(file)
        .with_context(|| format!("Failed to read tender document: {}", file.display()))?;
    let payload = TenderPayload::from_slice(&raw)?;

    let outcome = import::import_with_timeout(pool, cfg, &payload, &raw).await?;
    let stats = &outcome.stats;

    println!("import {}", payload.tender_id.trim());
    println!("  tender id: {}", outcome.tender_id);
    println!("  lots: {}", stats.lots);
    println!("  proposals: {}", stats.proposals);
    println!(
        "  position items: {} ({} unchanged)",
        stats.position_items, stats.position_items_unchanged
    );
    println!("  summary lines: {}", stats.summary_lines);
    println!("  cache hits: {}", stats.cache_hits);
    println!("  pending items: {}", stats.pending_items);
    println!("  new pending: {}", outcome.has_new_pending_items);
    println!("ok");
    Ok(())
}

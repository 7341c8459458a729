//! # Tender Harness
//!
//! Import and catalog reconciliation engine for construction tenders.
//!
//! A parsed tender document (object, executor, lots, the organizer's
//! baseline estimate and every contractor's priced proposal) is written to
//! SQLite in one transaction. Each line item is linked to a deduplicated
//! catalog of standardized work positions, either directly through the
//! matching cache or through a draft catalog row that waits in the
//! unmatched feed for an external classifier.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Tender    │──▶│   Import     │──▶│  SQLite   │
//! │  document  │   │ (reconcile)  │   │  WAL      │
//! └────────────┘   └──────────────┘   └─────┬─────┘
//!                                           │
//!                    ┌──────────────────────┤
//!                    ▼                      ▼
//!              ┌───────────┐         ┌────────────┐
//!              │ Matching  │         │  Catalog   │
//!              │ feed/match│         │ index/merge│
//!              └───────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tender init                           # create database
//! tender import ./tender.json           # import a parsed document
//! tender match unmatched --limit 100    # feed for the classifier
//! tender match apply --item 12 --catalog 7 --hash <sha256>
//! tender catalog pending                # feed for the indexer
//! tender catalog activate 7 8 9
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and context wrapping |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Persisted entity types |
//! | [`payload`] | Parsed tender document |
//! | [`normalize`] | Title normalization, kind classification, hashing |
//! | [`reconcile`] | Generic get-or-create-or-update |
//! | [`resolvers`] | Natural-key resolvers |
//! | [`import`] | Full-tender import |
//! | [`matching`] | Unmatched feed and match application |
//! | [`catalog`] | Indexing queue, activation, merge suggestions |
//! | [`duplicates`] | Local duplicate scan |
//! | [`stats`] | Database statistics |

pub mod catalog;
pub mod config;
pub mod db;
pub mod duplicates;
pub mod error;
pub mod import;
pub mod logging;
pub mod matching;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod payload;
pub mod reconcile;
pub mod resolvers;
pub mod stats;

pub use error::{Error, ErrorKind, Result};

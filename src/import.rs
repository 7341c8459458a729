//! Full-tender import.
//!
//! [`import_full_tender`] writes one parsed tender document inside a single
//! SQLite transaction:
//!
//! ```text
//! validate payload
//!   → object, executor → tender
//!   → per lot: lot → baseline (Initiator) → contractor proposals
//!       → per proposal: additional info, position items, summary lines
//!   → raw document
//! commit
//! ```
//!
//! Every natural-key entity goes through the reconciliation primitive, so a
//! re-import of the same document resolves to the same ids and leaves
//! unchanged rows untouched. Stale rows from earlier versions of a document
//! are not deleted. Any error rolls the whole transaction back, and so does
//! dropping the future before it completes.
//!
//! Position items of kind `POSITION` are bound through the matching cache
//! first. A live cache entry binds the item to its canonical catalog
//! position directly; a miss creates (or finds) a draft catalog position
//! and leaves the item in the unmatched feed.
//!
//! A catalog key `(standard title, unit)` gets one kind per document. When
//! the same title is a lot header in one lot and a plain position in
//! another, the header role wins for the catalog row, so re-importing the
//! document never flips the row back and forth.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::config::{Config, MatchingConfig};
use crate::db;
use crate::error::{Error, Result, ResultExt};
use crate::matching::lookup_cached;
use crate::models::CatalogKind;
use crate::normalize::{
    classify_kind, job_title_hash, normalize_unit, parse_prepared_date, resolve_standard_title,
    standard_job_title,
};
use crate::payload::{
    info_value_text, optional, required, LotPayload, PositionPayload, ProposalPayload,
    SummaryPayload, TenderPayload,
};
use crate::reconcile::{get_or_create_or_update, OutcomeCounts};
use crate::resolvers::{
    CatalogParams, CatalogResolver, ContractorParams, ContractorResolver, ExecutorParams,
    ExecutorResolver, ObjectParams, ObjectResolver, UnitResolver,
};

pub const TARGET_IMPORT: &str = "import";

/// Proposal key under which a lot's baseline estimate is stored.
pub const BASELINE_PROPOSAL_KEY: &str = "baseline";

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub tender_id: i64,
    pub lot_ids: BTreeMap<String, i64>,
    /// True when at least one position item landed in the unmatched feed.
    pub has_new_pending_items: bool,
    pub stats: ImportStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub lots: usize,
    pub proposals: usize,
    pub additional_info: usize,
    pub position_items: usize,
    /// Items whose stored row already matched the document.
    pub position_items_unchanged: usize,
    pub summary_lines: usize,
    pub cache_hits: usize,
    pub pending_items: usize,
    /// Items with no usable title, stored without a catalog binding.
    pub unbound_items: usize,
    /// Objects, executors, contractors and units.
    pub entities: OutcomeCounts,
    pub catalog: OutcomeCounts,
}

impl ImportStats {
    fn merge(&mut self, other: &ImportStats) {
        self.lots += other.lots;
        self.proposals += other.proposals;
        self.additional_info += other.additional_info;
        self.position_items += other.position_items;
        self.position_items_unchanged += other.position_items_unchanged;
        self.summary_lines += other.summary_lines;
        self.cache_hits += other.cache_hits;
        self.pending_items += other.pending_items;
        self.unbound_items += other.unbound_items;
        self.entities.merge(other.entities);
        self.catalog.merge(other.catalog);
    }

    /// Number of resolver calls and item upserts that changed something.
    pub fn writes(&self) -> usize {
        self.entities.writes()
            + self.catalog.writes()
            + (self.position_items - self.position_items_unchanged)
    }
}

/// What one lot contributed to the import.
#[derive(Debug, Default)]
struct LotOutcome {
    lot_id: i64,
    has_new_pending: bool,
    stats: ImportStats,
}

/// Settings shared by every item of one lot.
struct LotScope<'a> {
    lot_title: &'a str,
    matching: &'a MatchingConfig,
    kinds: &'a KindPlan,
    now: i64,
}

/// Catalog kind per `(standard title, unit)` key, settled over the whole
/// document before anything is written.
#[derive(Debug, Default)]
struct KindPlan {
    kinds: HashMap<(String, Option<String>), CatalogKind>,
}

impl KindPlan {
    fn from_payload(payload: &TenderPayload) -> Self {
        let mut plan = KindPlan::default();
        for lot in payload.lots.values() {
            let bodies = lot.baseline.iter().chain(lot.proposals.values());
            for item in bodies.flat_map(|body| body.items.values()) {
                let Some(title) =
                    resolve_standard_title(&item.job_title, item.job_title_normalized.as_deref())
                else {
                    continue;
                };
                let kind = classify_kind(item.is_chapter, &item.job_title, &lot.title);
                plan.kinds
                    .entry((title, normalize_unit(item.unit.as_deref())))
                    .and_modify(|settled| *settled = settled.dominant(kind))
                    .or_insert(kind);
            }
        }
        plan
    }

    fn kind_for(&self, title: &str, unit: Option<&str>, local: CatalogKind) -> CatalogKind {
        self.kinds
            .get(&(title.to_string(), unit.map(str::to_string)))
            .copied()
            .unwrap_or(local)
    }
}

/// Entries of a string-keyed map in key order, so processing order never
/// depends on how the document serialized them.
fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// Import with the configured timeout. A timed-out import is rolled back.
pub async fn import_with_timeout(
    pool: &SqlitePool,
    config: &Config,
    payload: &TenderPayload,
    raw: &[u8],
) -> Result<ImportOutcome> {
    let limit = config.import.timeout();
    tokio::time::timeout(limit, import_full_tender(pool, &config.matching, payload, raw))
        .await
        .map_err(|_| Error::Timeout(limit))?
}

pub async fn import_full_tender(
    pool: &SqlitePool,
    matching: &MatchingConfig,
    payload: &TenderPayload,
    raw: &[u8],
) -> Result<ImportOutcome> {
    let tender_key = payload.tender_id.trim().to_string();
    let context = || format!("import tender '{}'", tender_key);

    validate_payload(payload).with_context(context)?;

    let mut tx = db::begin_write(pool).await.with_context(context)?;
    let outcome = import_in_tx(&mut *tx, matching, payload, raw)
        .await
        .with_context(context)?;
    tx.commit().await.with_context(context)?;

    info!(
        target: TARGET_IMPORT,
        tender = %tender_key,
        tender_id = outcome.tender_id,
        lots = outcome.lot_ids.len(),
        items = outcome.stats.position_items,
        pending = outcome.stats.pending_items,
        cache_hits = outcome.stats.cache_hits,
        "tender imported"
    );
    Ok(outcome)
}

/// Stored raw document bytes for an external tender id.
pub async fn get_raw_document(pool: &SqlitePool, tender_key: &str) -> Result<Vec<u8>> {
    let tender_key = required("tender id", tender_key)?;
    let raw: Option<Vec<u8>> = sqlx::query_scalar(
        r#"
        SELECT d.raw
        FROM tender_documents d
        JOIN tenders t ON t.id = d.tender_id
        WHERE t.etp_id = ?
        "#,
    )
    .bind(tender_key)
    .fetch_optional(pool)
    .await?;

    raw.ok_or_else(|| Error::not_found("tender document", tender_key))
}

/// Every required field, checked before the transaction opens.
fn validate_payload(payload: &TenderPayload) -> Result<()> {
    required("tender id", &payload.tender_id)?;
    ObjectParams::from_payload(&payload.object)?;
    if let Some(executor) = &payload.executor {
        ExecutorParams::from_payload(executor)?;
    }

    check_keys("lot key", payload.lots.keys())?;
    for (lot_key, lot) in sorted(&payload.lots) {
        validate_lot(lot_key, lot).with_context(|| format!("lot '{}'", lot_key))?;
    }
    Ok(())
}

/// Reject blank keys and keys that only differ by surrounding whitespace.
fn check_keys<'a>(what: &str, keys: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        let trimmed = required(what, key)?;
        if !seen.insert(trimmed) {
            return Err(Error::validation(format!("duplicate {} '{}'", what, trimmed)));
        }
    }
    Ok(())
}

fn validate_lot(lot_key: &str, lot: &LotPayload) -> Result<()> {
    required("lot key", lot_key)?;
    check_keys("proposal key", lot.proposals.keys())?;
    if let Some(baseline) = &lot.baseline {
        validate_proposal_body(baseline).with_context(|| "baseline")?;
    }
    for (proposal_key, proposal) in sorted(&lot.proposals) {
        let check = || -> Result<()> {
            required("proposal key", proposal_key)?;
            proposal_contractor(proposal)?;
            validate_proposal_body(proposal)
        };
        check().with_context(|| format!("proposal '{}'", proposal_key))?;
    }
    Ok(())
}

fn validate_proposal_body(proposal: &ProposalPayload) -> Result<()> {
    check_keys("position key", proposal.items.keys())?;
    check_keys("summary key", proposal.summary.keys())?;
    check_keys("additional info key", proposal.additional_info.keys())
}

fn proposal_contractor(proposal: &ProposalPayload) -> Result<ContractorParams> {
    let contractor = proposal
        .contractor
        .as_ref()
        .ok_or_else(|| Error::validation("proposal has no contractor"))?;
    ContractorParams::from_payload(contractor)
}

async fn import_in_tx(
    conn: &mut SqliteConnection,
    matching: &MatchingConfig,
    payload: &TenderPayload,
    raw: &[u8],
) -> Result<ImportOutcome> {
    let now = Utc::now().timestamp();
    let mut stats = ImportStats::default();

    let object_params = ObjectParams::from_payload(&payload.object)?;
    let object = get_or_create_or_update(&ObjectResolver, &mut *conn, &object_params)
        .await
        .with_context(|| format!("object '{}'", object_params.title))?;
    stats.entities.record(object.outcome);

    let executor_id = match &payload.executor {
        Some(executor) => {
            let params = ExecutorParams::from_payload(executor)?;
            let executor = get_or_create_or_update(&ExecutorResolver, &mut *conn, &params)
                .await
                .with_context(|| format!("executor '{}'", params.name))?;
            stats.entities.record(executor.outcome);
            Some(executor.entity.id)
        }
        None => None,
    };

    let prepared_at = parse_prepared_date(payload.prepared_date.as_deref())
        .map(|date| date.format("%Y-%m-%d %H:%M:%S").to_string());

    let tender_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tenders (etp_id, title, object_id, executor_id, prepared_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(etp_id) DO UPDATE SET
            title = excluded.title,
            object_id = excluded.object_id,
            executor_id = COALESCE(excluded.executor_id, tenders.executor_id),
            prepared_at = excluded.prepared_at,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(payload.tender_id.trim())
    .bind(payload.title.trim())
    .bind(object.entity.id)
    .bind(executor_id)
    .bind(&prepared_at)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let kinds = KindPlan::from_payload(payload);
    let mut lot_ids = BTreeMap::new();
    let mut has_new_pending_items = false;

    for (lot_key, lot) in sorted(&payload.lots) {
        let scope = LotScope {
            lot_title: &lot.title,
            matching,
            kinds: &kinds,
            now,
        };
        let lot_outcome = import_lot(&mut *conn, tender_id, lot_key.trim(), lot, &scope)
            .await
            .with_context(|| format!("lot '{}'", lot_key))?;

        lot_ids.insert(lot_key.trim().to_string(), lot_outcome.lot_id);
        has_new_pending_items |= lot_outcome.has_new_pending;
        stats.merge(&lot_outcome.stats);
    }

    sqlx::query(
        r#"
        INSERT INTO tender_documents (tender_id, raw, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(tender_id) DO UPDATE SET
            raw = excluded.raw,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tender_id)
    .bind(raw)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| "raw document")?;

    Ok(ImportOutcome {
        tender_id,
        lot_ids,
        has_new_pending_items,
        stats,
    })
}

async fn import_lot(
    conn: &mut SqliteConnection,
    tender_id: i64,
    lot_key: &str,
    lot: &LotPayload,
    scope: &LotScope<'_>,
) -> Result<LotOutcome> {
    let lot_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO lots (tender_id, lot_key, title, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(tender_id, lot_key) DO UPDATE SET
            title = excluded.title,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(tender_id)
    .bind(lot_key)
    .bind(lot.title.trim())
    .bind(scope.now)
    .bind(scope.now)
    .fetch_one(&mut *conn)
    .await?;

    let mut outcome = LotOutcome {
        lot_id,
        stats: ImportStats {
            lots: 1,
            ..Default::default()
        },
        ..Default::default()
    };

    if let Some(baseline) = &lot.baseline {
        let pending = import_proposal(
            &mut *conn,
            lot_id,
            BASELINE_PROPOSAL_KEY,
            ContractorParams::initiator(),
            baseline,
            true,
            scope,
            &mut outcome.stats,
        )
        .await
        .with_context(|| "baseline")?;
        outcome.has_new_pending |= pending;
    }

    for (proposal_key, proposal) in sorted(&lot.proposals) {
        let contractor = proposal_contractor(proposal)?;
        let pending = import_proposal(
            &mut *conn,
            lot_id,
            proposal_key.trim(),
            contractor,
            proposal,
            false,
            scope,
            &mut outcome.stats,
        )
        .await
        .with_context(|| format!("proposal '{}'", proposal_key))?;
        outcome.has_new_pending |= pending;
    }

    debug!(
        target: TARGET_IMPORT,
        lot = lot_key,
        lot_id,
        pending = outcome.has_new_pending,
        "lot imported"
    );
    Ok(outcome)
}

/// Write one proposal and its children. Returns whether any item was left
/// pending a match.
#[allow(clippy::too_many_arguments)]
async fn import_proposal(
    conn: &mut SqliteConnection,
    lot_id: i64,
    proposal_key: &str,
    contractor: ContractorParams,
    proposal: &ProposalPayload,
    is_baseline: bool,
    scope: &LotScope<'_>,
    stats: &mut ImportStats,
) -> Result<bool> {
    let contractor = get_or_create_or_update(&ContractorResolver, &mut *conn, &contractor)
        .await
        .with_context(|| format!("contractor '{}'", contractor.inn))?;
    stats.entities.record(contractor.outcome);

    let proposal_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO proposals (lot_id, contractor_id, proposal_key, is_baseline, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(lot_id, contractor_id) DO UPDATE SET
            proposal_key = excluded.proposal_key,
            is_baseline = excluded.is_baseline,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(lot_id)
    .bind(contractor.entity.id)
    .bind(proposal_key)
    .bind(is_baseline)
    .bind(scope.now)
    .bind(scope.now)
    .fetch_one(&mut *conn)
    .await?;
    stats.proposals += 1;

    if !is_baseline {
        stats.additional_info +=
            replace_additional_info(&mut *conn, proposal_id, &proposal.additional_info).await?;
    }

    let mut pending = false;
    for (position_key, item) in sorted(&proposal.items) {
        pending |= import_position(&mut *conn, proposal_id, position_key.trim(), item, scope, stats)
            .await
            .with_context(|| format!("position '{}'", position_key))?;
    }

    for (summary_key, line) in sorted(&proposal.summary) {
        upsert_summary_line(&mut *conn, proposal_id, summary_key.trim(), line, scope.now)
            .await
            .with_context(|| format!("summary '{}'", summary_key))?;
        stats.summary_lines += 1;
    }

    Ok(pending)
}

async fn replace_additional_info(
    conn: &mut SqliteConnection,
    proposal_id: i64,
    info: &HashMap<String, serde_json::Value>,
) -> Result<usize> {
    sqlx::query("DELETE FROM proposal_additional_info WHERE proposal_id = ?")
        .bind(proposal_id)
        .execute(&mut *conn)
        .await?;

    for (key, value) in sorted(info) {
        sqlx::query(
            "INSERT INTO proposal_additional_info (proposal_id, info_key, info_value) VALUES (?, ?, ?)",
        )
        .bind(proposal_id)
        .bind(key.trim())
        .bind(info_value_text(value))
        .execute(&mut *conn)
        .await
        .with_context(|| format!("additional info '{}'", key))?;
    }

    Ok(info.len())
}

/// Catalog binding decided for one item.
#[derive(Debug, Default)]
struct Binding {
    job_title_hash: Option<String>,
    catalog_position_id: Option<i64>,
    draft_catalog_position_id: Option<i64>,
}

/// Upsert one position item. Returns true when it was left as a draft.
async fn import_position(
    conn: &mut SqliteConnection,
    proposal_id: i64,
    position_key: &str,
    item: &PositionPayload,
    scope: &LotScope<'_>,
    stats: &mut ImportStats,
) -> Result<bool> {
    let unit = normalize_unit(item.unit.as_deref());
    let unit_id = match &unit {
        Some(unit) => {
            let unit = get_or_create_or_update(&UnitResolver, &mut *conn, unit)
                .await
                .with_context(|| format!("unit '{}'", unit))?;
            stats.entities.record(unit.outcome);
            Some(unit.entity.id)
        }
        None => None,
    };

    let kind = classify_kind(item.is_chapter, &item.job_title, scope.lot_title);
    let binding = match standard_job_title(&item.job_title, item.job_title_normalized.as_deref()) {
        None => {
            stats.unbound_items += 1;
            Binding::default()
        }
        Some(title) => {
            let catalog_kind = scope.kinds.kind_for(&title, unit.as_deref(), kind);
            bind_catalog(&mut *conn, title, unit_id, catalog_kind, scope, stats).await?
        }
    };
    let pending = binding.draft_catalog_position_id.is_some();

    let result = sqlx::query(
        r#"
        INSERT INTO position_items (
            proposal_id, position_key, parent_key, number, job_title, comment, unit_id,
            quantity, unit_price, total_cost, is_chapter, item_kind, job_title_hash,
            catalog_position_id, draft_catalog_position_id, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(proposal_id, position_key) DO UPDATE SET
            parent_key = excluded.parent_key,
            number = excluded.number,
            job_title = excluded.job_title,
            comment = excluded.comment,
            unit_id = excluded.unit_id,
            quantity = excluded.quantity,
            unit_price = excluded.unit_price,
            total_cost = excluded.total_cost,
            is_chapter = excluded.is_chapter,
            item_kind = excluded.item_kind,
            job_title_hash = excluded.job_title_hash,
            catalog_position_id = excluded.catalog_position_id,
            draft_catalog_position_id = excluded.draft_catalog_position_id,
            updated_at = excluded.updated_at
        WHERE position_items.parent_key IS NOT excluded.parent_key
           OR position_items.number IS NOT excluded.number
           OR position_items.job_title IS NOT excluded.job_title
           OR position_items.comment IS NOT excluded.comment
           OR position_items.unit_id IS NOT excluded.unit_id
           OR position_items.quantity IS NOT excluded.quantity
           OR position_items.unit_price IS NOT excluded.unit_price
           OR position_items.total_cost IS NOT excluded.total_cost
           OR position_items.is_chapter IS NOT excluded.is_chapter
           OR position_items.item_kind IS NOT excluded.item_kind
           OR position_items.job_title_hash IS NOT excluded.job_title_hash
           OR position_items.catalog_position_id IS NOT excluded.catalog_position_id
           OR position_items.draft_catalog_position_id IS NOT excluded.draft_catalog_position_id
        "#,
    )
    .bind(proposal_id)
    .bind(position_key)
    .bind(optional(item.parent_key.as_deref()))
    .bind(optional(item.number.as_deref()))
    .bind(item.job_title.trim())
    .bind(optional(item.comment.as_deref()))
    .bind(unit_id)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.total_cost)
    .bind(item.is_chapter)
    .bind(kind.as_str())
    .bind(&binding.job_title_hash)
    .bind(binding.catalog_position_id)
    .bind(binding.draft_catalog_position_id)
    .bind(scope.now)
    .execute(&mut *conn)
    .await?;

    stats.position_items += 1;
    if result.rows_affected() == 0 {
        stats.position_items_unchanged += 1;
    }
    Ok(pending)
}

/// Decide the catalog binding for an item with a usable title.
///
/// Positions consult the matching cache before the catalog, so a cached
/// title never produces a draft catalog row.
async fn bind_catalog(
    conn: &mut SqliteConnection,
    standard_job_title: String,
    unit_id: Option<i64>,
    kind: CatalogKind,
    scope: &LotScope<'_>,
    stats: &mut ImportStats,
) -> Result<Binding> {
    let hash = job_title_hash(&standard_job_title);

    if kind == CatalogKind::Position {
        if let Some(canonical) =
            lookup_cached(&mut *conn, &hash, scope.matching.norm_version, scope.now).await?
        {
            stats.cache_hits += 1;
            return Ok(Binding {
                job_title_hash: Some(hash),
                catalog_position_id: Some(canonical),
                draft_catalog_position_id: None,
            });
        }
    }

    let params = CatalogParams {
        standard_job_title,
        unit_id,
        kind,
    };
    let catalog = get_or_create_or_update(&CatalogResolver, &mut *conn, &params)
        .await
        .with_context(|| format!("catalog position '{}'", params.standard_job_title))?;
    stats.catalog.record(catalog.outcome);

    let draft = if kind == CatalogKind::Position {
        stats.pending_items += 1;
        Some(catalog.entity.id)
    } else {
        None
    };

    Ok(Binding {
        job_title_hash: Some(hash),
        catalog_position_id: Some(catalog.entity.id),
        draft_catalog_position_id: draft,
    })
}

async fn upsert_summary_line(
    conn: &mut SqliteConnection,
    proposal_id: i64,
    summary_key: &str,
    line: &SummaryPayload,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO summary_lines (proposal_id, summary_key, job_title, total_cost, vat, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(proposal_id, summary_key) DO UPDATE SET
            job_title = excluded.job_title,
            total_cost = excluded.total_cost,
            vat = excluded.vat,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(proposal_id)
    .bind(summary_key)
    .bind(line.job_title.trim())
    .bind(line.total_cost)
    .bind(line.vat)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

//! Local duplicate scan over the active catalog.
//!
//! Titles are compared pairwise with Jaro-Winkler similarity, only within
//! the same unit of measure. Every pair at or above the threshold is
//! recorded as a merge suggestion with the lower id as `main`.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::SqlitePool;
use strsim::jaro_winkler;
use tracing::info;

use crate::catalog::{get_all_active_catalog_items, suggest_merge, MAX_BATCH_LIMIT, TARGET_CATALOG};
use crate::error::{Error, Result};
use crate::models::{CatalogItem, SuggestedMerge};
use crate::normalize::normalize_title;

pub const DEFAULT_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy)]
pub struct DuplicateScan {
    threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub suggested: usize,
}

impl Default for DuplicateScan {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl DuplicateScan {
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::validation(format!(
                "threshold must be within (0, 1], got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn similarity(a: &CatalogItem, b: &CatalogItem) -> f64 {
        jaro_winkler(
            &normalize_title(&a.standard_job_title),
            &normalize_title(&b.standard_job_title),
        )
    }

    /// Candidate pairs among `items`, best score first.
    pub fn find(&self, items: &[CatalogItem]) -> Vec<SuggestedMerge> {
        let mut by_unit: BTreeMap<Option<&str>, Vec<&CatalogItem>> = BTreeMap::new();
        for item in items {
            by_unit.entry(item.unit.as_deref()).or_default().push(item);
        }

        let mut merges = Vec::new();
        for group in by_unit.values() {
            for i in 0..group.len() {
                for j in (i + 1)..group.len() {
                    let (a, b) = (group[i], group[j]);
                    if a.id == b.id {
                        continue;
                    }
                    let score = Self::similarity(a, b);
                    if score >= self.threshold {
                        merges.push(SuggestedMerge {
                            main_id: a.id.min(b.id),
                            duplicate_id: a.id.max(b.id),
                            score: score.min(1.0),
                        });
                    }
                }
            }
        }

        merges.sort_by(|x, y| {
            y.score
                .total_cmp(&x.score)
                .then(x.main_id.cmp(&y.main_id))
                .then(x.duplicate_id.cmp(&y.duplicate_id))
        });
        merges
    }

    /// Page through every active catalog item and record suggestions.
    pub async fn run(&self, pool: &SqlitePool) -> Result<ScanReport> {
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let page = get_all_active_catalog_items(pool, MAX_BATCH_LIMIT, offset).await?;
            let fetched = page.len() as i64;
            items.extend(page);
            if fetched < MAX_BATCH_LIMIT {
                break;
            }
            offset += fetched;
        }

        let mut report = ScanReport {
            scanned: items.len(),
            ..Default::default()
        };
        for merge in self.find(&items) {
            if suggest_merge(pool, &merge).await? {
                report.suggested += 1;
            }
        }

        info!(
            target: TARGET_CATALOG,
            scanned = report.scanned,
            suggested = report.suggested,
            threshold = self.threshold,
            "duplicate scan finished"
        );
        Ok(report)
    }
}

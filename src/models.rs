//! Persisted entity types.
//!
//! These mirror the rows written by the import orchestrator and read back
//! by the matching and catalog services.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Fixed INN of the sentinel contractor that owns baseline proposals.
pub const INITIATOR_INN: &str = "0000000000";
pub const INITIATOR_TITLE: &str = "Initiator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub id: i64,
    pub title: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorRecord {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractorRecord {
    pub id: i64,
    pub inn: String,
    pub title: String,
    pub address: Option<String>,
    pub accreditation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub id: i64,
    pub normalized_name: String,
}

/// Structural role of a catalog position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogKind {
    Position,
    Header,
    LotHeader,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Position => "POSITION",
            CatalogKind::Header => "HEADER",
            CatalogKind::LotHeader => "LOT_HEADER",
        }
    }

    /// Status a freshly created row of this kind starts in.
    pub fn initial_status(&self) -> CatalogStatus {
        match self {
            CatalogKind::Position => CatalogStatus::PendingIndexing,
            CatalogKind::Header | CatalogKind::LotHeader => CatalogStatus::NotApplicable,
        }
    }

    pub fn is_header(&self) -> bool {
        !matches!(self, CatalogKind::Position)
    }

    /// Kind kept when one catalog key plays several roles in a document.
    pub fn dominant(self, other: CatalogKind) -> CatalogKind {
        fn rank(kind: CatalogKind) -> u8 {
            match kind {
                CatalogKind::Position => 0,
                CatalogKind::Header => 1,
                CatalogKind::LotHeader => 2,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POSITION" => Ok(CatalogKind::Position),
            "HEADER" => Ok(CatalogKind::Header),
            "LOT_HEADER" => Ok(CatalogKind::LotHeader),
            other => Err(format!("unknown catalog kind: {}", other)),
        }
    }
}

/// Indexing lifecycle of a catalog position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CatalogStatus {
    #[serde(rename = "pending_indexing")]
    PendingIndexing,
    #[serde(rename = "na")]
    NotApplicable,
    #[serde(rename = "active")]
    Active,
}

impl CatalogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogStatus::PendingIndexing => "pending_indexing",
            CatalogStatus::NotApplicable => "na",
            CatalogStatus::Active => "active",
        }
    }
}

impl fmt::Display for CatalogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_indexing" => Ok(CatalogStatus::PendingIndexing),
            "na" => Ok(CatalogStatus::NotApplicable),
            "active" => Ok(CatalogStatus::Active),
            other => Err(format!("unknown catalog status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPosition {
    pub id: i64,
    pub standard_job_title: String,
    pub unit_id: Option<i64>,
    pub kind: CatalogKind,
    pub status: CatalogStatus,
}

/// Catalog row as served to the external indexer / duplicate scanner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: i64,
    pub standard_job_title: String,
    pub unit: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedMerge {
    pub main_id: i64,
    pub duplicate_id: i64,
    pub score: f64,
}

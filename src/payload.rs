//! Parsed tender document.
//!
//! The document parser upstream produces one JSON object per tender:
//!
//! ```json
//! {
//!   "tender_id": "ETP-2024-0117",
//!   "title": "Капитальный ремонт кровли",
//!   "object": { "title": "Школа №5", "address": "ул. Ленина, 1" },
//!   "executor": { "name": "Иванов И.И.", "phone": "+7 900 000-00-00" },
//!   "prepared_date": "15.03.2024 10:30:00",
//!   "lots": {
//!     "LOT-1": {
//!       "title": "Лот №1",
//!       "baseline": { "items": { ... }, "summary": { ... } },
//!       "proposals": {
//!         "7701234567": {
//!           "contractor": { "inn": "7701234567", "title": "ООО Ромашка" },
//!           "additional_info": { "Срок выполнения": "90 дней" },
//!           "items": {
//!             "1": { "job_title": "Раздел 1. Кровля", "is_chapter": true },
//!             "1.1": { "job_title": "Демонтаж покрытия", "parent_key": "1",
//!                      "unit": "м2", "quantity": 120.0, "unit_price": 350.0 }
//!           },
//!           "summary": { "total": { "job_title": "Итого", "total_cost": 42000.0 } }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Lot, proposal, item and summary collections are maps keyed by the
//! document's own identifiers; nothing downstream depends on their order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderPayload {
    /// External (ETP) tender id, the tender's natural key.
    pub tender_id: String,
    #[serde(default)]
    pub title: String,
    pub object: ObjectPayload,
    #[serde(default)]
    pub executor: Option<ExecutorPayload>,
    #[serde(default)]
    pub prepared_date: Option<String>,
    #[serde(default)]
    pub lots: HashMap<String, LotPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub title: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorPayload {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotPayload {
    pub title: String,
    /// The organizer's reference estimate.
    #[serde(default)]
    pub baseline: Option<ProposalPayload>,
    #[serde(default)]
    pub proposals: HashMap<String, ProposalPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalPayload {
    /// Required for contractor proposals, ignored for the baseline.
    #[serde(default)]
    pub contractor: Option<ContractorPayload>,
    #[serde(default)]
    pub additional_info: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub items: HashMap<String, PositionPayload>,
    #[serde(default)]
    pub summary: HashMap<String, SummaryPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractorPayload {
    pub inn: String,
    pub title: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub accreditation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionPayload {
    #[serde(default)]
    pub job_title: String,
    /// Lemmatized title supplied by the document parser, when it has one.
    #[serde(default)]
    pub job_title_normalized: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub is_chapter: bool,
    /// Key of the enclosing chapter item in the same proposal.
    #[serde(default)]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub vat: Option<f64>,
}

impl TenderPayload {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Trimmed value of a required string field.
pub(crate) fn required<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed)
}

/// Trimmed optional string; blank counts as absent.
pub(crate) fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Text stored for an additional-info value.
pub(crate) fn info_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

//! Title normalization, kind classification and matching-key hashing.
//!
//! Pure functions shared by the import orchestrator (which classifies and
//! hashes incoming items) and the matching service (which renders context
//! strings for the external classifier).

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::import::TARGET_IMPORT;
use crate::models::CatalogKind;

/// Format of `prepared_date` in tender documents.
pub const PREPARED_DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Lower-case and collapse every run of whitespace to a single space.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized unit name, or `None` when the item has no unit.
pub fn normalize_unit(unit: Option<&str>) -> Option<String> {
    unit.map(normalize_title).filter(|u| !u.is_empty())
}

/// Structural role of an item inside its lot.
pub fn classify_kind(is_chapter: bool, title: &str, lot_title: &str) -> CatalogKind {
    if is_chapter {
        CatalogKind::Header
    } else if normalize_title(title) == normalize_title(lot_title) {
        CatalogKind::LotHeader
    } else {
        CatalogKind::Position
    }
}

/// Catalog title for an item: the parser-supplied lemmatized title when
/// present, otherwise a plain normalization of the raw title. `None` when
/// both are blank.
pub fn standard_job_title(raw_title: &str, lemmatized: Option<&str>) -> Option<String> {
    let title = resolve_standard_title(raw_title, lemmatized)?;
    if lemmatized.map_or(true, |l| l.trim().is_empty()) {
        warn!(
            target: TARGET_IMPORT,
            title = raw_title,
            "no lemmatized title supplied, falling back to plain normalization"
        );
    }
    Some(title)
}

/// [`standard_job_title`] without the fallback warning.
pub(crate) fn resolve_standard_title(raw_title: &str, lemmatized: Option<&str>) -> Option<String> {
    if let Some(lemma) = lemmatized.map(str::trim).filter(|l| !l.is_empty()) {
        return Some(lemma.to_string());
    }
    Some(normalize_title(raw_title)).filter(|t| !t.is_empty())
}

/// Matching-cache key for a standardized job title (hex SHA-256).
pub fn job_title_hash(standard_job_title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(standard_job_title.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse `DD.MM.YYYY HH:MM:SS`. Blank or malformed input yields `None`.
pub fn parse_prepared_date(value: Option<&str>) -> Option<NaiveDateTime> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    match NaiveDateTime::parse_from_str(value, PREPARED_DATE_FORMAT) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(target: TARGET_IMPORT, value, %err, "ignoring unparsable prepared date");
            None
        }
    }
}

/// Context string handed to the classifier: the chain of enclosing section
/// titles (outermost first) followed by the item's own title.
pub fn rich_context(breadcrumbs: &[String], title: &str) -> String {
    let path = breadcrumbs
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>();

    if path.is_empty() {
        format!("Позиция: {}", title.trim())
    } else {
        format!("Раздел: {} | Позиция: {}", path.join(" > "), title.trim())
    }
}

/// Description served to the catalog indexer.
pub fn catalog_description(standard_job_title: &str, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("Работа: {} | Ед. изм.: {}", standard_job_title, unit),
        None => format!("Работа: {}", standard_job_title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize_title("  Устройство\tБЕТОННОЙ   подготовки \n"),
            "устройство бетонной подготовки"
        );
        assert_eq!(normalize_title("   "), "");
    }

    #[test]
    fn lot_title_item_is_lot_header() {
        assert_eq!(
            classify_kind(false, "лот №1", "Лот №1"),
            CatalogKind::LotHeader
        );
        assert_eq!(
            classify_kind(false, "  ЛОТ   №1 ", "Лот №1"),
            CatalogKind::LotHeader
        );
    }

    #[test]
    fn chapter_is_header() {
        assert_eq!(
            classify_kind(true, "Раздел 2. Фасад", "Лот №1"),
            CatalogKind::Header
        );
    }

    #[test]
    fn ordinary_line_is_position() {
        assert_eq!(
            classify_kind(false, "Окраска стен", "Лот №1"),
            CatalogKind::Position
        );
    }

    #[test]
    fn standard_title_prefers_lemmatized() {
        assert_eq!(
            standard_job_title("Окраска СТЕН", Some(" окраска стена ")).as_deref(),
            Some("окраска стена")
        );
        assert_eq!(
            standard_job_title("Окраска   СТЕН", Some("  ")).as_deref(),
            Some("окраска стен")
        );
        assert_eq!(standard_job_title("   ", None), None);
    }

    #[test]
    fn hash_is_stable_hex_sha256() {
        assert_eq!(
            job_title_hash("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn prepared_date_uses_fixed_format() {
        let parsed = parse_prepared_date(Some("15.03.2024 10:30:00")).unwrap();
        assert_eq!(parsed.to_string(), "2024-03-15 10:30:00");
        assert_eq!(parse_prepared_date(Some("2024-03-15")), None);
        assert_eq!(parse_prepared_date(Some("")), None);
        assert_eq!(parse_prepared_date(None), None);
    }

    #[test]
    fn context_with_and_without_breadcrumbs() {
        assert_eq!(rich_context(&[], "Окраска стен"), "Позиция: Окраска стен");
        assert_eq!(
            rich_context(
                &["Лот №1".to_string(), "Раздел 2. Отделка".to_string()],
                "Окраска стен"
            ),
            "Раздел: Лот №1 > Раздел 2. Отделка | Позиция: Окраска стен"
        );
    }
}

//! Natural-key resolvers for the import transaction.
//!
//! Each resolver implements [`Reconcile`] over a `SqliteConnection` and is
//! driven by [`get_or_create_or_update`](crate::reconcile::get_or_create_or_update).
//! Parameters are validated when they are built, so a blank required field
//! fails before any statement runs.
//!
//! Absent optional fields (addresses, phones, accreditation) never clear a
//! stored value: they only ever fill in or replace.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::error::{Error, Result};
use crate::models::{
    CatalogKind, CatalogPosition, CatalogStatus, ContractorRecord, ExecutorRecord, ObjectRecord,
    UnitRecord, INITIATOR_INN, INITIATOR_TITLE,
};
use crate::payload::{optional, required, ContractorPayload, ExecutorPayload, ObjectPayload};
use crate::reconcile::Reconcile;

/// Replacement for an optional stored field: `Some` only when the incoming
/// value is present and differs.
fn fill(stored: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match incoming {
        Some(value) if stored.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}

fn decode_err(message: String) -> Error {
    Error::Database(sqlx::Error::Decode(message.into()))
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ObjectParams {
    pub title: String,
    pub address: Option<String>,
}

impl ObjectParams {
    pub fn from_payload(object: &ObjectPayload) -> Result<Self> {
        Ok(Self {
            title: required("object title", &object.title)?.to_string(),
            address: optional(object.address.as_deref()),
        })
    }
}

pub struct ObjectResolver;

fn object_from_row(row: &SqliteRow) -> ObjectRecord {
    ObjectRecord {
        id: row.get("id"),
        title: row.get("title"),
        address: row.get("address"),
    }
}

#[async_trait]
impl Reconcile<SqliteConnection> for ObjectResolver {
    type Params = ObjectParams;
    type Entity = ObjectRecord;
    type Patch = String;

    fn entity(&self) -> &'static str {
        "object"
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        params: &ObjectParams,
    ) -> Result<Option<ObjectRecord>> {
        let row = sqlx::query("SELECT id, title, address FROM objects WHERE title = ?")
            .bind(&params.title)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(object_from_row))
    }

    async fn create(
        &self,
        conn: &mut SqliteConnection,
        params: &ObjectParams,
    ) -> Result<ObjectRecord> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO objects (title, address, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(title) DO NOTHING
            RETURNING id, title, address
            "#,
        )
        .bind(&params.title)
        .bind(&params.address)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref()
            .map(object_from_row)
            .ok_or_else(|| Error::conflict("object", &params.title))
    }

    fn diff(&self, existing: &ObjectRecord, params: &ObjectParams) -> Option<String> {
        fill(&existing.address, &params.address)
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        existing: ObjectRecord,
        address: String,
    ) -> Result<ObjectRecord> {
        sqlx::query("UPDATE objects SET address = ?, updated_at = ? WHERE id = ?")
            .bind(&address)
            .bind(Utc::now().timestamp())
            .bind(existing.id)
            .execute(&mut *conn)
            .await?;

        Ok(ObjectRecord {
            address: Some(address),
            ..existing
        })
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorParams {
    pub name: String,
    pub phone: Option<String>,
}

impl ExecutorParams {
    pub fn from_payload(executor: &ExecutorPayload) -> Result<Self> {
        Ok(Self {
            name: required("executor name", &executor.name)?.to_string(),
            phone: optional(executor.phone.as_deref()),
        })
    }
}

pub struct ExecutorResolver;

fn executor_from_row(row: &SqliteRow) -> ExecutorRecord {
    ExecutorRecord {
        id: row.get("id"),
        name: row.get("name"),
        phone: row.get("phone"),
    }
}

#[async_trait]
impl Reconcile<SqliteConnection> for ExecutorResolver {
    type Params = ExecutorParams;
    type Entity = ExecutorRecord;
    type Patch = String;

    fn entity(&self) -> &'static str {
        "executor"
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        params: &ExecutorParams,
    ) -> Result<Option<ExecutorRecord>> {
        let row = sqlx::query("SELECT id, name, phone FROM executors WHERE name = ?")
            .bind(&params.name)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(executor_from_row))
    }

    async fn create(
        &self,
        conn: &mut SqliteConnection,
        params: &ExecutorParams,
    ) -> Result<ExecutorRecord> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO executors (name, phone, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            RETURNING id, name, phone
            "#,
        )
        .bind(&params.name)
        .bind(&params.phone)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref()
            .map(executor_from_row)
            .ok_or_else(|| Error::conflict("executor", &params.name))
    }

    fn diff(&self, existing: &ExecutorRecord, params: &ExecutorParams) -> Option<String> {
        fill(&existing.phone, &params.phone)
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        existing: ExecutorRecord,
        phone: String,
    ) -> Result<ExecutorRecord> {
        sqlx::query("UPDATE executors SET phone = ?, updated_at = ? WHERE id = ?")
            .bind(&phone)
            .bind(Utc::now().timestamp())
            .bind(existing.id)
            .execute(&mut *conn)
            .await?;

        Ok(ExecutorRecord {
            phone: Some(phone),
            ..existing
        })
    }
}

// ---------------------------------------------------------------------------
// Contractors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContractorParams {
    pub inn: String,
    pub title: String,
    pub address: Option<String>,
    pub accreditation: Option<String>,
}

impl ContractorParams {
    pub fn from_payload(contractor: &ContractorPayload) -> Result<Self> {
        Ok(Self {
            inn: required("contractor inn", &contractor.inn)?.to_string(),
            title: required("contractor title", &contractor.title)?.to_string(),
            address: optional(contractor.address.as_deref()),
            accreditation: optional(contractor.accreditation.as_deref()),
        })
    }

    /// The sentinel contractor that owns every baseline proposal.
    pub fn initiator() -> Self {
        Self {
            inn: INITIATOR_INN.to_string(),
            title: INITIATOR_TITLE.to_string(),
            address: None,
            accreditation: None,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ContractorPatch {
    pub title: Option<String>,
    pub address: Option<String>,
    pub accreditation: Option<String>,
}

pub struct ContractorResolver;

fn contractor_from_row(row: &SqliteRow) -> ContractorRecord {
    ContractorRecord {
        id: row.get("id"),
        inn: row.get("inn"),
        title: row.get("title"),
        address: row.get("address"),
        accreditation: row.get("accreditation"),
    }
}

#[async_trait]
impl Reconcile<SqliteConnection> for ContractorResolver {
    type Params = ContractorParams;
    type Entity = ContractorRecord;
    type Patch = ContractorPatch;

    fn entity(&self) -> &'static str {
        "contractor"
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        params: &ContractorParams,
    ) -> Result<Option<ContractorRecord>> {
        let row = sqlx::query(
            "SELECT id, inn, title, address, accreditation FROM contractors WHERE inn = ?",
        )
        .bind(&params.inn)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.as_ref().map(contractor_from_row))
    }

    async fn create(
        &self,
        conn: &mut SqliteConnection,
        params: &ContractorParams,
    ) -> Result<ContractorRecord> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO contractors (inn, title, address, accreditation, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(inn) DO NOTHING
            RETURNING id, inn, title, address, accreditation
            "#,
        )
        .bind(&params.inn)
        .bind(&params.title)
        .bind(&params.address)
        .bind(&params.accreditation)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref()
            .map(contractor_from_row)
            .ok_or_else(|| Error::conflict("contractor", &params.inn))
    }

    fn diff(&self, existing: &ContractorRecord, params: &ContractorParams) -> Option<ContractorPatch> {
        let patch = ContractorPatch {
            title: (existing.title != params.title).then(|| params.title.clone()),
            address: fill(&existing.address, &params.address),
            accreditation: fill(&existing.accreditation, &params.accreditation),
        };
        (patch != ContractorPatch::default()).then_some(patch)
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        existing: ContractorRecord,
        patch: ContractorPatch,
    ) -> Result<ContractorRecord> {
        let row = sqlx::query(
            r#"
            UPDATE contractors SET
                title = COALESCE(?, title),
                address = COALESCE(?, address),
                accreditation = COALESCE(?, accreditation),
                updated_at = ?
            WHERE id = ?
            RETURNING id, inn, title, address, accreditation
            "#,
        )
        .bind(&patch.title)
        .bind(&patch.address)
        .bind(&patch.accreditation)
        .bind(Utc::now().timestamp())
        .bind(existing.id)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref()
            .map(contractor_from_row)
            .ok_or_else(|| Error::not_found("contractor", &existing.inn))
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Units are get-or-create only: the normalized name is the whole row.
pub struct UnitResolver;

#[async_trait]
impl Reconcile<SqliteConnection> for UnitResolver {
    /// Normalized unit name.
    type Params = String;
    type Entity = UnitRecord;
    type Patch = ();

    fn entity(&self) -> &'static str {
        "unit"
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        name: &String,
    ) -> Result<Option<UnitRecord>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM units WHERE normalized_name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(id.map(|id| UnitRecord {
            id,
            normalized_name: name.clone(),
        }))
    }

    async fn create(&self, conn: &mut SqliteConnection, name: &String) -> Result<UnitRecord> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO units (normalized_name, created_at)
            VALUES (?, ?)
            ON CONFLICT(normalized_name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(Utc::now().timestamp())
        .fetch_optional(&mut *conn)
        .await?;

        id.map(|id| UnitRecord {
            id,
            normalized_name: name.clone(),
        })
        .ok_or_else(|| Error::conflict("unit", name))
    }

    fn diff(&self, _existing: &UnitRecord, _name: &String) -> Option<()> {
        None
    }

    async fn update(
        &self,
        _conn: &mut SqliteConnection,
        existing: UnitRecord,
        _patch: (),
    ) -> Result<UnitRecord> {
        Ok(existing)
    }
}

// ---------------------------------------------------------------------------
// Catalog positions
// ---------------------------------------------------------------------------

/// Natural key `(standard_job_title, unit_id)` plus the classified kind.
#[derive(Debug, Clone)]
pub struct CatalogParams {
    pub standard_job_title: String,
    pub unit_id: Option<i64>,
    pub kind: CatalogKind,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CatalogPatch {
    pub kind: CatalogKind,
    pub status: CatalogStatus,
}

pub struct CatalogResolver;

pub(crate) fn catalog_from_row(row: &SqliteRow) -> Result<CatalogPosition> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(CatalogPosition {
        id: row.get("id"),
        standard_job_title: row.get("standard_job_title"),
        unit_id: row.get("unit_id"),
        kind: kind.parse().map_err(decode_err)?,
        status: status.parse().map_err(decode_err)?,
    })
}

/// Status after a kind correction. Headers are never indexed; a row that
/// becomes a position leaves `na` for the indexing queue but keeps any
/// status it already earned.
fn corrected_status(current: CatalogStatus, kind: CatalogKind) -> CatalogStatus {
    if kind.is_header() {
        CatalogStatus::NotApplicable
    } else if current == CatalogStatus::NotApplicable {
        CatalogStatus::PendingIndexing
    } else {
        current
    }
}

#[async_trait]
impl Reconcile<SqliteConnection> for CatalogResolver {
    type Params = CatalogParams;
    type Entity = CatalogPosition;
    type Patch = CatalogPatch;

    fn entity(&self) -> &'static str {
        "catalog position"
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        params: &CatalogParams,
    ) -> Result<Option<CatalogPosition>> {
        let row = sqlx::query(
            r#"
            SELECT id, standard_job_title, unit_id, kind, status
            FROM catalog_positions
            WHERE standard_job_title = ? AND IFNULL(unit_id, 0) = IFNULL(?, 0)
            "#,
        )
        .bind(&params.standard_job_title)
        .bind(params.unit_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(catalog_from_row).transpose()
    }

    async fn create(
        &self,
        conn: &mut SqliteConnection,
        params: &CatalogParams,
    ) -> Result<CatalogPosition> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO catalog_positions (standard_job_title, unit_id, kind, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            RETURNING id, standard_job_title, unit_id, kind, status
            "#,
        )
        .bind(&params.standard_job_title)
        .bind(params.unit_id)
        .bind(params.kind.as_str())
        .bind(params.kind.initial_status().as_str())
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => catalog_from_row(&row),
            None => Err(Error::conflict(
                "catalog position",
                &params.standard_job_title,
            )),
        }
    }

    fn diff(&self, existing: &CatalogPosition, params: &CatalogParams) -> Option<CatalogPatch> {
        (existing.kind != params.kind).then(|| CatalogPatch {
            kind: params.kind,
            status: corrected_status(existing.status, params.kind),
        })
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        existing: CatalogPosition,
        patch: CatalogPatch,
    ) -> Result<CatalogPosition> {
        sqlx::query("UPDATE catalog_positions SET kind = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(patch.kind.as_str())
            .bind(patch.status.as_str())
            .bind(Utc::now().timestamp())
            .bind(existing.id)
            .execute(&mut *conn)
            .await?;

        Ok(CatalogPosition {
            kind: patch.kind,
            status: patch.status,
            ..existing
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::reconcile::{get_or_create_or_update, Outcome};
    use crate::{db, migrate};
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("resolvers.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool)
    }

    fn contractor(inn: &str, title: &str, address: Option<&str>) -> ContractorParams {
        ContractorParams {
            inn: inn.to_string(),
            title: title.to_string(),
            address: address.map(str::to_string),
            accreditation: None,
        }
    }

    #[tokio::test]
    async fn contractor_keeps_id_across_title_change() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = get_or_create_or_update(
            &ContractorResolver,
            &mut *conn,
            &contractor("7701234567", "ООО Ромашка", Some("Москва")),
        )
        .await
        .unwrap();
        let renamed = get_or_create_or_update(
            &ContractorResolver,
            &mut *conn,
            &contractor("7701234567", "ООО Ромашка-Строй", None),
        )
        .await
        .unwrap();
        let again = get_or_create_or_update(
            &ContractorResolver,
            &mut *conn,
            &contractor("7701234567", "ООО Ромашка-Строй", None),
        )
        .await
        .unwrap();

        assert_eq!(first.outcome, Outcome::Created);
        assert_eq!(renamed.outcome, Outcome::Updated);
        assert_eq!(again.outcome, Outcome::Unchanged);
        assert_eq!(renamed.entity.id, first.entity.id);
        assert_eq!(renamed.entity.title, "ООО Ромашка-Строй");
        // An absent address does not erase the stored one.
        assert_eq!(renamed.entity.address.as_deref(), Some("Москва"));
    }

    #[tokio::test]
    async fn blank_inn_fails_validation() {
        let payload = ContractorPayload {
            inn: "  ".to_string(),
            title: "ООО Ромашка".to_string(),
            address: None,
            accreditation: None,
        };
        let err = ContractorParams::from_payload(&payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn object_address_fills_in_but_never_clears() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let bare = ObjectParams {
            title: "Школа №5".to_string(),
            address: None,
        };
        let with_address = ObjectParams {
            address: Some("ул. Ленина, 1".to_string()),
            ..bare.clone()
        };

        get_or_create_or_update(&ObjectResolver, &mut *conn, &bare)
            .await
            .unwrap();
        let filled = get_or_create_or_update(&ObjectResolver, &mut *conn, &with_address)
            .await
            .unwrap();
        let kept = get_or_create_or_update(&ObjectResolver, &mut *conn, &bare)
            .await
            .unwrap();

        assert_eq!(filled.outcome, Outcome::Updated);
        assert_eq!(kept.outcome, Outcome::Unchanged);
        assert_eq!(kept.entity.address.as_deref(), Some("ул. Ленина, 1"));
    }

    #[tokio::test]
    async fn catalog_key_treats_missing_unit_as_one_value() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let params = CatalogParams {
            standard_job_title: "окраска стена".to_string(),
            unit_id: None,
            kind: CatalogKind::Position,
        };

        let first = get_or_create_or_update(&CatalogResolver, &mut *conn, &params)
            .await
            .unwrap();
        let second = get_or_create_or_update(&CatalogResolver, &mut *conn, &params)
            .await
            .unwrap();

        assert_eq!(first.entity.id, second.entity.id);
        assert_eq!(first.entity.status, CatalogStatus::PendingIndexing);
        assert_eq!(second.outcome, Outcome::Unchanged);
    }

    #[tokio::test]
    async fn catalog_kind_correction_adjusts_status() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let as_position = CatalogParams {
            standard_job_title: "кровля".to_string(),
            unit_id: None,
            kind: CatalogKind::Position,
        };
        let as_header = CatalogParams {
            kind: CatalogKind::Header,
            ..as_position.clone()
        };

        get_or_create_or_update(&CatalogResolver, &mut *conn, &as_position)
            .await
            .unwrap();
        let header = get_or_create_or_update(&CatalogResolver, &mut *conn, &as_header)
            .await
            .unwrap();
        assert_eq!(header.outcome, Outcome::Updated);
        assert_eq!(header.entity.status, CatalogStatus::NotApplicable);

        let back = get_or_create_or_update(&CatalogResolver, &mut *conn, &as_position)
            .await
            .unwrap();
        assert_eq!(back.entity.kind, CatalogKind::Position);
        assert_eq!(back.entity.status, CatalogStatus::PendingIndexing);
    }

    #[tokio::test]
    async fn unit_is_get_or_create() {
        let (_tmp, pool) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let name = "м2".to_string();

        let first = get_or_create_or_update(&UnitResolver, &mut *conn, &name)
            .await
            .unwrap();
        let second = get_or_create_or_update(&UnitResolver, &mut *conn, &name)
            .await
            .unwrap();

        assert!(first.is_created());
        assert_eq!(second.outcome, Outcome::Unchanged);
        assert_eq!(first.entity, second.entity);
    }

    #[test]
    fn active_position_keeps_status_on_kind_change() {
        assert_eq!(
            corrected_status(CatalogStatus::Active, CatalogKind::Position),
            CatalogStatus::Active
        );
        assert_eq!(
            corrected_status(CatalogStatus::Active, CatalogKind::LotHeader),
            CatalogStatus::NotApplicable
        );
    }
}

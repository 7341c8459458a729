//! Generic get-or-create-or-update.
//!
//! Every natural-key entity the importer touches (objects, executors,
//! contractors, units, catalog positions) is resolved through
//! [`get_or_create_or_update`]: look the entity up by its natural key,
//! create it when absent, otherwise diff the stored row against the incoming
//! parameters and patch it only when something changed. Calling it twice
//! with the same parameters performs no writes the second time.
//!
//! The routine is generic over the connection type `C` so the same
//! resolvers run inside an import transaction (`SqliteConnection`) and the
//! control flow can be exercised against an in-memory table in tests.
//!
//! # Lost create races
//!
//! Two imports can both miss on the lookup and both try to create the same
//! key. Resolvers create with insert-if-absent semantics and report a lost
//! race as [`Error::Conflict`](crate::error::Error::Conflict), or the store
//! reports a unique violation. The primitive then looks the key up once
//! more and continues down the diff/update path with whatever the winner
//! wrote. A second miss after a conflict is returned as the original error.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// Natural-key semantics for one entity type.
#[async_trait]
pub trait Reconcile<C: Send>: Sync {
    /// Validated incoming values, including the natural key.
    type Params: Sync;
    /// Stored representation.
    type Entity: Send;
    /// Changes to apply to an existing entity.
    type Patch: Send;

    /// Entity name used in logs and error context.
    fn entity(&self) -> &'static str;

    async fn lookup(&self, conn: &mut C, params: &Self::Params) -> Result<Option<Self::Entity>>;

    async fn create(&self, conn: &mut C, params: &Self::Params) -> Result<Self::Entity>;

    /// `None` when the stored entity already matches `params`.
    fn diff(&self, existing: &Self::Entity, params: &Self::Params) -> Option<Self::Patch>;

    async fn update(
        &self,
        conn: &mut C,
        existing: Self::Entity,
        patch: Self::Patch,
    ) -> Result<Self::Entity>;
}

/// What a single reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled<T> {
    pub entity: T,
    pub outcome: Outcome,
}

impl<T> Reconciled<T> {
    pub fn is_created(&self) -> bool {
        self.outcome == Outcome::Created
    }
}

/// Tally of reconciliation outcomes across one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: OutcomeCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }

    /// Number of reconciliations that wrote something.
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

pub async fn get_or_create_or_update<C, R>(
    resolver: &R,
    conn: &mut C,
    params: &R::Params,
) -> Result<Reconciled<R::Entity>>
where
    C: Send,
    R: Reconcile<C> + ?Sized,
{
    if let Some(existing) = resolver.lookup(conn, params).await? {
        return apply_diff(resolver, conn, existing, params).await;
    }

    match resolver.create(conn, params).await {
        Ok(entity) => Ok(Reconciled {
            entity,
            outcome: Outcome::Created,
        }),
        Err(err) if err.is_unique_violation() => {
            debug!(entity = resolver.entity(), %err, "lost create race, looking up again");
            match resolver.lookup(conn, params).await? {
                Some(existing) => apply_diff(resolver, conn, existing, params).await,
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

async fn apply_diff<C, R>(
    resolver: &R,
    conn: &mut C,
    existing: R::Entity,
    params: &R::Params,
) -> Result<Reconciled<R::Entity>>
where
    C: Send,
    R: Reconcile<C> + ?Sized,
{
    match resolver.diff(&existing, params) {
        Some(patch) => {
            let entity = resolver.update(conn, existing, patch).await?;
            Ok(Reconciled {
                entity,
                outcome: Outcome::Updated,
            })
        }
        None => Ok(Reconciled {
            entity: existing,
            outcome: Outcome::Unchanged,
        }),
    }
}

impl From<Outcome> for OutcomeCounts {
    fn from(outcome: Outcome) -> Self {
        let mut counts = OutcomeCounts::default();
        counts.record(outcome);
        counts
    }
}

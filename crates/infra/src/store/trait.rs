use std::sync::Arc;

use thiserror::Error;

use stockledger_core::{DomainError, ExpectedVersion, UnitId};
use stockledger_inventory::{MovementDraft, MovementEntry, Unit, UnitChanges};

/// Storage operation error.
///
/// These are **infrastructure errors** (connectivity, constraints, lost races)
/// as opposed to domain errors (validation, insufficient stock).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("unit not found: {0}")]
    NotFound(UnitId),

    #[error("unit already exists: {0}")]
    AlreadyExists(UnitId),

    #[error("sku already in use: {0}")]
    DuplicateSku(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    /// Domain checks re-run inside a store's atomic section.
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Conflict(msg) => StoreError::Concurrency(msg),
            other => StoreError::Constraint(other.to_string()),
        }
    }
}

/// Persistence collaborator for the unit catalog and movement ledger.
///
/// Implementations must:
/// - order `select_units` by name ascending (ties by sku, then id)
/// - order `select_movements` newest first (sequence descending)
/// - assign strictly increasing `sequence` numbers to appended entries
/// - reject a second unit with the same SKU (`DuplicateSku`)
/// - apply each method atomically: a unit write and the entry it carries
///   are both persisted or neither is
/// - check `ExpectedVersion` against the unit's stored version inside the same
///   atomic section as the write (compare-and-swap)
pub trait InventoryStore: Send + Sync {
    /// All units, ordered by name.
    fn select_units(&self) -> Result<Vec<Unit>, StoreError>;

    /// A single unit, `None` if it does not exist.
    fn select_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError>;

    /// Insert a new unit, optionally followed by an opening adjustment entry.
    fn insert_unit(&self, unit: Unit, opening: Option<MovementDraft>) -> Result<Unit, StoreError>;

    /// Overwrite a unit's details and quantity, optionally appending the
    /// adjustment entry that explains the quantity change.
    fn update_unit(
        &self,
        id: UnitId,
        changes: UnitChanges,
        adjustment: Option<MovementDraft>,
        expected: ExpectedVersion,
    ) -> Result<Unit, StoreError>;

    /// Delete a unit and all of its entries. Returns `false` if no such unit.
    fn delete_unit(&self, id: UnitId) -> Result<bool, StoreError>;

    /// Entries of one unit, newest first.
    fn select_movements(&self, unit_id: UnitId) -> Result<Vec<MovementEntry>, StoreError>;

    /// Append an entry and set the unit's quantity to its derived balance.
    ///
    /// Fails with `Concurrency` if the unit moved past `expected` or no longer
    /// holds `draft.quantity_before`.
    fn commit_movement(
        &self,
        draft: MovementDraft,
        expected: ExpectedVersion,
    ) -> Result<(MovementEntry, Unit), StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn select_units(&self) -> Result<Vec<Unit>, StoreError> {
        (**self).select_units()
    }

    fn select_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        (**self).select_unit(id)
    }

    fn insert_unit(&self, unit: Unit, opening: Option<MovementDraft>) -> Result<Unit, StoreError> {
        (**self).insert_unit(unit, opening)
    }

    fn update_unit(
        &self,
        id: UnitId,
        changes: UnitChanges,
        adjustment: Option<MovementDraft>,
        expected: ExpectedVersion,
    ) -> Result<Unit, StoreError> {
        (**self).update_unit(id, changes, adjustment, expected)
    }

    fn delete_unit(&self, id: UnitId) -> Result<bool, StoreError> {
        (**self).delete_unit(id)
    }

    fn select_movements(&self, unit_id: UnitId) -> Result<Vec<MovementEntry>, StoreError> {
        (**self).select_movements(unit_id)
    }

    fn commit_movement(
        &self,
        draft: MovementDraft,
        expected: ExpectedVersion,
    ) -> Result<(MovementEntry, Unit), StoreError> {
        (**self).commit_movement(draft, expected)
    }
}

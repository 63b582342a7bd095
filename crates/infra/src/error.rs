//! Caller-facing error taxonomy for catalog and ledger operations.

use thiserror::Error;

use stockledger_core::DomainError;

use crate::store::StoreError;

/// Failure of a catalog or ledger operation.
///
/// Every variant is distinguishable through [`InventoryError::kind`] so a
/// presentation layer can pick a message without matching on text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InventoryError {
    /// Malformed or out-of-range input; the caller can correct it.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced unit does not exist.
    #[error("unit not found")]
    NotFound,

    /// An outbound movement exceeded the quantity on hand.
    #[error("not enough stock available (current: {current})")]
    InsufficientStock { current: i64 },

    /// Lost an optimistic-concurrency race too many times, or edited a stale unit.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The storage collaborator failed.
    #[error("storage failure: {0}")]
    Storage(StoreError),

    /// Stored quantity and ledger disagree after a write. Never expected.
    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),
}

/// Stable discriminant of [`InventoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    Conflict,
    Storage,
    Inconsistent,
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::Validation(_) => ErrorKind::Validation,
            InventoryError::NotFound => ErrorKind::NotFound,
            InventoryError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            InventoryError::Conflict(_) => ErrorKind::Conflict,
            InventoryError::Storage(_) => ErrorKind::Storage,
            InventoryError::Inconsistent(_) => ErrorKind::Inconsistent,
        }
    }
}

impl From<DomainError> for InventoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => InventoryError::Validation(msg),
            DomainError::InvalidId(msg) => InventoryError::Validation(msg),
            DomainError::NotFound => InventoryError::NotFound,
            DomainError::InsufficientStock { current, .. } => {
                InventoryError::InsufficientStock { current }
            }
            DomainError::InvariantViolation(msg) => InventoryError::Inconsistent(msg),
            DomainError::Conflict(msg) => InventoryError::Conflict(msg),
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => InventoryError::NotFound,
            StoreError::DuplicateSku(sku) => {
                InventoryError::Validation(format!("sku '{sku}' is already in use"))
            }
            StoreError::Concurrency(msg) => InventoryError::Conflict(msg),
            other => InventoryError::Storage(other),
        }
    }
}

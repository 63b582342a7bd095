//! Inventory domain module (unit catalog + movement ledger rules).
//!
//! This crate contains business rules for stock-keeping units and their
//! movement history, implemented purely as deterministic domain logic
//! (no IO, no storage, no clocks).

pub mod movement;
pub mod reconcile;
pub mod unit;

pub use movement::{
    Direction, LedgerLine, MovementDraft, MovementEntry, MovementKind, parse_amount,
    resulting_quantity, validate_amount,
};
pub use reconcile::Reconciliation;
pub use unit::{Unit, UnitChanges, UnitDetails};

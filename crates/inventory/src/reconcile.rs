//! Quantity vs. history reconciliation.

use serde::{Deserialize, Serialize};

use stockledger_core::UnitId;

use crate::movement::MovementEntry;
use crate::unit::Unit;

/// Comparison of a unit's stored quantity with what its ledger implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub unit_id: UnitId,
    pub quantity: i64,
    /// Derived balance of the newest entry, `None` for an empty history.
    pub ledger_balance: Option<i64>,
    pub entries: usize,
    /// Entries whose `quantity_before` differs from the previous entry's
    /// balance, i.e. places where the quantity changed outside the ledger.
    pub chain_breaks: usize,
}

impl Reconciliation {
    /// `entries` may be in any order; they are walked by sequence number.
    pub fn compute(unit: &Unit, entries: &[MovementEntry]) -> Self {
        let mut ordered: Vec<&MovementEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.sequence);

        let chain_breaks = ordered
            .windows(2)
            .filter(|pair| pair[1].quantity_before != pair[0].stock_after())
            .count();

        Self {
            unit_id: unit.id_typed(),
            quantity: unit.quantity(),
            ledger_balance: ordered.last().map(|e| e.stock_after()),
            entries: ordered.len(),
            chain_breaks,
        }
    }

    /// True when the newest derived balance equals the stored quantity.
    ///
    /// A unit with no history is consistent by definition (its quantity is
    /// opening stock).
    pub fn is_consistent(&self) -> bool {
        self.ledger_balance.is_none_or(|b| b == self.quantity)
    }
}

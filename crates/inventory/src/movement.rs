use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, MovementId, UnitId};

/// Direction of a stock movement (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(Direction::In),
            "OUT" => Ok(Direction::Out),
            _ => Err(DomainError::validation("direction must be one of: IN, OUT")),
        }
    }
}

/// Why an entry exists.
///
/// `Movement` entries come from the ledger's record operation. `Adjustment`
/// entries are appended by catalog-level quantity changes when adjustments are
/// recorded, so that history keeps reconciling with the stored quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Movement,
    Adjustment,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Movement => "MOVEMENT",
            MovementKind::Adjustment => "ADJUSTMENT",
        }
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MOVEMENT" => Ok(MovementKind::Movement),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            other => Err(DomainError::validation(format!("unknown movement kind '{other}'"))),
        }
    }
}

/// Parse a caller-supplied amount.
///
/// The whole (trimmed) input must be a base-10 integer; trailing garbage such
/// as `"5abc"` is rejected rather than truncated.
pub fn parse_amount(raw: &str) -> DomainResult<i64> {
    let amount: i64 = raw
        .trim()
        .parse()
        .map_err(|_| DomainError::validation("invalid quantity"))?;
    validate_amount(amount)
}

/// Amounts must be strictly positive.
pub fn validate_amount(amount: i64) -> DomainResult<i64> {
    if amount <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(amount)
}

/// Quantity after moving `amount` in `direction` from `quantity_before`.
///
/// Fails with `InsufficientStock` when an outbound movement exceeds what is on
/// hand, so the result is never negative.
pub fn resulting_quantity(
    direction: Direction,
    quantity_before: i64,
    amount: i64,
) -> DomainResult<i64> {
    match direction {
        Direction::In => quantity_before
            .checked_add(amount)
            .ok_or_else(|| DomainError::validation("quantity overflow")),
        Direction::Out => {
            if amount > quantity_before {
                return Err(DomainError::insufficient_stock(quantity_before, amount));
            }
            Ok(quantity_before - amount)
        }
    }
}

/// Derived balance for display. Not validated; callers hold entries that
/// already passed `resulting_quantity` when they were recorded.
fn derived_balance(direction: Direction, quantity_before: i64, amount: i64) -> i64 {
    match direction {
        Direction::In => quantity_before.saturating_add(amount),
        Direction::Out => quantity_before.saturating_sub(amount),
    }
}

/// A validated movement that has not been stored yet (no sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub id: MovementId,
    pub unit_id: UnitId,
    pub direction: Direction,
    pub kind: MovementKind,
    pub amount: i64,
    pub quantity_before: i64,
    pub recorded_at: DateTime<Utc>,
}

impl MovementDraft {
    pub fn stock_after(&self) -> i64 {
        derived_balance(self.direction, self.quantity_before, self.amount)
    }

    /// Attach the store-assigned sequence number.
    pub fn into_entry(self, sequence: u64) -> MovementEntry {
        MovementEntry {
            id: self.id,
            unit_id: self.unit_id,
            sequence,
            direction: self.direction,
            kind: self.kind,
            amount: self.amount,
            quantity_before: self.quantity_before,
            recorded_at: self.recorded_at,
        }
    }
}

/// Immutable ledger entry.
///
/// `sequence` is assigned by the store, strictly increasing in commit order,
/// and is the ordering key for history (timestamps are informational only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: MovementId,
    pub unit_id: UnitId,
    pub sequence: u64,
    pub direction: Direction,
    pub kind: MovementKind,
    pub amount: i64,
    pub quantity_before: i64,
    pub recorded_at: DateTime<Utc>,
}

impl MovementEntry {
    /// Quantity immediately after this entry, recomputed on every call.
    pub fn stock_after(&self) -> i64 {
        derived_balance(self.direction, self.quantity_before, self.amount)
    }
}

impl Entity for MovementEntry {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One row of a unit's history: the entry plus its derived balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    #[serde(flatten)]
    pub entry: MovementEntry,
    pub stock_after: i64,
}

impl From<MovementEntry> for LedgerLine {
    fn from(entry: MovementEntry) -> Self {
        let stock_after = entry.stock_after();
        Self { entry, stock_after }
    }
}

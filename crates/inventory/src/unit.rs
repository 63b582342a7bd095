use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateRoot, DomainError, DomainResult, Entity, MovementId, UnitId};

use crate::movement::{
    Direction, MovementDraft, MovementKind, validate_amount, resulting_quantity,
};

/// Descriptive, freely editable fields of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDetails {
    pub name: String,
    pub sku: String,
    pub category: String,
}

impl UnitDetails {
    /// Trim and validate. Name and SKU must be non-empty; category is a free label.
    pub fn new(
        name: impl Into<String>,
        sku: impl Into<String>,
        category: impl Into<String>,
    ) -> DomainResult<Self> {
        let name = name.into().trim().to_string();
        let sku = sku.into().trim().to_string();
        let category = category.into().trim().to_string();

        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }

        Ok(Self { name, sku, category })
    }
}

/// Catalog-level edit: new details plus a caller-supplied quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitChanges {
    pub details: UnitDetails,
    pub quantity: i64,
}

impl UnitChanges {
    pub fn new(details: UnitDetails, quantity: i64) -> DomainResult<Self> {
        ensure_non_negative(quantity)?;
        Ok(Self { details, quantity })
    }
}

fn ensure_non_negative(quantity: i64) -> DomainResult<()> {
    if quantity < 0 {
        return Err(DomainError::validation("quantity cannot be negative"));
    }
    Ok(())
}

/// Aggregate root: a stock-keeping unit with its authoritative quantity.
///
/// Serialize-only: units are built through `register` or `restore`, never
/// from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    id: UnitId,
    name: String,
    sku: String,
    category: String,
    quantity: i64,
    version: u64,
}

impl Unit {
    /// New unit at version 0 holding `initial_quantity`.
    pub fn register(id: UnitId, details: UnitDetails, initial_quantity: i64) -> DomainResult<Self> {
        ensure_non_negative(initial_quantity)?;
        Ok(Self {
            id,
            name: details.name,
            sku: details.sku,
            category: details.category,
            quantity: initial_quantity,
            version: 0,
        })
    }

    /// Rebuild a unit from stored columns.
    pub fn restore(id: UnitId, details: UnitDetails, quantity: i64, version: u64) -> Self {
        Self {
            id,
            name: details.name,
            sku: details.sku,
            category: details.category,
            quantity,
            version,
        }
    }

    pub fn id_typed(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn details(&self) -> UnitDetails {
        UnitDetails {
            name: self.name.clone(),
            sku: self.sku.clone(),
            category: self.category.clone(),
        }
    }

    /// Decide a ledger movement against the current snapshot (no mutation).
    pub fn plan_movement(
        &self,
        id: MovementId,
        direction: Direction,
        amount: i64,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<MovementDraft> {
        let amount = validate_amount(amount)?;
        resulting_quantity(direction, self.quantity, amount)?;

        Ok(MovementDraft {
            id,
            unit_id: self.id,
            direction,
            kind: MovementKind::Movement,
            amount,
            quantity_before: self.quantity,
            recorded_at,
        })
    }

    /// Adjustment entry that moves the quantity to `target`, or `None` when
    /// nothing changes.
    pub fn plan_adjustment(
        &self,
        id: MovementId,
        target: i64,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<Option<MovementDraft>> {
        ensure_non_negative(target)?;
        if target == self.quantity {
            return Ok(None);
        }

        let (direction, amount) = if target > self.quantity {
            (Direction::In, target - self.quantity)
        } else {
            (Direction::Out, self.quantity - target)
        };

        Ok(Some(MovementDraft {
            id,
            unit_id: self.id,
            direction,
            kind: MovementKind::Adjustment,
            amount,
            quantity_before: self.quantity,
            recorded_at,
        }))
    }

    /// Apply a draft that was planned against this exact snapshot.
    ///
    /// Rejects drafts for another unit or whose `quantity_before` no longer
    /// matches, so a stale decision can never be applied.
    pub fn apply_movement(&mut self, draft: &MovementDraft) -> DomainResult<()> {
        if draft.unit_id != self.id {
            return Err(DomainError::invariant("unit_id mismatch"));
        }
        if draft.quantity_before != self.quantity {
            return Err(DomainError::conflict(format!(
                "movement planned against quantity {}, unit holds {}",
                draft.quantity_before, self.quantity
            )));
        }
        let amount = validate_amount(draft.amount)?;
        self.quantity = resulting_quantity(draft.direction, self.quantity, amount)?;

        // +1 per accepted change.
        self.version += 1;
        Ok(())
    }

    /// Overwrite details and quantity directly (catalog edit).
    pub fn apply_changes(&mut self, changes: &UnitChanges) -> DomainResult<()> {
        ensure_non_negative(changes.quantity)?;
        self.name = changes.details.name.clone();
        self.sku = changes.details.sku.clone();
        self.category = changes.details.category.clone();
        self.quantity = changes.quantity;
        self.version += 1;
        Ok(())
    }
}

impl Entity for Unit {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Unit {
    fn version(&self) -> u64 {
        self.version
    }
}

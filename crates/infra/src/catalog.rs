//! Unit catalog service: identity, descriptive fields, authoritative quantity.

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, ExpectedVersion, MovementId, UnitId};
use stockledger_inventory::{MovementDraft, MovementEntry, Unit, UnitChanges, UnitDetails};

use crate::config::LedgerSettings;
use crate::error::InventoryError;
use crate::store::{InventoryStore, StoreError};

/// Catalog operations over an [`InventoryStore`].
///
/// Quantity written here bypasses the ledger (opening stock on `register`,
/// overwrite on `edit`) unless `record_adjustments` is enabled, in which case
/// each such change is stored together with an `ADJUSTMENT` entry.
#[derive(Debug, Clone)]
pub struct UnitCatalog<S> {
    store: S,
    record_adjustments: bool,
}

impl<S> UnitCatalog<S> {
    pub fn new(store: S) -> Self {
        Self::with_settings(store, &LedgerSettings::default())
    }

    pub fn with_settings(store: S, settings: &LedgerSettings) -> Self {
        Self {
            store,
            record_adjustments: settings.record_adjustments,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: InventoryStore> UnitCatalog<S> {
    /// All units ordered by name.
    #[instrument(skip(self), err(level = "debug"))]
    pub fn list(&self) -> Result<Vec<Unit>, InventoryError> {
        Ok(self.store.select_units()?)
    }

    #[instrument(skip(self, id), fields(unit_id = %id), err(level = "debug"))]
    pub fn get(&self, id: UnitId) -> Result<Unit, InventoryError> {
        self.store.select_unit(id)?.ok_or(InventoryError::NotFound)
    }

    #[instrument(skip(self, name, sku, category), err(level = "debug"))]
    pub fn register(
        &self,
        name: &str,
        sku: &str,
        category: &str,
        initial_quantity: i64,
    ) -> Result<Unit, InventoryError> {
        let details = UnitDetails::new(name, sku, category)?;
        let id = UnitId::new();

        let (unit, opening) = if self.record_adjustments {
            let empty = Unit::register(id, details, 0)?;
            let opening = empty.plan_adjustment(MovementId::new(), initial_quantity, Utc::now())?;
            (empty, opening)
        } else {
            (Unit::register(id, details, initial_quantity)?, None)
        };

        let unit = self.store.insert_unit(unit, opening)?;
        info!(unit_id = %unit.id_typed(), sku = unit.sku(), quantity = unit.quantity(), "unit registered");
        Ok(unit)
    }

    #[instrument(
        skip(self, id, name, sku, category),
        fields(unit_id = %id),
        err(level = "debug")
    )]
    pub fn edit(
        &self,
        id: UnitId,
        name: &str,
        sku: &str,
        category: &str,
        quantity: i64,
    ) -> Result<Unit, InventoryError> {
        let changes = UnitChanges::new(UnitDetails::new(name, sku, category)?, quantity)?;
        let current = self.get(id)?;

        let adjustment = if self.record_adjustments {
            current.plan_adjustment(MovementId::new(), quantity, Utc::now())?
        } else {
            None
        };

        let unit = self.store.update_unit(
            id,
            changes,
            adjustment,
            ExpectedVersion::Exact(current.version()),
        )?;
        info!(unit_id = %id, quantity = unit.quantity(), "unit edited");
        Ok(unit)
    }

    /// Delete the unit and, atomically, its whole history.
    #[instrument(skip(self, id), fields(unit_id = %id), err(level = "debug"))]
    pub fn remove(&self, id: UnitId) -> Result<(), InventoryError> {
        if !self.store.delete_unit(id)? {
            return Err(InventoryError::NotFound);
        }
        info!(unit_id = %id, "unit removed with its movement history");
        Ok(())
    }

    #[instrument(skip(self, id), fields(unit_id = %id), err(level = "debug"))]
    pub fn get_quantity(&self, id: UnitId) -> Result<i64, InventoryError> {
        Ok(self.get(id)?.quantity())
    }

    /// Quantity write for a validated movement, stored in the same atomic
    /// command as the entry it comes from.
    pub(crate) fn set_quantity(
        &self,
        draft: MovementDraft,
        expected: ExpectedVersion,
    ) -> Result<(MovementEntry, Unit), StoreError> {
        self.store.commit_movement(draft, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockledger_inventory::{Direction, MovementKind};

    use crate::error::ErrorKind;
    use crate::store::InMemoryInventoryStore;

    fn catalog(record_adjustments: bool) -> UnitCatalog<Arc<InMemoryInventoryStore>> {
        let settings = LedgerSettings {
            record_adjustments,
            ..LedgerSettings::default()
        };
        UnitCatalog::with_settings(Arc::new(InMemoryInventoryStore::new()), &settings)
    }

    #[test]
    fn register_bootstraps_quantity_without_history() {
        let catalog = catalog(false);
        let unit = catalog.register("Widget", "W-1", "parts", 10).unwrap();
        assert_eq!(catalog.get_quantity(unit.id_typed()).unwrap(), 10);
        assert!(catalog.store().select_movements(unit.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn register_validates_input() {
        let catalog = catalog(false);
        let err = catalog.register("Widget", "W-1", "parts", -1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = catalog.register("", "W-1", "parts", 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn register_with_adjustments_records_opening_entry() {
        let catalog = catalog(true);
        let unit = catalog.register("Widget", "W-1", "parts", 10).unwrap();
        assert_eq!(unit.quantity(), 10);

        let entries = catalog.store().select_movements(unit.id_typed()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, MovementKind::Adjustment);
        assert_eq!(entries[0].direction, Direction::In);
        assert_eq!(entries[0].quantity_before, 0);
        assert_eq!(entries[0].stock_after(), 10);
    }

    #[test]
    fn register_with_adjustments_and_zero_stock_has_no_entry() {
        let catalog = catalog(true);
        let unit = catalog.register("Widget", "W-1", "parts", 0).unwrap();
        assert!(catalog.store().select_movements(unit.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn edit_overwrites_fields_and_quantity() {
        let catalog = catalog(false);
        let unit = catalog.register("Widget", "W-1", "parts", 10).unwrap();
        let edited = catalog
            .edit(unit.id_typed(), "Widget XL", "W-2", "large parts", 3)
            .unwrap();
        assert_eq!(edited.name(), "Widget XL");
        assert_eq!(edited.sku(), "W-2");
        assert_eq!(edited.category(), "large parts");
        assert_eq!(catalog.get_quantity(unit.id_typed()).unwrap(), 3);
    }

    #[test]
    fn edit_with_adjustments_explains_the_change() {
        let catalog = catalog(true);
        let unit = catalog.register("Widget", "W-1", "parts", 10).unwrap();
        catalog.edit(unit.id_typed(), "Widget", "W-1", "parts", 4).unwrap();

        let entries = catalog.store().select_movements(unit.id_typed()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Out);
        assert_eq!(entries[0].amount, 6);
        assert_eq!(entries[0].stock_after(), 4);
    }

    #[test]
    fn edit_unknown_unit_is_not_found() {
        let catalog = catalog(false);
        let err = catalog.edit(UnitId::new(), "Widget", "W-1", "parts", 1).unwrap_err();
        assert_eq!(err, InventoryError::NotFound);
    }

    #[test]
    fn duplicate_sku_is_a_validation_error() {
        let catalog = catalog(false);
        catalog.register("Widget", "W-1", "parts", 1).unwrap();
        let other = catalog.register("Gadget", "G-1", "parts", 1).unwrap();

        let err = catalog.register("Widget copy", "W-1", "parts", 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = catalog.edit(other.id_typed(), "Gadget", "W-1", "parts", 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn list_is_sorted_by_name() {
        let catalog = catalog(false);
        catalog.register("Washer", "W", "", 0).unwrap();
        catalog.register("Anchor", "A", "", 0).unwrap();
        catalog.register("Nut", "N", "", 0).unwrap();

        let names: Vec<String> = catalog
            .list()
            .unwrap()
            .into_iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, ["Anchor", "Nut", "Washer"]);
    }

    #[test]
    fn remove_unknown_unit_is_not_found() {
        let catalog = catalog(false);
        assert_eq!(catalog.remove(UnitId::new()).unwrap_err(), InventoryError::NotFound);
        assert_eq!(catalog.get_quantity(UnitId::new()).unwrap_err(), InventoryError::NotFound);
    }
}

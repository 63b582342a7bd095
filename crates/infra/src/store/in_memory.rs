use std::collections::HashMap;
use std::sync::RwLock;

use stockledger_core::{AggregateRoot, ExpectedVersion, UnitId};
use stockledger_inventory::{MovementDraft, MovementEntry, Unit, UnitChanges};

use super::r#trait::{InventoryStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    units: HashMap<UnitId, Unit>,
    movements: Vec<MovementEntry>,
    last_sequence: u64,
}

impl Tables {
    fn ensure_sku_free(&self, sku: &str, owner: UnitId) -> Result<(), StoreError> {
        let taken = self
            .units
            .values()
            .any(|u| u.sku() == sku && u.id_typed() != owner);
        if taken {
            return Err(StoreError::DuplicateSku(sku.to_string()));
        }
        Ok(())
    }

    fn append(&mut self, draft: MovementDraft) -> MovementEntry {
        self.last_sequence += 1;
        let entry = draft.into_entry(self.last_sequence);
        self.movements.push(entry.clone());
        entry
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. Both collections sit behind one lock, so every
/// method is atomic with respect to every other.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

fn check_version(unit: &Unit, expected: ExpectedVersion) -> Result<(), StoreError> {
    Ok(expected.check(unit.version())?)
}

impl InventoryStore for InMemoryInventoryStore {
    fn select_units(&self) -> Result<Vec<Unit>, StoreError> {
        let tables = self.read()?;
        let mut units: Vec<Unit> = tables.units.values().cloned().collect();
        units.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.sku().cmp(b.sku()))
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });
        Ok(units)
    }

    fn select_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        Ok(self.read()?.units.get(&id).cloned())
    }

    fn insert_unit(&self, unit: Unit, opening: Option<MovementDraft>) -> Result<Unit, StoreError> {
        let mut tables = self.write()?;
        let id = unit.id_typed();

        if tables.units.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        tables.ensure_sku_free(unit.sku(), id)?;

        // Validate everything before touching the tables.
        let mut stored = unit;
        if let Some(draft) = &opening {
            stored.apply_movement(draft)?;
        }

        tables.units.insert(id, stored.clone());
        if let Some(draft) = opening {
            tables.append(draft);
        }
        Ok(stored)
    }

    fn update_unit(
        &self,
        id: UnitId,
        changes: UnitChanges,
        adjustment: Option<MovementDraft>,
        expected: ExpectedVersion,
    ) -> Result<Unit, StoreError> {
        let mut tables = self.write()?;
        let current = tables.units.get(&id).ok_or(StoreError::NotFound(id))?;
        check_version(current, expected)?;
        tables.ensure_sku_free(&changes.details.sku, id)?;

        let mut updated = current.clone();
        if let Some(draft) = &adjustment {
            updated.apply_movement(draft)?;
            if updated.quantity() != changes.quantity {
                return Err(StoreError::Constraint(format!(
                    "adjustment ends at {}, edit sets {}",
                    updated.quantity(),
                    changes.quantity
                )));
            }
        }
        updated.apply_changes(&changes)?;

        tables.units.insert(id, updated.clone());
        if let Some(draft) = adjustment {
            tables.append(draft);
        }
        Ok(updated)
    }

    fn delete_unit(&self, id: UnitId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.units.remove(&id).is_none() {
            return Ok(false);
        }
        tables.movements.retain(|e| e.unit_id != id);
        Ok(true)
    }

    fn select_movements(&self, unit_id: UnitId) -> Result<Vec<MovementEntry>, StoreError> {
        let tables = self.read()?;
        let mut entries: Vec<MovementEntry> = tables
            .movements
            .iter()
            .filter(|e| e.unit_id == unit_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(entries)
    }

    fn commit_movement(
        &self,
        draft: MovementDraft,
        expected: ExpectedVersion,
    ) -> Result<(MovementEntry, Unit), StoreError> {
        let mut tables = self.write()?;
        let id = draft.unit_id;
        let current = tables.units.get(&id).ok_or(StoreError::NotFound(id))?;
        check_version(current, expected)?;

        let mut updated = current.clone();
        updated.apply_movement(&draft)?;

        tables.units.insert(id, updated.clone());
        let entry = tables.append(draft);
        Ok((entry, updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::MovementId;
    use stockledger_inventory::{Direction, UnitDetails};

    fn unit(name: &str, sku: &str, quantity: i64) -> Unit {
        let details = UnitDetails::new(name, sku, "misc").unwrap();
        Unit::register(UnitId::new(), details, quantity).unwrap()
    }

    fn out(unit: &Unit, amount: i64) -> MovementDraft {
        unit.plan_movement(MovementId::new(), Direction::Out, amount, Utc::now())
            .unwrap()
    }

    #[test]
    fn units_are_listed_by_name() {
        let store = InMemoryInventoryStore::new();
        for (name, sku) in [("Nut", "N"), ("Bolt", "B"), ("Washer", "W")] {
            store.insert_unit(unit(name, sku, 0), None).unwrap();
        }
        let names: Vec<String> = store
            .select_units()
            .unwrap()
            .iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, ["Bolt", "Nut", "Washer"]);
    }

    #[test]
    fn names_compare_bytewise() {
        let store = InMemoryInventoryStore::new();
        store.insert_unit(unit("apple", "A", 0), None).unwrap();
        store.insert_unit(unit("Banana", "B", 0), None).unwrap();
        let names: Vec<String> = store
            .select_units()
            .unwrap()
            .iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, ["Banana", "apple"]);
    }

    #[test]
    fn duplicate_sku_is_rejected() {
        let store = InMemoryInventoryStore::new();
        store.insert_unit(unit("Bolt", "B-1", 0), None).unwrap();
        let err = store.insert_unit(unit("Other bolt", "B-1", 0), None).unwrap_err();
        assert_eq!(err, StoreError::DuplicateSku("B-1".to_string()));
    }

    #[test]
    fn stale_version_loses_the_race() {
        let store = InMemoryInventoryStore::new();
        let u = store.insert_unit(unit("Bolt", "B-1", 10), None).unwrap();

        let first = out(&u, 6);
        let second = out(&u, 6);
        store
            .commit_movement(first, ExpectedVersion::Exact(u.version()))
            .unwrap();
        let err = store
            .commit_movement(second, ExpectedVersion::Exact(u.version()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        let after = store.select_unit(u.id_typed()).unwrap().unwrap();
        assert_eq!(after.quantity(), 4);
        assert_eq!(store.select_movements(u.id_typed()).unwrap().len(), 1);
    }

    #[test]
    fn stale_edit_loses_to_a_committed_movement() {
        let store = InMemoryInventoryStore::new();
        let u = store.insert_unit(unit("Bolt", "B-1", 10), None).unwrap();
        store
            .commit_movement(out(&u, 6), ExpectedVersion::Exact(u.version()))
            .unwrap();

        let details = UnitDetails::new("Bolt", "B-1", "misc").unwrap();
        let changes = UnitChanges::new(details, 10).unwrap();
        let err = store
            .update_unit(u.id_typed(), changes, None, ExpectedVersion::Exact(u.version()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        let after = store.select_unit(u.id_typed()).unwrap().unwrap();
        assert_eq!(after.quantity(), 4);
        assert_eq!(store.select_movements(u.id_typed()).unwrap().len(), 1);
    }

    #[test]
    fn stale_snapshot_is_rejected_even_without_version_check() {
        let store = InMemoryInventoryStore::new();
        let u = store.insert_unit(unit("Bolt", "B-1", 10), None).unwrap();
        store.commit_movement(out(&u, 6), ExpectedVersion::Any).unwrap();
        let err = store.commit_movement(out(&u, 6), ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[test]
    fn delete_cascades_to_entries() {
        let store = InMemoryInventoryStore::new();
        let keep = store.insert_unit(unit("Nut", "N", 5), None).unwrap();
        let gone = store.insert_unit(unit("Bolt", "B", 5), None).unwrap();
        store.commit_movement(out(&keep, 1), ExpectedVersion::Any).unwrap();
        store.commit_movement(out(&gone, 1), ExpectedVersion::Any).unwrap();

        assert!(store.delete_unit(gone.id_typed()).unwrap());
        assert!(!store.delete_unit(gone.id_typed()).unwrap());
        assert!(store.select_movements(gone.id_typed()).unwrap().is_empty());
        assert_eq!(store.select_movements(keep.id_typed()).unwrap().len(), 1);
    }

    #[test]
    fn sequences_increase_and_history_is_newest_first() {
        let store = InMemoryInventoryStore::new();
        let mut u = store.insert_unit(unit("Bolt", "B", 10), None).unwrap();
        for _ in 0..3 {
            let (_, next) = store.commit_movement(out(&u, 1), ExpectedVersion::Any).unwrap();
            u = next;
        }
        let seqs: Vec<u64> = store
            .select_movements(u.id_typed())
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, [3, 2, 1]);
    }
}

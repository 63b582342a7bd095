//! Movement ledger: records stock movements and serves a unit's history.
//!
//! ## Recording flow
//!
//! `record` follows load → decide → persist:
//! 1. **Validate**: the amount is parsed and checked before anything is read
//! 2. **Load**: snapshot the unit (quantity + version) through the catalog
//! 3. **Decide**: `Unit::plan_movement` checks stock against the snapshot (pure)
//! 4. **Persist**: the store appends the entry and writes the new quantity in one
//!    atomic command, guarded by the snapshot's version
//!
//! If another writer committed between steps 2 and 4 the store rejects the
//! command and nothing is written. The ledger then reloads and decides again,
//! so a movement that no longer fits is reported as insufficient stock instead
//! of being applied on top of a stale quantity.

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use stockledger_core::{AggregateRoot, ExpectedVersion, MovementId, UnitId};
use stockledger_inventory::{
    Direction, LedgerLine, Reconciliation, Unit, parse_amount, validate_amount,
};

use crate::catalog::UnitCatalog;
use crate::config::LedgerSettings;
use crate::error::InventoryError;
use crate::store::{InventoryStore, StoreError};

#[derive(Debug, Clone)]
pub struct MovementLedger<S> {
    catalog: UnitCatalog<S>,
    max_conflict_attempts: u32,
}

impl<S> MovementLedger<S> {
    pub fn new(catalog: UnitCatalog<S>) -> Self {
        Self::with_settings(catalog, &LedgerSettings::default())
    }

    pub fn with_settings(catalog: UnitCatalog<S>, settings: &LedgerSettings) -> Self {
        Self {
            catalog,
            max_conflict_attempts: settings.max_conflict_attempts.max(1),
        }
    }

    pub fn catalog(&self) -> &UnitCatalog<S> {
        &self.catalog
    }
}

impl<S: InventoryStore> MovementLedger<S> {
    /// Entries of one unit, newest first, each with its derived `stock_after`.
    #[instrument(skip(self, unit_id), fields(unit_id = %unit_id), err(level = "debug"))]
    pub fn history(&self, unit_id: UnitId) -> Result<Vec<LedgerLine>, InventoryError> {
        self.catalog.get(unit_id)?;
        let entries = self.catalog.store().select_movements(unit_id)?;
        Ok(entries.into_iter().map(LedgerLine::from).collect())
    }

    /// Record a movement from caller-supplied text (e.g. a form field).
    pub fn record(
        &self,
        unit_id: UnitId,
        direction: Direction,
        raw_amount: &str,
    ) -> Result<LedgerLine, InventoryError> {
        let amount = parse_amount(raw_amount)?;
        self.record_amount(unit_id, direction, amount)
    }

    /// Record a movement of `amount` units.
    ///
    /// On success the unit's quantity equals the returned line's `stock_after`
    /// and the entry is the newest in the unit's history. On any error neither
    /// the quantity nor the history has changed.
    #[instrument(
        skip(self, unit_id),
        fields(unit_id = %unit_id, direction = %direction),
        err(level = "debug")
    )]
    pub fn record_amount(
        &self,
        unit_id: UnitId,
        direction: Direction,
        amount: i64,
    ) -> Result<LedgerLine, InventoryError> {
        validate_amount(amount)?;

        for attempt in 1..=self.max_conflict_attempts {
            // 1) Load snapshot
            let unit = self.catalog.get(unit_id)?;

            // 2) Decide against it (no mutation)
            let draft = match unit.plan_movement(MovementId::new(), direction, amount, Utc::now()) {
                Ok(draft) => draft,
                Err(e) => {
                    let err = InventoryError::from(e);
                    if let InventoryError::InsufficientStock { current } = err {
                        warn!(current, requested = amount, "movement rejected: not enough stock");
                    }
                    return Err(err);
                }
            };

            // 3) Persist entry + quantity atomically, guarded by the snapshot version
            match self
                .catalog
                .set_quantity(draft, ExpectedVersion::Exact(unit.version()))
            {
                Ok((entry, stored)) => {
                    check_balance(&stored, entry.stock_after())?;
                    info!(
                        sequence = entry.sequence,
                        quantity_before = entry.quantity_before,
                        stock_after = stored.quantity(),
                        "movement recorded"
                    );
                    return Ok(LedgerLine::from(entry));
                }
                Err(StoreError::Concurrency(reason)) => {
                    warn!(attempt, %reason, "unit changed while recording; reloading");
                }
                Err(e) => {
                    warn!(error = %e, "store rejected movement");
                    return Err(e.into());
                }
            }
        }

        Err(InventoryError::Conflict(format!(
            "unit {unit_id} kept changing; gave up after {} attempts",
            self.max_conflict_attempts
        )))
    }

    /// Compare a unit's quantity with what its history adds up to.
    ///
    /// The unit is read again after its entries; if its version moved in
    /// between, the pair is re-read so the report never mixes two states.
    #[instrument(skip(self, unit_id), fields(unit_id = %unit_id), err(level = "debug"))]
    pub fn reconcile(&self, unit_id: UnitId) -> Result<Reconciliation, InventoryError> {
        for _ in 0..self.max_conflict_attempts {
            let unit = self.catalog.get(unit_id)?;
            let entries = self.catalog.store().select_movements(unit_id)?;
            let after = self.catalog.get(unit_id)?;
            if after.version() != unit.version() {
                continue;
            }

            let report = Reconciliation::compute(&unit, &entries);
            if !report.is_consistent() {
                warn!(
                    quantity = report.quantity,
                    ledger_balance = ?report.ledger_balance,
                    chain_breaks = report.chain_breaks,
                    "unit quantity does not reconcile with its history"
                );
            }
            return Ok(report);
        }

        Err(InventoryError::Conflict(format!(
            "unit {unit_id} kept changing while reconciling"
        )))
    }
}

fn check_balance(unit: &Unit, stock_after: i64) -> Result<(), InventoryError> {
    if unit.quantity() != stock_after {
        error!(
            unit_id = %unit.id_typed(),
            quantity = unit.quantity(),
            stock_after,
            "stored quantity disagrees with the recorded entry"
        );
        return Err(InventoryError::Inconsistent(format!(
            "unit holds {} but entry ends at {stock_after}",
            unit.quantity()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use std::io;
    use std::sync::Mutex;

    use stockledger_inventory::MovementKind;

    use crate::error::ErrorKind;
    use crate::store::InMemoryInventoryStore;

    fn ledger() -> MovementLedger<Arc<InMemoryInventoryStore>> {
        MovementLedger::new(UnitCatalog::new(Arc::new(InMemoryInventoryStore::new())))
    }

    #[test]
    fn record_appends_entry_and_updates_quantity() {
        let ledger = ledger();
        let unit = ledger.catalog().register("Widget", "W-1", "parts", 10).unwrap();

        let line = ledger.record(unit.id_typed(), Direction::In, "5").unwrap();
        assert_eq!(line.entry.quantity_before, 10);
        assert_eq!(line.stock_after, 15);
        assert_eq!(line.entry.kind, MovementKind::Movement);
        assert_eq!(ledger.catalog().get_quantity(unit.id_typed()).unwrap(), 15);

        let history = ledger.history(unit.id_typed()).unwrap();
        assert_eq!(history, vec![line]);
    }

    #[test]
    fn insufficient_stock_reports_current_and_changes_nothing() {
        let ledger = ledger();
        let unit = ledger.catalog().register("Widget", "W-1", "parts", 3).unwrap();

        let err = ledger.record(unit.id_typed(), Direction::Out, "4").unwrap_err();
        assert_eq!(err, InventoryError::InsufficientStock { current: 3 });
        assert_eq!(ledger.catalog().get_quantity(unit.id_typed()).unwrap(), 3);
        assert!(ledger.history(unit.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn malformed_amounts_are_validation_errors() {
        let ledger = ledger();
        let unit = ledger.catalog().register("Widget", "W-1", "parts", 3).unwrap();

        for raw in ["", "0", "-2", "abc", "5abc"] {
            let err = ledger.record(unit.id_typed(), Direction::In, raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "input {raw:?}");
        }
        assert!(ledger.history(unit.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn unknown_unit_is_not_found() {
        let ledger = ledger();
        let id = UnitId::new();
        assert_eq!(ledger.record(id, Direction::In, "1").unwrap_err(), InventoryError::NotFound);
        assert_eq!(ledger.history(id).unwrap_err(), InventoryError::NotFound);
        assert_eq!(ledger.reconcile(id).unwrap_err(), InventoryError::NotFound);
    }

    #[test]
    fn history_is_newest_first() {
        let ledger = ledger();
        let unit = ledger.catalog().register("Widget", "W-1", "parts", 0).unwrap();
        for amount in [1, 2, 3] {
            ledger.record_amount(unit.id_typed(), Direction::In, amount).unwrap();
        }

        let amounts: Vec<i64> = ledger
            .history(unit.id_typed())
            .unwrap()
            .iter()
            .map(|l| l.entry.amount)
            .collect();
        assert_eq!(amounts, [3, 2, 1]);
    }

    #[test]
    fn reconcile_detects_catalog_overwrite() {
        let ledger = ledger();
        let unit = ledger.catalog().register("Widget", "W-1", "parts", 10).unwrap();
        ledger.record(unit.id_typed(), Direction::Out, "4").unwrap();
        assert!(ledger.reconcile(unit.id_typed()).unwrap().is_consistent());

        ledger
            .catalog()
            .edit(unit.id_typed(), "Widget", "W-1", "parts", 100)
            .unwrap();
        let report = ledger.reconcile(unit.id_typed()).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.quantity, 100);
        assert_eq!(report.ledger_balance, Some(6));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn rejected_input_is_not_logged_as_error() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let ledger = ledger();
            let unit = ledger.catalog().register("Widget", "W-1", "parts", 3).unwrap();
            let id = unit.id_typed();

            assert!(ledger.record(id, Direction::Out, "4").is_err());
            assert!(ledger.record_amount(id, Direction::In, 0).is_err());
            assert!(ledger.history(UnitId::new()).is_err());
            assert!(ledger.catalog().register("Copy", "W-1", "parts", 1).is_err());
        });

        let logs = buffer.contents();
        assert!(logs.contains("WARN"), "logs: {logs}");
        assert!(logs.contains("not enough stock"), "logs: {logs}");
        assert!(!logs.contains("ERROR"), "logs: {logs}");
    }
}

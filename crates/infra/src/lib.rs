//! Infrastructure layer: storage backends, configuration and the catalog and
//! ledger services that callers drive.

pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod store;


pub use catalog::UnitCatalog;
pub use config::{InventoryConfig, LedgerSettings, StoreBackend, StoreSettings};
pub use error::{ErrorKind, InventoryError};
pub use ledger::MovementLedger;
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError};

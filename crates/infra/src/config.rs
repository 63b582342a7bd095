//! Configuration loading and representation.
//!
//! Defaults are overlaid by environment variables such as
//! `STOCKLEDGER_LEDGER__RECORD_ADJUSTMENTS=true` or
//! `STOCKLEDGER_STORE__DATABASE_URL=postgres://...`.

use std::sync::Arc;

use config::{Config, ConfigError, Environment, Source};
use serde::Deserialize;

use stockledger_observability::TelemetrySettings;

use crate::catalog::UnitCatalog;
use crate::ledger::MovementLedger;
use crate::store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError};

const ENV_PREFIX: &str = "STOCKLEDGER";

/// Ledger behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerSettings {
    /// Re-decide attempts after losing an optimistic-concurrency race.
    pub max_conflict_attempts: u32,
    /// Append `ADJUSTMENT` entries for catalog-level quantity changes.
    pub record_adjustments: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_conflict_attempts: 8,
            record_adjustments: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InventoryConfig {
    pub ledger: LedgerSettings,
    pub store: StoreSettings,
    pub telemetry: TelemetrySettings,
}

impl InventoryConfig {
    /// Defaults overlaid by `STOCKLEDGER_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Defaults overlaid by an arbitrary source (files, maps in tests).
    pub fn from_source<S>(source: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let cfg: Self = Config::builder()
            .set_default(
                "ledger.max_conflict_attempts",
                i64::from(defaults.ledger.max_conflict_attempts),
            )?
            .set_default("ledger.record_adjustments", defaults.ledger.record_adjustments)?
            .set_default("store.backend", "memory")?
            .set_default(
                "store.max_connections",
                i64::from(defaults.store.max_connections),
            )?
            .set_default("telemetry.json", defaults.telemetry.json)?
            .set_default("telemetry.filter", defaults.telemetry.filter)?
            .add_source(source)
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Install the process-wide subscriber described by `telemetry`.
    pub fn init_telemetry(&self) {
        stockledger_observability::tracing::init_with(&self.telemetry);
    }

    /// Open the configured store and build the ledger (and its catalog) over it.
    ///
    /// The postgres backend connects, applies the schema and must then be
    /// driven from a multi-threaded tokio runtime.
    pub async fn build_ledger(
        &self,
    ) -> Result<MovementLedger<Arc<dyn InventoryStore>>, StoreError> {
        let store: Arc<dyn InventoryStore> = match self.store.backend {
            StoreBackend::Memory => Arc::new(InMemoryInventoryStore::new()),
            StoreBackend::Postgres => {
                let store = PostgresInventoryStore::connect(&self.store).await?;
                store.migrate().await?;
                Arc::new(store)
            }
        };

        let catalog = UnitCatalog::with_settings(store, &self.ledger);
        Ok(MovementLedger::with_settings(catalog, &self.ledger))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.max_conflict_attempts == 0 {
            return Err(ConfigError::Message(
                "ledger.max_conflict_attempts must be at least 1".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err(ConfigError::Message(
                "store.database_url is required for the postgres backend".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(toml: &str) -> Result<InventoryConfig, ConfigError> {
        InventoryConfig::from_source(File::from_str(toml, FileFormat::Toml))
    }

    #[test]
    fn empty_source_yields_defaults() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg, InventoryConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = from_toml(
            r#"
            [ledger]
            record_adjustments = true
            max_conflict_attempts = 3

            [store]
            backend = "postgres"
            database_url = "postgres://localhost/stock"

            [telemetry]
            json = false
            "#,
        )
        .unwrap();

        assert!(cfg.ledger.record_adjustments);
        assert_eq!(cfg.ledger.max_conflict_attempts, 3);
        assert_eq!(cfg.store.backend, StoreBackend::Postgres);
        assert_eq!(cfg.store.max_connections, 5);
        assert!(!cfg.telemetry.json);
        assert_eq!(cfg.telemetry.filter, "info");
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let err = from_toml("[store]\nbackend = \"postgres\"\n").unwrap_err();
        assert!(err.to_string().contains("database_url"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(from_toml("[ledger]\nmax_conflict_attempts = 0\n").is_err());
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn memory_backend_builds_a_working_ledger() {
        let cfg = from_toml("[ledger]\nrecord_adjustments = true\n").unwrap();
        cfg.init_telemetry();
        let ledger = block_on(cfg.build_ledger()).unwrap();

        let id = ledger
            .catalog()
            .register("Widget", "W-1", "parts", 10)
            .unwrap()
            .id_typed();
        ledger
            .record(id, stockledger_inventory::Direction::Out, "4")
            .unwrap();

        // Opening adjustment + the movement.
        assert_eq!(ledger.history(id).unwrap().len(), 2);
        assert_eq!(ledger.catalog().get_quantity(id).unwrap(), 6);
    }

    #[test]
    fn postgres_backend_without_url_fails_to_open() {
        let cfg = InventoryConfig {
            store: StoreSettings {
                backend: StoreBackend::Postgres,
                ..StoreSettings::default()
            },
            ..InventoryConfig::default()
        };
        match block_on(cfg.build_ledger()) {
            Err(StoreError::Backend(msg)) => assert!(msg.contains("database_url")),
            Err(other) => panic!("expected backend error, got {other:?}"),
            Ok(_) => panic!("postgres backend opened without a database url"),
        }
    }
}

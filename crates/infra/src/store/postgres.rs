//! Postgres-backed inventory store.
//!
//! Schema lives in `migrations/0001_inventory_ledger.sql`. Atomicity comes from
//! SQL transactions; the movement commit is a conditional
//! `UPDATE units ... WHERE version = $n AND quantity = $before` followed by the
//! entry insert in the same transaction, and the cascading delete relies on
//! `ON DELETE CASCADE`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` on `units_sku_key` | `DuplicateSku` | SKU already in use |
//! | `23505` (other) | `AlreadyExists` / `Concurrency` | Duplicate id or sequence |
//! | `23503`, `23514` | `Constraint` | Dangling unit reference, negative quantity |
//! | anything else | `Backend` | Network errors, pool closed, etc. |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{AggregateRoot, ExpectedVersion, MovementId, UnitId};
use stockledger_inventory::{
    Direction, MovementDraft, MovementEntry, MovementKind, Unit, UnitChanges, UnitDetails,
};

use super::r#trait::{InventoryStore, StoreError};
use crate::config::StoreSettings;

/// Schema applied by [`PostgresInventoryStore::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_inventory_ledger.sql");

const UNIT_COLUMNS: &str = "id, name, sku, category, quantity, version";
/// Byte-wise ordering, matching the in-memory store whatever the database
/// collation is.
const UNIT_ORDER: &str = r#"ORDER BY name COLLATE "C" ASC, sku COLLATE "C" ASC, id ASC"#;
const ENTRY_COLUMNS: &str =
    "id, unit_id, sequence, direction, kind, amount, quantity_before, recorded_at";

/// Postgres-backed inventory store.
///
/// `Send + Sync`; shares the SQLx pool across clones.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from `store.database_url` / `store.max_connections`.
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let url = settings
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("store.database_url is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_units(&self) -> Result<Vec<Unit>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {UNIT_COLUMNS} FROM units {UNIT_ORDER}"))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_units", e))?;

        rows.iter().map(unit_from_row).collect()
    }

    #[instrument(skip(self, id), fields(unit_id = %id), err)]
    pub async fn fetch_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        let row = sqlx::query(&format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_unit", e))?;

        row.as_ref().map(unit_from_row).transpose()
    }

    #[instrument(skip(self, unit, opening), fields(unit_id = %unit.id_typed()), err)]
    pub async fn insert_unit_async(
        &self,
        unit: Unit,
        opening: Option<MovementDraft>,
    ) -> Result<Unit, StoreError> {
        let mut stored = unit;
        if let Some(draft) = &opening {
            stored.apply_movement(draft)?;
        }

        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO units (id, name, sku, category, quantity, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(stored.id_typed().as_uuid())
        .bind(stored.name())
        .bind(stored.sku())
        .bind(stored.category())
        .bind(stored.quantity())
        .bind(stored.version() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unit_write_error("insert_unit", stored.id_typed(), stored.sku(), e))?;

        if let Some(draft) = opening {
            insert_entry(&mut tx, draft).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(stored)
    }

    #[instrument(skip(self, changes, adjustment), fields(unit_id = %id), err)]
    pub async fn update_unit_async(
        &self,
        id: UnitId,
        changes: UnitChanges,
        adjustment: Option<MovementDraft>,
        expected: ExpectedVersion,
    ) -> Result<Unit, StoreError> {
        let mut tx = self.begin().await?;

        // Row lock keeps the version check and the write in one critical section.
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_unit", e))?
        .ok_or(StoreError::NotFound(id))?;
        let current = unit_from_row(&row)?;

        if !expected.matches(current.version()) {
            return Err(StoreError::Concurrency(format!(
                "expected {expected:?}, found {}",
                current.version()
            )));
        }

        let mut updated = current;
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

        sqlx::query(
            r#"
            UPDATE units
            SET name = $2, sku = $3, category = $4, quantity = $5, version = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(updated.name())
        .bind(updated.sku())
        .bind(updated.category())
        .bind(updated.quantity())
        .bind(updated.version() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unit_write_error("update_unit", id, updated.sku(), e))?;

        if let Some(draft) = adjustment {
            insert_entry(&mut tx, draft).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(updated)
    }

    #[instrument(skip(self, id), fields(unit_id = %id), err)]
    pub async fn delete_unit_async(&self, id: UnitId) -> Result<bool, StoreError> {
        // Entries go with the unit through ON DELETE CASCADE, in the same statement.
        let result = sqlx::query("DELETE FROM units WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_unit", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(
        skip(self, unit_id),
        fields(unit_id = %unit_id, entry_count = tracing::field::Empty),
        err
    )]
    pub async fn fetch_movements(&self, unit_id: UnitId) -> Result<Vec<MovementEntry>, StoreError> {
        let span = Span::current();

        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM movement_entries WHERE unit_id = $1 ORDER BY sequence DESC"
        ))
        .bind(unit_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_movements", e))?;

        span.record("entry_count", rows.len());
        rows.iter().map(entry_from_row).collect()
    }

    /// Conditional update + insert in one transaction.
    #[instrument(
        skip(self, draft),
        fields(unit_id = %draft.unit_id, direction = %draft.direction, amount = draft.amount),
        err
    )]
    pub async fn commit_movement_async(
        &self,
        draft: MovementDraft,
        expected: ExpectedVersion,
    ) -> Result<(MovementEntry, Unit), StoreError> {
        let id = draft.unit_id;
        let stock_after = draft.stock_after();
        let expected_version: Option<i64> = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };

        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE units
            SET quantity = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1
              AND quantity = $3
              AND ($4::BIGINT IS NULL OR version = $4)
            RETURNING {UNIT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(stock_after)
        .bind(draft.quantity_before)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_quantity", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return match self.fetch_unit(id).await? {
                None => Err(StoreError::NotFound(id)),
                Some(current) => Err(StoreError::Concurrency(format!(
                    "expected {expected:?} at quantity {}, found version {} at quantity {}",
                    draft.quantity_before,
                    current.version(),
                    current.quantity()
                ))),
            };
        };
        let unit = unit_from_row(&row)?;

        let entry = insert_entry(&mut tx, draft).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((entry, unit))
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    draft: MovementDraft,
) -> Result<MovementEntry, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO movement_entries (
            id,
            unit_id,
            direction,
            kind,
            amount,
            quantity_before,
            recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING sequence
        "#,
    )
    .bind(draft.id.as_uuid())
    .bind(draft.unit_id.as_uuid())
    .bind(draft.direction.as_str())
    .bind(draft.kind.as_str())
    .bind(draft.amount)
    .bind(draft.quantity_before)
    .bind(draft.recorded_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_entry", e))?;

    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| StoreError::Backend(format!("failed to read sequence: {e}")))?;
    Ok(draft.into_entry(sequence as u64))
}

/// Run an async store call from the synchronous trait.
///
/// Needs a multi-threaded tokio runtime on the calling thread.
fn block_on<F, T>(fut: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresInventoryStore requires a tokio runtime on the calling thread".to_string(),
        )
    })?;
    if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
        return Err(StoreError::Backend(
            "PostgresInventoryStore needs a multi-threaded tokio runtime".to_string(),
        ));
    }
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl InventoryStore for PostgresInventoryStore {
    fn select_units(&self) -> Result<Vec<Unit>, StoreError> {
        block_on(self.fetch_units())
    }

    fn select_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        block_on(self.fetch_unit(id))
    }

    fn insert_unit(&self, unit: Unit, opening: Option<MovementDraft>) -> Result<Unit, StoreError> {
        block_on(self.insert_unit_async(unit, opening))
    }

    fn update_unit(
        &self,
        id: UnitId,
        changes: UnitChanges,
        adjustment: Option<MovementDraft>,
        expected: ExpectedVersion,
    ) -> Result<Unit, StoreError> {
        block_on(self.update_unit_async(id, changes, adjustment, expected))
    }

    fn delete_unit(&self, id: UnitId) -> Result<bool, StoreError> {
        block_on(self.delete_unit_async(id))
    }

    fn select_movements(&self, unit_id: UnitId) -> Result<Vec<MovementEntry>, StoreError> {
        block_on(self.fetch_movements(unit_id))
    }

    fn commit_movement(
        &self,
        draft: MovementDraft,
        expected: ExpectedVersion,
    ) -> Result<(MovementEntry, Unit), StoreError> {
        block_on(self.commit_movement_async(draft, expected))
    }
}

// Row decoding

fn column<'r, T>(row: &'r sqlx::postgres::PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to read column {name}: {e}")))
}

fn unit_from_row(row: &sqlx::postgres::PgRow) -> Result<Unit, StoreError> {
    let id: uuid::Uuid = column(row, "id")?;
    let quantity: i64 = column(row, "quantity")?;
    let version: i64 = column(row, "version")?;
    let details = UnitDetails {
        name: column(row, "name")?,
        sku: column(row, "sku")?,
        category: column(row, "category")?,
    };
    Ok(Unit::restore(
        UnitId::from_uuid(id),
        details,
        quantity,
        version as u64,
    ))
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<MovementEntry, StoreError> {
    let id: uuid::Uuid = column(row, "id")?;
    let unit_id: uuid::Uuid = column(row, "unit_id")?;
    let sequence: i64 = column(row, "sequence")?;
    let direction: String = column(row, "direction")?;
    let kind: String = column(row, "kind")?;
    let recorded_at: DateTime<Utc> = column(row, "recorded_at")?;

    Ok(MovementEntry {
        id: MovementId::from_uuid(id),
        unit_id: UnitId::from_uuid(unit_id),
        sequence: sequence as u64,
        direction: direction.parse::<Direction>()?,
        kind: kind.parse::<MovementKind>()?,
        amount: column(row, "amount")?,
        quantity_before: column(row, "quantity_before")?,
        recorded_at,
    })
}

// Error mapping

fn map_unit_write_error(operation: &str, id: UnitId, sku: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return match db_err.constraint() {
                Some("units_sku_key") => StoreError::DuplicateSku(sku.to_string()),
                _ => StoreError::AlreadyExists(id),
            };
        }
    }
    map_sqlx_error(operation, err)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Concurrency(msg),
                Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

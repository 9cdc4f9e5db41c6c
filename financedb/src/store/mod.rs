use crate::config::StoreConfig;
use crate::error::{FinanceDbError, Result};
use crate::migration::{self, OpenOutcome};
use crate::model::{CreditCard, HistoryEntry, LedgerEntry, MonthlyProfit, ShopItem, SoldItem};
use crate::record::Record;
use crate::schema::{ConflictPolicy, SchemaDefinition, FINANCE_SCHEMA};
use crate::system_db::SystemDb;
use crate::validation;
use crate::view::{self, QueryCatalog};
use crate::watcher::InvalidationTracker;
use rusqlite::types::ToSql;
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Virtual machine steps between checks of a point call's cancel flag.
const CANCEL_CHECK_OPS: i32 = 1_000;

/// The main entry point for the finance database.
///
/// Owns the single connection behind a mutex, so every read and write is
/// serialized and a reader never observes a partially committed write. Each
/// successful write notifies the invalidation tracker once the lock is released.
pub struct Store {
    db: Mutex<SystemDb>,
    schema: &'static SchemaDefinition,
    config: StoreConfig,
    catalog: QueryCatalog,
    tracker: Arc<InvalidationTracker>,
    outcome: OpenOutcome,
}

impl Store {
    /// Open the database described by `config`, running the migration gate.
    ///
    /// Fails if the live schema cannot be brought in line with the declared one;
    /// no store handle exists in that case.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let schema = &FINANCE_SCHEMA;
        let mut db = SystemDb::open(&config)?;
        let outcome = migration::prepare(&mut db, schema, &config)?;
        let catalog = QueryCatalog::new(schema)?;

        Ok(Store {
            db: Mutex::new(db),
            schema,
            config,
            catalog,
            tracker: InvalidationTracker::new(),
            outcome,
        })
    }

    /// Open a fresh in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreConfig::memory())
    }

    pub fn schema(&self) -> &'static SchemaDefinition {
        self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &Arc<InvalidationTracker> {
        &self.tracker
    }

    /// What the migration gate did when this store was opened.
    pub fn open_outcome(&self) -> &OpenOutcome {
        &self.outcome
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut SystemDb) -> Result<T>) -> Result<T> {
        let mut db = self
            .db
            .lock()
            .map_err(|_| FinanceDbError::Other("database lock poisoned".to_string()))?;
        f(&mut db)
    }

    // ── Cancellable reads ────────────────────────────────────────────

    /// Run `f` for `call` while holding the connection.
    ///
    /// A call cancelled before it gets the connection runs nothing. A statement
    /// still executing when the call is cancelled is interrupted, and `f` fails
    /// with [`FinanceDbError::Cancelled`].
    pub(crate) fn read_for<T>(
        &self,
        call: &PointCall,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        self.with_db(|db| {
            if call.is_cancelled() {
                return Err(FinanceDbError::Cancelled);
            }
            let cancelled = Arc::clone(&call.cancelled);
            db.conn().progress_handler(
                CANCEL_CHECK_OPS,
                Some(move || cancelled.load(Ordering::Relaxed)),
            );
            let result = f(db.conn());
            db.conn().progress_handler(0, None::<fn() -> bool>);

            result.map_err(|e| {
                if is_interrupted(&e) {
                    log::debug!("Point query interrupted");
                    FinanceDbError::Cancelled
                } else {
                    e
                }
            })
        })
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a record and return its id. An id of 0 lets the engine assign one.
    ///
    /// Replace-policy tables overwrite an existing row with the same id;
    /// abort-policy tables fail with [`FinanceDbError::UniqueViolation`].
    pub fn insert<R: Record>(&self, record: &R) -> Result<i64> {
        let table = R::TABLE;
        let id = self.with_db(|db| {
            let tx = db.transaction()?;
            let values = record.to_values();
            tx.execute(&table.insert_sql(R::ON_CONFLICT), params_from_iter(values.iter()))
                .map_err(|e| match R::ON_CONFLICT {
                    ConflictPolicy::Abort if is_key_conflict(&e) => FinanceDbError::UniqueViolation {
                        table: table.name,
                        id: record.id(),
                    },
                    _ => FinanceDbError::from(e),
                })?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })?;
        self.tracker.notify_tables(&[table.name]);
        Ok(id)
    }

    /// Replace the row with the record's id. Returns the number of rows changed,
    /// which is 0 when no such row exists.
    pub fn update<R: Record>(&self, record: &R) -> Result<usize> {
        let table = R::TABLE;
        let changed = self.with_db(|db| {
            let tx = db.transaction()?;
            let mut values = record.to_values();
            values.push(record.id().into());
            let changed = tx.execute(&table.update_sql(), params_from_iter(values.iter()))?;
            tx.commit()?;
            Ok(changed)
        })?;
        if changed > 0 {
            self.tracker.notify_tables(&[table.name]);
        }
        Ok(changed)
    }

    /// Delete the row with the record's id. Absent rows are a no-op.
    pub fn delete<R: Record>(&self, record: &R) -> Result<usize> {
        self.delete_by_id::<R>(record.id())
    }

    pub fn delete_by_id<R: Record>(&self, id: i64) -> Result<usize> {
        let table = R::TABLE;
        let changed = self.with_db(|db| {
            let tx = db.transaction()?;
            let changed = tx.execute(&table.delete_sql(), params![id])?;
            tx.commit()?;
            Ok(changed)
        })?;
        if changed > 0 {
            self.tracker.notify_tables(&[table.name]);
        }
        Ok(changed)
    }

    /// Delete every row of every table in one transaction, then reclaim file space.
    ///
    /// Observers of every table are notified once the delete commits. A failure
    /// to reclaim space afterwards is logged and does not fail the wipe.
    pub fn clear_all_tables(&self) -> Result<()> {
        self.clear_tables_then(SystemDb::reclaim_space)
    }

    fn clear_tables_then(&self, reclaim: impl FnOnce(&SystemDb) -> Result<()>) -> Result<()> {
        let reclaimed = self.with_db(|db| {
            let tx = db.transaction()?;
            for table in self.schema.tables {
                tx.execute(&table.clear_sql(), [])?;
            }
            tx.commit()?;
            Ok(reclaim(db))
        })?;

        match reclaimed {
            Ok(()) => log::info!("Cleared all tables"),
            Err(e) => log::warn!("Cleared all tables, but reclaiming space failed: {e}"),
        }
        let names = self.schema.table_names();
        self.tracker.notify_tables(&names);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get<R: Record>(&self, id: i64) -> Result<Option<R>> {
        self.with_db(|db| fetch_by_id(db.conn(), id))
    }

    pub fn list<R: Record>(&self) -> Result<Vec<R>> {
        self.query_records(&format!("SELECT * FROM `{}`", R::TABLE.name), &[])
    }

    /// Run `sql` and map every row through [`Record::from_row`].
    pub fn query_records<R: Record>(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<R>> {
        self.with_db(|db| fetch_records(db.conn(), sql, params))
    }

    /// First ledger entry with exactly this name.
    pub fn entry_by_name(&self, name: &str) -> Result<Option<LedgerEntry>> {
        self.with_db(|db| fetch_entry_by_name(db.conn(), name))
    }

    pub fn entry_count(&self) -> Result<i64> {
        self.with_db(|db| count_entries(db.conn()))
    }

    pub fn all_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.query_records(view::ALL_ENTRIES.sql, &[])
    }

    pub fn all_shop_items(&self) -> Result<Vec<ShopItem>> {
        self.query_records(view::ALL_SHOP_ITEMS.sql, &[])
    }

    /// Sum of `count * purchasePrice` over the inventory. `None` when it is empty.
    pub fn shop_total(&self) -> Result<Option<f64>> {
        self.with_db(|db| {
            let total = db
                .conn()
                .query_row(view::SHOP_TOTAL.sql, [], |row| row.get("total"))?;
            Ok(total)
        })
    }

    /// Newest first.
    pub fn all_sold_items(&self) -> Result<Vec<SoldItem>> {
        self.query_records(view::ALL_SOLD_ITEMS.sql, &[])
    }

    /// Profit per (year, month), newest month first.
    pub fn monthly_profits(&self) -> Result<Vec<MonthlyProfit>> {
        self.with_db(|db| {
            let mut stmt = db.conn().prepare(view::MONTHLY_PROFITS.sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(MonthlyProfit {
                    year: row.get("year")?,
                    month: row.get("month")?,
                    profit: row.get("profit")?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Amount changes of one ledger entry, newest first.
    pub fn history_for_entry(&self, entry_id: i64) -> Result<Vec<HistoryEntry>> {
        self.query_records(view::HISTORY_FOR_ENTRY.sql, &[&entry_id])
    }

    pub fn all_credit_cards(&self) -> Result<Vec<CreditCard>> {
        self.query_records(view::ALL_CREDIT_CARDS.sql, &[])
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Re-read the live schema and compare it against the declaration.
    pub fn validate(&self) -> Result<()> {
        self.with_db(|db| validation::validate_schema(db.conn(), self.schema))
    }

    /// Status report: schema version, identity hash, and per table the row
    /// count and the queries a write to it invalidates.
    pub fn status(&self) -> Result<serde_json::Value> {
        let (version, hash, tables) = self.with_db(|db| {
            let mut tables = serde_json::Map::new();
            for name in self.schema.table_names() {
                tables.insert(
                    name.to_string(),
                    serde_json::json!({
                        "count": db.row_count(name)?,
                        "queries": self.catalog.affected_queries(name),
                    }),
                );
            }
            Ok((db.schema_version()?, db.identity_hash()?, tables))
        })?;

        let queries: Vec<&str> = view::QUERIES
            .iter()
            .filter(|q| q.reactive)
            .map(|q| q.name)
            .collect();

        Ok(serde_json::json!({
            "schema_version": version,
            "identity_hash": hash,
            "tables": tables,
            "reactive_queries": queries,
            "observers": self.tracker.observer_count(),
        }))
    }
}

/// One cancellable read, owned by the thread that runs it.
pub(crate) struct PointCall {
    cancelled: Arc<AtomicBool>,
}

impl PointCall {
    /// A new call plus the guard that cancels it when dropped.
    pub(crate) fn start() -> (PointCall, CancelOnDrop) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let guard = CancelOnDrop {
            cancelled: Arc::clone(&cancelled),
            armed: true,
        };
        (PointCall { cancelled }, guard)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// The waiting side of a [`PointCall`]. Dropping it before
/// [`CancelOnDrop::disarm`] cancels the call.
pub(crate) struct CancelOnDrop {
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl CancelOnDrop {
    /// The call finished; dropping the guard no longer cancels anything.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.store(true, Ordering::Relaxed);
        }
    }
}

// ── Row Readers ──────────────────────────────────────────────────

pub(crate) fn fetch_records<R: Record>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<R>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(R::from_row(row)?);
    }
    Ok(records)
}

pub(crate) fn fetch_by_id<R: Record>(conn: &Connection, id: i64) -> Result<Option<R>> {
    let rows = fetch_records::<R>(conn, &R::TABLE.select_by_id_sql(), &[&id])?;
    Ok(rows.into_iter().next())
}

pub(crate) fn fetch_entry_by_name(conn: &Connection, name: &str) -> Result<Option<LedgerEntry>> {
    let rows = fetch_records(conn, view::ENTRY_BY_NAME.sql, &[&name])?;
    Ok(rows.into_iter().next())
}

pub(crate) fn count_entries(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(view::ENTRY_COUNT.sql, [], |row| row.get("count"))?;
    Ok(count)
}

fn is_interrupted(e: &FinanceDbError) -> bool {
    matches!(
        e,
        FinanceDbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::OperationInterrupted
    )
}

/// Whether `e` is a primary key collision on insert.
fn is_key_conflict(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && matches!(
                    err.extended_code,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        | ffi::SQLITE_CONSTRAINT_ROWID
                        | ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}

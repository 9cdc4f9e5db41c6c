use crate::config::{DbLocation, StoreConfig};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Name of the single-row metadata table holding the schema identity hash.
pub const MASTER_TABLE: &str = "schema_master";

/// Fixed id of the one row in `schema_master`.
pub const MASTER_ROW_ID: i64 = 42;

/// The SQLite connection plus the metadata bookkeeping around it.
pub struct SystemDb {
    conn: Connection,
}

impl SystemDb {
    /// Open or create the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.location {
            DbLocation::File(path) => Connection::open(path)?,
            DbLocation::Memory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout)?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode.as_str(),
            |row| row.get(0),
        )?;
        log::debug!("journal_mode = {mode}");
        Ok(SystemDb { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::memory())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. It rolls back when dropped without `commit`.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn schema_version(&self) -> Result<u32> {
        user_version(&self.conn)
    }

    pub fn identity_hash(&self) -> Result<Option<String>> {
        read_identity_hash(&self.conn)
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM `{table}`"), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Flush the WAL and reclaim free pages. VACUUM is skipped while a
    /// transaction is open on this connection.
    pub fn reclaim_space(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))
            .optional()?;
        if self.conn.is_autocommit() {
            self.conn.execute_batch("VACUUM")?;
        } else {
            log::debug!("Skipping VACUUM inside an open transaction");
        }
        Ok(())
    }
}

// ── Schema State ─────────────────────────────────────────────────
//
// Free functions so they run equally on a connection or inside a transaction.

pub fn user_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version as u32)
}

pub fn set_user_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

pub fn ensure_master_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {MASTER_TABLE} (id INTEGER PRIMARY KEY, identity_hash TEXT)"
    ))?;
    Ok(())
}

/// The stored identity hash, or `None` when the metadata table is absent or empty.
pub fn read_identity_hash(conn: &Connection) -> Result<Option<String>> {
    if !table_exists(conn, MASTER_TABLE)? {
        return Ok(None);
    }
    let hash = conn
        .query_row(
            &format!("SELECT identity_hash FROM {MASTER_TABLE} WHERE id = ?1"),
            params![MASTER_ROW_ID],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(hash.flatten())
}

/// Record the identity hash. The table only ever holds the fixed row.
pub fn write_identity_hash(conn: &Connection, hash: &str) -> Result<()> {
    ensure_master_table(conn)?;
    conn.execute(
        &format!("INSERT OR REPLACE INTO {MASTER_TABLE} (id, identity_hash) VALUES (?1, ?2)"),
        params![MASTER_ROW_ID, hash],
    )?;
    Ok(())
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Application tables on disk, excluding SQLite internals and the metadata table.
pub fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' \
         AND name NOT LIKE 'sqlite_%' AND name != ?1 ORDER BY name",
    )?;
    let mut rows = stmt.query(params![MASTER_TABLE])?;
    let mut tables = Vec::new();
    while let Some(row) = rows.next()? {
        tables.push(row.get(0)?);
    }
    Ok(tables)
}

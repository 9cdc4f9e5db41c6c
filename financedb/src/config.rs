use crate::error::Result;
use crate::migration::Migration;
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type CreateFn = dyn Fn(&Connection) -> Result<()> + Send + Sync;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

/// Callback run once, inside the creating transaction, when a database file is
/// first initialized. Typically seeds default rows.
#[derive(Clone)]
pub struct CreateHook(Arc<CreateFn>);

impl CreateHook {
    pub fn run(&self, conn: &Connection) -> Result<()> {
        (self.0)(conn)
    }
}

impl fmt::Debug for CreateHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CreateHook")
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: DbLocation,
    /// SQLite journal mode
    pub journal_mode: String,
    /// How long a statement waits on a locked database file
    pub busy_timeout: Duration,
    /// Drop and recreate every table when no migration path exists (data loss).
    pub fallback_to_destructive_migration: bool,
    pub migrations: Vec<Migration>,
    /// Quiet period after a change before reactive queries recompute.
    pub invalidation_debounce: Duration,
    pub on_create: Option<CreateHook>,
}

impl StoreConfig {
    /// Configuration for a file database
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        StoreConfig {
            location: DbLocation::File(path.as_ref().to_path_buf()),
            journal_mode: "WAL".to_string(),
            busy_timeout: Duration::from_secs(5),
            fallback_to_destructive_migration: true,
            migrations: Vec::new(),
            invalidation_debounce: Duration::ZERO,
            on_create: None,
        }
    }

    /// Configuration for an in-memory database
    pub fn memory() -> Self {
        StoreConfig {
            location: DbLocation::Memory,
            journal_mode: "MEMORY".to_string(),
            busy_timeout: Duration::from_secs(1),
            fallback_to_destructive_migration: true,
            migrations: Vec::new(),
            invalidation_debounce: Duration::ZERO,
            on_create: None,
        }
    }

    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn fallback_to_destructive_migration(mut self, enabled: bool) -> Self {
        self.fallback_to_destructive_migration = enabled;
        self
    }

    pub fn invalidation_debounce(mut self, window: Duration) -> Self {
        self.invalidation_debounce = window;
        self
    }

    /// Run `hook` after the tables are created on a fresh database. It is not
    /// run on reopen, after a migration or after a destructive recreate. An
    /// error from the hook aborts the open and leaves the file uninitialized.
    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) -> Result<()> + Send + Sync + 'static,
    {
        self.on_create = Some(CreateHook(Arc::new(hook)));
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

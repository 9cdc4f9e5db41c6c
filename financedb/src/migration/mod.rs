use crate::config::StoreConfig;
use crate::error::{FinanceDbError, Result};
use crate::schema::SchemaDefinition;
use crate::system_db::{self, SystemDb};
use crate::validation;
use rusqlite::{Connection, Transaction};
use std::fmt;
use std::sync::Arc;

type MigrateFn = dyn Fn(&Connection) -> Result<()> + Send + Sync;

/// A registered step that upgrades (or downgrades) the schema from one version to another.
#[derive(Clone)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    apply: Arc<MigrateFn>,
}

impl Migration {
    pub fn new<F>(from: u32, to: u32, apply: F) -> Self
    where
        F: Fn(&Connection) -> Result<()> + Send + Sync + 'static,
    {
        Migration {
            from,
            to,
            apply: Arc::new(apply),
        }
    }

    /// A migration made of plain SQL statements.
    pub fn sql(from: u32, to: u32, statements: &'static str) -> Self {
        Self::new(from, to, move |conn| {
            conn.execute_batch(statements)?;
            Ok(())
        })
    }

    pub fn describe(&self) -> String {
        format!("Migration {} -> {}", self.from, self.to)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a database file relative to the declared schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenState {
    /// No schema has ever been written.
    Uninitialized,
    /// Version and identity hash both match.
    Current,
    /// The on-disk version or identity hash disagrees with the declaration.
    Stale {
        on_disk_version: u32,
        on_disk_hash: Option<String>,
    },
}

/// What opening the database did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Created,
    Opened,
    Migrated { from: u32, to: u32, steps: usize },
    /// Every table was dropped and recreated. All previous rows are gone.
    Recreated { from: u32 },
}

pub fn detect_state(conn: &Connection, schema: &SchemaDefinition) -> Result<OpenState> {
    let version = system_db::user_version(conn)?;
    let hash = system_db::read_identity_hash(conn)?;

    if version == 0 && hash.is_none() {
        return Ok(OpenState::Uninitialized);
    }

    if version == schema.version && hash.as_deref() == Some(schema.identity_hash().as_str()) {
        return Ok(OpenState::Current);
    }

    Ok(OpenState::Stale {
        on_disk_version: version,
        on_disk_hash: hash,
    })
}

/// Find the chain of migrations leading from `from` to `to`.
///
/// At each version the step that jumps furthest toward the target without
/// overshooting it is taken. Returns `None` when no chain exists.
pub fn find_migration_path(migrations: &[Migration], from: u32, to: u32) -> Option<Vec<&Migration>> {
    if from == to {
        return None;
    }
    let upgrade = to > from;
    let mut path = Vec::new();
    let mut current = from;

    while current != to {
        let next = migrations
            .iter()
            .filter(|m| m.from == current)
            .filter(|m| {
                if upgrade {
                    m.to > current && m.to <= to
                } else {
                    m.to < current && m.to >= to
                }
            })
            .max_by_key(|m| if upgrade { m.to } else { u32::MAX - m.to })?;
        path.push(next);
        current = next.to;
    }

    Some(path)
}

pub fn create_all_tables(conn: &Connection, schema: &SchemaDefinition) -> Result<()> {
    for statement in schema.create_statements() {
        conn.execute_batch(&statement)?;
    }
    system_db::ensure_master_table(conn)?;
    Ok(())
}

pub fn drop_all_tables(conn: &Connection, schema: &SchemaDefinition) -> Result<()> {
    for table in schema.tables {
        conn.execute_batch(&table.drop_sql())?;
    }
    Ok(())
}

/// Apply `path` in order. Each step runs in its own savepoint nested in `tx`,
/// so a failing step leaves nothing behind once `tx` is dropped.
fn apply_path(tx: &mut Transaction<'_>, path: &[&Migration]) -> Result<()> {
    for migration in path {
        log::info!("Applying {}", migration.describe());
        let sp = tx.savepoint()?;
        (migration.apply)(&*sp).map_err(|e| FinanceDbError::Migration {
            from: migration.from,
            to: migration.to,
            reason: e.to_string(),
        })?;
        system_db::set_user_version(&sp, migration.to)?;
        sp.commit()?;
    }
    Ok(())
}

/// Bring the database file in line with `schema`, then verify it column by column.
///
/// Runs in a single transaction: on any error nothing is changed on disk.
pub fn prepare(
    db: &mut SystemDb,
    schema: &SchemaDefinition,
    config: &StoreConfig,
) -> Result<OpenOutcome> {
    let mut tx = db.transaction()?;
    let state = detect_state(&tx, schema)?;

    let outcome = match state {
        OpenState::Uninitialized => {
            create_all_tables(&tx, schema)?;
            if let Some(hook) = &config.on_create {
                hook.run(&tx)?;
            }
            OpenOutcome::Created
        }
        OpenState::Current => OpenOutcome::Opened,
        OpenState::Stale {
            on_disk_version,
            on_disk_hash,
        } => {
            let path = find_migration_path(&config.migrations, on_disk_version, schema.version);
            match path {
                Some(path) => {
                    apply_path(&mut tx, &path)?;
                    OpenOutcome::Migrated {
                        from: on_disk_version,
                        to: schema.version,
                        steps: path.len(),
                    }
                }
                None if config.fallback_to_destructive_migration => {
                    log::warn!(
                        "No migration path from version {} (hash {}) to {}; dropping all tables. \
                         Existing data is lost.",
                        on_disk_version,
                        on_disk_hash.as_deref().unwrap_or("none"),
                        schema.version
                    );
                    drop_all_tables(&tx, schema)?;
                    create_all_tables(&tx, schema)?;
                    OpenOutcome::Recreated {
                        from: on_disk_version,
                    }
                }
                None if on_disk_version == schema.version => {
                    let found = on_disk_hash.unwrap_or_default();
                    return Err(FinanceDbError::IdentityMismatch {
                        expected: schema.identity_hash(),
                        found,
                    });
                }
                None => {
                    return Err(FinanceDbError::MigrationRequired {
                        from: on_disk_version,
                        to: schema.version,
                    });
                }
            }
        }
    };

    validation::validate_schema(&tx, schema)?;
    system_db::write_identity_hash(&tx, &schema.identity_hash())?;
    system_db::set_user_version(&tx, schema.version)?;
    tx.commit()?;

    match &outcome {
        OpenOutcome::Created => log::info!("Created schema version {}", schema.version),
        OpenOutcome::Opened => log::debug!("Opened schema version {}", schema.version),
        OpenOutcome::Migrated { from, to, steps } => {
            log::info!("Migrated schema {from} -> {to} in {steps} step(s)")
        }
        OpenOutcome::Recreated { from } => {
            log::warn!("Recreated schema version {} over version {from}", schema.version)
        }
    }

    Ok(outcome)
}

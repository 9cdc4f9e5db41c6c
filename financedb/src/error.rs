use crate::validation::TableDiff;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinanceDbError {
    #[error("Schema error: {0}")]
    Schema(String),

    /// The live table disagrees with the declared schema. Fatal at open time.
    #[error("Schema validation failed for '{table}'.\n{diff}")]
    SchemaValidation { table: String, diff: TableDiff },

    #[error("Identity hash mismatch: expected {expected}, found {found}")]
    IdentityMismatch { expected: String, found: String },

    #[error("Migration {from} -> {to} failed: {reason}")]
    Migration { from: u32, to: u32, reason: String },

    #[error("No migration path from version {from} to {to} and destructive fallback is disabled")]
    MigrationRequired { from: u32, to: u32 },

    #[error("Unique constraint violation: {table} already has a row with id {id}")]
    UniqueViolation { table: &'static str, id: i64 },

    #[error("Invalid value '{value}' for enum {enum_name}")]
    InvalidEnum { enum_name: &'static str, value: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The caller stopped waiting for a point query and its statement was interrupted.
    #[error("Query cancelled")]
    Cancelled,

    #[error("Timestamp {0} ms is outside the representable date range")]
    InvalidTimestamp(i64),

    #[error("SQL parse error: {0}")]
    SqlParse(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl FinanceDbError {
    /// Whether this is an abort-on-conflict insert hitting an existing id.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, FinanceDbError::UniqueViolation { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FinanceDbError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, FinanceDbError>;

use crate::error::{FinanceDbError, Result};
use crate::schema::{ColumnDef, SchemaDefinition, TableDef};
use rusqlite::{params, Connection};
use std::fmt;

/// A column as described by either the declared schema or `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key_position: u32,
}

impl From<&ColumnDef> for ColumnInfo {
    fn from(def: &ColumnDef) -> Self {
        ColumnInfo {
            name: def.name.to_string(),
            sql_type: def.sql_type.as_sql().to_string(),
            not_null: def.not_null,
            primary_key_position: def.primary_key_position,
        }
    }
}

impl fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} notNull={} pk={}",
            self.name, self.sql_type, self.not_null, self.primary_key_position
        )
    }
}

/// Column-level differences between the expected and the live table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    pub missing: Vec<ColumnInfo>,
    pub unexpected: Vec<ColumnInfo>,
    /// (expected, found) pairs for columns present on both sides.
    pub changed: Vec<(ColumnInfo, ColumnInfo)>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.changed.is_empty()
    }

    pub fn missing_names(&self) -> Vec<&str> {
        self.missing.iter().map(|c| c.name.as_str()).collect()
    }
}

impl fmt::Display for TableDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for column in &self.missing {
            writeln!(f, " Missing: {column}")?;
        }
        for column in &self.unexpected {
            writeln!(f, " Unexpected: {column}")?;
        }
        for (expected, found) in &self.changed {
            writeln!(f, " Expected: {expected}")?;
            writeln!(f, " Found:    {found}")?;
        }
        Ok(())
    }
}

/// Read the live column list of `table`. Empty when the table does not exist.
pub fn read_table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")?;
    let mut rows = stmt.query(params![table])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let sql_type: String = row.get("type")?;
        columns.push(ColumnInfo {
            name: row.get("name")?,
            sql_type: sql_type.to_uppercase(),
            not_null: row.get::<_, i64>("notnull")? != 0,
            primary_key_position: row.get::<_, i64>("pk")? as u32,
        });
    }
    Ok(columns)
}

/// Compare a declared table against its live column list.
pub fn diff_table(expected: &TableDef, found: &[ColumnInfo]) -> TableDiff {
    let mut diff = TableDiff::default();

    for def in expected.columns {
        let want = ColumnInfo::from(def);
        match found.iter().find(|c| c.name == want.name) {
            None => diff.missing.push(want),
            Some(have) if *have != want => diff.changed.push((want, have.clone())),
            Some(_) => {}
        }
    }

    for have in found {
        if expected.column(&have.name).is_none() {
            diff.unexpected.push(have.clone());
        }
    }

    diff
}

pub fn validate_table(conn: &Connection, expected: &TableDef) -> Result<()> {
    let found = read_table_info(conn, expected.name)?;
    let diff = diff_table(expected, &found);
    if diff.is_empty() {
        Ok(())
    } else {
        Err(FinanceDbError::SchemaValidation {
            table: expected.name.to_string(),
            diff,
        })
    }
}

/// Check every declared table. Stops at the first mismatching table.
pub fn validate_schema(conn: &Connection, schema: &SchemaDefinition) -> Result<()> {
    for table in schema.tables {
        validate_table(conn, table)?;
    }
    Ok(())
}

use serde::Serialize;
use std::fmt;

/// SQL-level type tag of a column, as it appears in the DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Definition of a single column in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: ColumnType,
    pub not_null: bool,
    /// 1-based position inside the primary key, 0 when not part of it.
    pub primary_key_position: u32,
}

impl ColumnDef {
    /// The auto-assigned integer identity column.
    pub const fn id() -> Self {
        ColumnDef {
            name: "id",
            sql_type: ColumnType::Integer,
            not_null: true,
            primary_key_position: 1,
        }
    }

    pub const fn required(name: &'static str, sql_type: ColumnType) -> Self {
        ColumnDef {
            name,
            sql_type,
            not_null: true,
            primary_key_position: 0,
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key_position > 0
    }
}

/// Definition of a single table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableDef {
    pub name: &'static str,
    /// Column order is shared by the DDL, parameter binding and row extraction.
    pub columns: &'static [ColumnDef],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

/// The full declared schema: every table plus the monotonic version number.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchemaDefinition {
    pub version: u32,
    pub tables: &'static [&'static TableDef],
}

impl SchemaDefinition {
    pub fn table(&self, name: &str) -> Option<&'static TableDef> {
        self.tables.iter().copied().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }
}

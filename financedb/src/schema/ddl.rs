// SQL text generation. Every statement is derived from the declared column
// order, so the same schema always renders byte-identical SQL.

use super::types::{ColumnDef, SchemaDefinition, TableDef};
use sha2::{Digest, Sha256};

/// How an insert treats an existing row with the same primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Silently overwrite the existing row.
    Replace,
    /// Fail the statement and leave the existing row untouched.
    Abort,
}

impl ConflictPolicy {
    fn keyword(&self) -> &'static str {
        match self {
            ConflictPolicy::Replace => "REPLACE",
            ConflictPolicy::Abort => "ABORT",
        }
    }
}

fn column_ddl(column: &ColumnDef) -> String {
    let mut sql = format!("`{}` {}", column.name, column.sql_type);
    if column.is_primary_key() {
        sql.push_str(" PRIMARY KEY AUTOINCREMENT");
    }
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    sql
}

fn quoted_columns(table: &TableDef) -> String {
    table
        .column_names()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(",")
}

impl TableDef {
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(column_ddl).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS `{}` ({})",
            self.name,
            columns.join(", ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS `{}`", self.name)
    }

    /// Insert statement binding every column in declared order. An id of 0
    /// becomes NULL so the engine assigns a fresh identity.
    pub fn insert_sql(&self, policy: ConflictPolicy) -> String {
        let placeholders: Vec<&str> = self
            .columns
            .iter()
            .map(|c| if c.is_primary_key() { "nullif(?, 0)" } else { "?" })
            .collect();
        format!(
            "INSERT OR {} INTO `{}` ({}) VALUES ({})",
            policy.keyword(),
            self.name,
            quoted_columns(self),
            placeholders.join(",")
        )
    }

    /// Full-row replace by id. Binds all columns, then the id again for the WHERE clause.
    pub fn update_sql(&self) -> String {
        let assignments: Vec<String> = self
            .column_names()
            .map(|name| format!("`{name}` = ?"))
            .collect();
        format!(
            "UPDATE OR ABORT `{}` SET {} WHERE `id` = ?",
            self.name,
            assignments.join(",")
        )
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM `{}` WHERE `id` = ?", self.name)
    }

    pub fn select_by_id_sql(&self) -> String {
        format!("SELECT * FROM `{}` WHERE `id` = ?", self.name)
    }

    pub fn clear_sql(&self) -> String {
        format!("DELETE FROM `{}`", self.name)
    }
}

impl SchemaDefinition {
    /// CREATE statements for every table, in declaration order.
    pub fn create_statements(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.create_sql()).collect()
    }

    /// Content-derived fingerprint of the declared tables.
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in self.create_statements() {
            hasher.update(statement.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CREDIT_CARDS, ENTRIES, FINANCE_SCHEMA, SOLD_ITEMS};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_sql_entries() {
        assert_eq!(
            ENTRIES.create_sql(),
            "CREATE TABLE IF NOT EXISTS `entries` (`id` INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, \
             `name` TEXT NOT NULL, `amount` REAL NOT NULL, `type` TEXT NOT NULL, \
             `category` TEXT NOT NULL, `isAutoCalculated` INTEGER NOT NULL, \
             `excludedFromTotal` INTEGER NOT NULL, `orderIndex` INTEGER NOT NULL, \
             `dateTimestamp` INTEGER NOT NULL)"
        );
    }

    #[test]
    fn test_insert_sql_policies() {
        assert_eq!(
            CREDIT_CARDS.insert_sql(ConflictPolicy::Replace),
            "INSERT OR REPLACE INTO `credit_cards` (`id`,`holderName`,`cardNumber`,`expiryDate`,\
             `balance`,`cardType`,`colorTheme`) VALUES (nullif(?, 0),?,?,?,?,?,?)"
        );
        assert!(SOLD_ITEMS
            .insert_sql(ConflictPolicy::Abort)
            .starts_with("INSERT OR ABORT INTO `sold_items`"));
    }

    #[test]
    fn test_update_sql_binds_id_twice() {
        let sql = SOLD_ITEMS.update_sql();
        assert_eq!(
            sql,
            "UPDATE OR ABORT `sold_items` SET `id` = ?,`name` = ?,`profit` = ?,\
             `dateTimestamp` = ?,`month` = ?,`year` = ? WHERE `id` = ?"
        );
        assert_eq!(sql.matches('?').count(), SOLD_ITEMS.columns.len() + 1);
    }

    #[test]
    fn test_identity_hash_is_stable() {
        let h1 = FINANCE_SCHEMA.identity_hash();
        let h2 = FINANCE_SCHEMA.identity_hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_identity_hash_changes_with_columns() {
        static SHORT: TableDef = TableDef {
            name: "entries",
            columns: &[ColumnDef::id()],
        };
        static OTHER: SchemaDefinition = SchemaDefinition {
            version: 8,
            tables: &[&SHORT],
        };
        assert_ne!(OTHER.identity_hash(), FINANCE_SCHEMA.identity_hash());
    }
}

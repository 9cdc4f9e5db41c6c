//! Schema registry: the five finance tables, their columns, and the schema version.

mod ddl;
mod types;

pub use ddl::ConflictPolicy;
pub use types::{ColumnDef, ColumnType, SchemaDefinition, TableDef};

use types::ColumnType::{Integer, Real, Text};

/// Bump whenever a table definition below changes.
pub const SCHEMA_VERSION: u32 = 8;

pub const ENTRIES: TableDef = TableDef {
    name: "entries",
    columns: &[
        ColumnDef::id(),
        ColumnDef::required("name", Text),
        ColumnDef::required("amount", Real),
        ColumnDef::required("type", Text),
        ColumnDef::required("category", Text),
        ColumnDef::required("isAutoCalculated", Integer),
        ColumnDef::required("excludedFromTotal", Integer),
        ColumnDef::required("orderIndex", Integer),
        ColumnDef::required("dateTimestamp", Integer),
    ],
};

pub const SHOP_ITEMS: TableDef = TableDef {
    name: "shop_items",
    columns: &[
        ColumnDef::id(),
        ColumnDef::required("name", Text),
        ColumnDef::required("count", Integer),
        ColumnDef::required("pricePerUnit", Real),
        ColumnDef::required("purchasePrice", Real),
        ColumnDef::required("orderIndex", Integer),
        ColumnDef::required("category", Text),
    ],
};

pub const SOLD_ITEMS: TableDef = TableDef {
    name: "sold_items",
    columns: &[
        ColumnDef::id(),
        ColumnDef::required("name", Text),
        ColumnDef::required("profit", Real),
        ColumnDef::required("dateTimestamp", Integer),
        ColumnDef::required("month", Integer),
        ColumnDef::required("year", Integer),
    ],
};

pub const ENTRY_HISTORY: TableDef = TableDef {
    name: "entry_history",
    columns: &[
        ColumnDef::id(),
        ColumnDef::required("entryId", Integer),
        ColumnDef::required("oldAmount", Real),
        ColumnDef::required("newAmount", Real),
        ColumnDef::required("dateTimestamp", Integer),
    ],
};

pub const CREDIT_CARDS: TableDef = TableDef {
    name: "credit_cards",
    columns: &[
        ColumnDef::id(),
        ColumnDef::required("holderName", Text),
        ColumnDef::required("cardNumber", Text),
        ColumnDef::required("expiryDate", Text),
        ColumnDef::required("balance", Real),
        ColumnDef::required("cardType", Text),
        ColumnDef::required("colorTheme", Integer),
    ],
};

pub static FINANCE_SCHEMA: SchemaDefinition = SchemaDefinition {
    version: SCHEMA_VERSION,
    tables: &[&ENTRIES, &SHOP_ITEMS, &SOLD_ITEMS, &ENTRY_HISTORY, &CREDIT_CARDS],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_keys_on_id() {
        for table in FINANCE_SCHEMA.tables {
            let pk: Vec<_> = table.columns.iter().filter(|c| c.is_primary_key()).collect();
            assert_eq!(pk.len(), 1, "{} should have one key column", table.name);
            assert_eq!(pk[0].name, "id");
            assert_eq!(table.columns[0].name, "id");
            assert!(table.columns.iter().all(|c| c.not_null));
        }
    }

    #[test]
    fn test_table_lookup() {
        assert_eq!(FINANCE_SCHEMA.table("sold_items"), Some(&SOLD_ITEMS));
        assert!(FINANCE_SCHEMA.table("room_master_table").is_none());
        assert_eq!(
            FINANCE_SCHEMA.table_names(),
            vec!["entries", "shop_items", "sold_items", "entry_history", "credit_cards"]
        );
        assert_eq!(ENTRIES.column("type").map(|c| c.sql_type), Some(ColumnType::Text));
    }
}

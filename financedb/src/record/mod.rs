//! Record mapping: each entity binds its fields in the table's column order and
//! reads them back from a row by column name.

use crate::error::Result;
use crate::model::{CreditCard, EntryType, HistoryEntry, LedgerEntry, ShopItem, SoldItem};
use crate::schema::{
    ConflictPolicy, TableDef, CREDIT_CARDS, ENTRIES, ENTRY_HISTORY, SHOP_ITEMS, SOLD_ITEMS,
};
use rusqlite::types::Value;
use rusqlite::Row;

/// A typed row of one table.
pub trait Record: Sized + Send + 'static {
    /// Table this record is stored in.
    const TABLE: &'static TableDef;

    /// What an insert does when the id already exists.
    const ON_CONFLICT: ConflictPolicy;

    fn id(&self) -> i64;

    /// One value per column of `TABLE`, in declared order.
    fn to_values(&self) -> Vec<Value>;

    fn from_row(row: &Row<'_>) -> Result<Self>;
}

fn enum_value(t: EntryType) -> Value {
    Value::Text(t.as_str().to_string())
}

impl Record for LedgerEntry {
    const TABLE: &'static TableDef = &ENTRIES;
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Replace;

    fn id(&self) -> i64 {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.name.clone()),
            Value::Real(self.amount),
            enum_value(self.entry_type),
            Value::Text(self.category.clone()),
            Value::Integer(i64::from(self.is_auto_calculated)),
            Value::Integer(i64::from(self.excluded_from_total)),
            Value::Integer(i64::from(self.order_index)),
            Value::Integer(self.date_timestamp.millis()),
        ]
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        let entry_type: String = row.get("type")?;
        Ok(LedgerEntry {
            id: row.get("id")?,
            name: row.get("name")?,
            amount: row.get("amount")?,
            entry_type: entry_type.parse()?,
            category: row.get("category")?,
            is_auto_calculated: row.get::<_, i64>("isAutoCalculated")? != 0,
            excluded_from_total: row.get::<_, i64>("excludedFromTotal")? != 0,
            order_index: row.get("orderIndex")?,
            date_timestamp: row.get("dateTimestamp")?,
        })
    }
}

impl Record for ShopItem {
    const TABLE: &'static TableDef = &SHOP_ITEMS;
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Replace;

    fn id(&self) -> i64 {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.name.clone()),
            Value::Integer(i64::from(self.count)),
            Value::Real(self.price_per_unit),
            Value::Real(self.purchase_price),
            Value::Integer(i64::from(self.order_index)),
            Value::Text(self.category.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(ShopItem {
            id: row.get("id")?,
            name: row.get("name")?,
            count: row.get("count")?,
            price_per_unit: row.get("pricePerUnit")?,
            purchase_price: row.get("purchasePrice")?,
            order_index: row.get("orderIndex")?,
            category: row.get("category")?,
        })
    }
}

impl Record for SoldItem {
    const TABLE: &'static TableDef = &SOLD_ITEMS;
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Abort;

    fn id(&self) -> i64 {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.name.clone()),
            Value::Real(self.profit),
            Value::Integer(self.date_timestamp.millis()),
            Value::Integer(i64::from(self.month)),
            Value::Integer(i64::from(self.year)),
        ]
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(SoldItem {
            id: row.get("id")?,
            name: row.get("name")?,
            profit: row.get("profit")?,
            date_timestamp: row.get("dateTimestamp")?,
            month: row.get("month")?,
            year: row.get("year")?,
        })
    }
}

impl Record for HistoryEntry {
    const TABLE: &'static TableDef = &ENTRY_HISTORY;
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Abort;

    fn id(&self) -> i64 {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.entry_id),
            Value::Real(self.old_amount),
            Value::Real(self.new_amount),
            Value::Integer(self.date_timestamp.millis()),
        ]
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(HistoryEntry {
            id: row.get("id")?,
            entry_id: row.get("entryId")?,
            old_amount: row.get("oldAmount")?,
            new_amount: row.get("newAmount")?,
            date_timestamp: row.get("dateTimestamp")?,
        })
    }
}

impl Record for CreditCard {
    const TABLE: &'static TableDef = &CREDIT_CARDS;
    const ON_CONFLICT: ConflictPolicy = ConflictPolicy::Replace;

    fn id(&self) -> i64 {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Text(self.holder_name.clone()),
            Value::Text(self.card_number.clone()),
            Value::Text(self.expiry_date.clone()),
            Value::Real(self.balance),
            Value::Text(self.card_type.clone()),
            Value::Integer(i64::from(self.color_theme)),
        ]
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(CreditCard {
            id: row.get("id")?,
            holder_name: row.get("holderName")?,
            card_number: row.get("cardNumber")?,
            expiry_date: row.get("expiryDate")?,
            balance: row.get("balance")?,
            card_type: row.get("cardType")?,
            color_theme: row.get("colorTheme")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;
    use crate::schema::ColumnType;
    use rusqlite::Connection;

    fn assert_values_match_columns<R: Record>(record: &R) {
        let values = record.to_values();
        assert_eq!(values.len(), R::TABLE.columns.len(), "{}", R::TABLE.name);
        for (value, column) in values.iter().zip(R::TABLE.columns) {
            let ok = matches!(
                (value, column.sql_type),
                (Value::Integer(_), ColumnType::Integer)
                    | (Value::Real(_), ColumnType::Real)
                    | (Value::Text(_), ColumnType::Text)
            );
            assert!(ok, "{}.{} bound as {:?}", R::TABLE.name, column.name, value);
        }
    }

    #[test]
    fn test_bind_order_matches_columns() {
        assert_values_match_columns(&LedgerEntry::new("Car", 190.0, EntryType::Expense));
        assert_values_match_columns(&ShopItem::new("ps5", 1, 290.0, 0.0));
        assert_values_match_columns(&SoldItem::at("Sale", 5.0, Timestamp(0)).unwrap());
        assert_values_match_columns(&HistoryEntry::new(1, 10.0, 20.0));
        assert_values_match_columns(&CreditCard::default());
    }

    #[test]
    fn test_booleans_bind_as_integers() {
        let mut entry = LedgerEntry::new("Shop T Calculated", 0.0, EntryType::Income);
        entry.is_auto_calculated = true;
        let values = entry.to_values();
        assert_eq!(values[5], Value::Integer(1));
        assert_eq!(values[6], Value::Integer(0));
    }

    #[test]
    fn test_from_row_rejects_unknown_enum() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&ENTRIES.create_sql()).unwrap();
        conn.execute(
            "INSERT INTO entries (name, amount, type, category, isAutoCalculated, \
             excludedFromTotal, orderIndex, dateTimestamp) VALUES ('x', 1.0, 'SAVINGS', '', 0, 0, 0, 0)",
            [],
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT * FROM entries").unwrap();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        let err = LedgerEntry::from_row(row).unwrap_err();
        assert!(matches!(
            err,
            crate::error::FinanceDbError::InvalidEnum { ref value, .. } if value == "SAVINGS"
        ));
    }
}

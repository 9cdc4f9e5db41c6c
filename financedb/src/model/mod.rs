// In-memory record types. Field order mirrors the column order in `schema`.

use crate::error::{FinanceDbError, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch, stored as an INTEGER column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_millis())
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    /// Sub-millisecond precision is dropped.
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp_millis())
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Timestamp)
    }
}

/// Kind of ledger entry. Persisted by canonical upper-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    #[default]
    Income,
    Expense,
    Debt,
}

impl EntryType {
    pub const ALL: [EntryType; 3] = [EntryType::Income, EntryType::Expense, EntryType::Debt];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "INCOME",
            EntryType::Expense => "EXPENSE",
            EntryType::Debt => "DEBT",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = FinanceDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INCOME" => Ok(EntryType::Income),
            "EXPENSE" => Ok(EntryType::Expense),
            "DEBT" => Ok(EntryType::Debt),
            other => Err(FinanceDbError::InvalidEnum {
                enum_name: "EntryType",
                value: other.to_string(),
            }),
        }
    }
}

/// Primary transactional record (`entries` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// 0 asks the store to assign a new id on insert.
    pub id: i64,
    pub name: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub category: String,
    pub is_auto_calculated: bool,
    pub excluded_from_total: bool,
    pub order_index: i32,
    pub date_timestamp: Timestamp,
}

impl LedgerEntry {
    pub fn new(name: impl Into<String>, amount: f64, entry_type: EntryType) -> Self {
        LedgerEntry {
            id: 0,
            name: name.into(),
            amount,
            entry_type,
            category: String::new(),
            is_auto_calculated: false,
            excluded_from_total: false,
            order_index: 0,
            date_timestamp: Timestamp::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Inventory record (`shop_items` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: i64,
    pub name: String,
    pub count: i32,
    /// Selling price.
    pub price_per_unit: f64,
    /// Buying price.
    pub purchase_price: f64,
    pub order_index: i32,
    pub category: String,
}

impl ShopItem {
    pub fn new(name: impl Into<String>, count: i32, price_per_unit: f64, purchase_price: f64) -> Self {
        ShopItem {
            id: 0,
            name: name.into(),
            count,
            price_per_unit,
            purchase_price,
            order_index: 0,
            category: "General".to_string(),
        }
    }

    pub fn total(&self) -> f64 {
        f64::from(self.count) * self.price_per_unit
    }

    pub fn total_profit(&self) -> f64 {
        f64::from(self.count) * (self.price_per_unit - self.purchase_price)
    }
}

/// A completed sale (`sold_items` table). Month and year are denormalized for grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoldItem {
    pub id: i64,
    pub name: String,
    pub profit: f64,
    pub date_timestamp: Timestamp,
    /// 1-12
    pub month: i32,
    pub year: i32,
}

impl SoldItem {
    /// Build a sale at `timestamp`, deriving month and year in UTC.
    ///
    /// Fails with [`FinanceDbError::InvalidTimestamp`] when the timestamp has no
    /// calendar date.
    pub fn at(name: impl Into<String>, profit: f64, timestamp: Timestamp) -> Result<Self> {
        let dt = timestamp
            .to_datetime()
            .ok_or(FinanceDbError::InvalidTimestamp(timestamp.millis()))?;
        Ok(SoldItem {
            id: 0,
            name: name.into(),
            profit,
            date_timestamp: timestamp,
            month: dt.month() as i32,
            year: dt.year(),
        })
    }
}

/// Audit row for an amount change (`entry_history` table).
///
/// `entry_id` is advisory: nothing ties it to an existing ledger entry, and
/// deleting the entry leaves its history in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub entry_id: i64,
    pub old_amount: f64,
    pub new_amount: f64,
    pub date_timestamp: Timestamp,
}

impl HistoryEntry {
    pub fn new(entry_id: i64, old_amount: f64, new_amount: f64) -> Self {
        HistoryEntry {
            id: 0,
            entry_id,
            old_amount,
            new_amount,
            date_timestamp: Timestamp::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: i64,
    pub holder_name: String,
    /// Usually only the last four digits.
    pub card_number: String,
    pub expiry_date: String,
    pub balance: f64,
    pub card_type: String,
    pub color_theme: i32,
}

impl Default for CreditCard {
    fn default() -> Self {
        CreditCard {
            id: 0,
            holder_name: String::new(),
            card_number: String::new(),
            expiry_date: String::new(),
            balance: 0.0,
            card_type: "VISA".to_string(),
            color_theme: 0,
        }
    }
}

/// One row of the monthly profit aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyProfit {
    pub year: i32,
    pub month: i32,
    pub profit: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trip_names() {
        for t in EntryType::ALL {
            assert_eq!(t.as_str().parse::<EntryType>().unwrap(), t);
        }
    }

    #[test]
    fn test_entry_type_rejects_unknown() {
        let err = "Income".parse::<EntryType>().unwrap_err();
        match err {
            FinanceDbError::InvalidEnum { enum_name, value } => {
                assert_eq!(enum_name, "EntryType");
                assert_eq!(value, "Income");
            }
            other => panic!("Expected InvalidEnum, got {other:?}"),
        }
    }

    #[test]
    fn test_sold_item_derives_month_and_year() {
        let ts = Timestamp::from(Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap());
        let item = SoldItem::at("Legacy Sale", 330.0, ts).unwrap();
        assert_eq!(item.month, 12);
        assert_eq!(item.year, 2024);
        assert_eq!(item.date_timestamp, ts);
    }

    #[test]
    fn test_sold_item_rejects_unrepresentable_timestamp() {
        let err = SoldItem::at("Far Future", 1.0, Timestamp(i64::MAX)).unwrap_err();
        assert!(matches!(err, FinanceDbError::InvalidTimestamp(i64::MAX)));
    }

    #[test]
    fn test_shop_item_totals() {
        let item = ShopItem::new("xc", 3, 60.0, 45.0);
        assert_eq!(item.total(), 180.0);
        assert_eq!(item.total_profit(), 45.0);
        assert_eq!(item.category, "General");
    }

    #[test]
    fn test_timestamp_datetime_conversion() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.to_datetime(), Some(dt));
    }
}

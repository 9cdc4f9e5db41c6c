pub mod config;
pub mod dao;
pub mod error;
pub mod migration;
pub mod model;
pub mod record;
pub mod schema;
pub mod store;
pub mod system_db;
pub mod validation;
pub mod view;
pub mod watcher;

pub use config::{CreateHook, DbLocation, StoreConfig};
pub use dao::{FinanceDao, LiveQuery};
pub use error::{FinanceDbError, Result};
pub use migration::{Migration, OpenOutcome};
pub use model::{
    CreditCard, EntryType, HistoryEntry, LedgerEntry, MonthlyProfit, ShopItem, SoldItem, Timestamp,
};
pub use record::Record;
pub use schema::{SchemaDefinition, FINANCE_SCHEMA, SCHEMA_VERSION};
pub use store::Store;

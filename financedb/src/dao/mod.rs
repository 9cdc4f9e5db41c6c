//! Asynchronous data access.
//!
//! Every operation runs on tokio's blocking pool, so callers on an async
//! executor are suspended instead of blocked. Reactive queries are exposed as
//! [`LiveQuery`] streams: an initial result, then a fresh result after every
//! committed write to a table the query reads.

use crate::error::{FinanceDbError, Result};
use crate::model::{CreditCard, HistoryEntry, LedgerEntry, MonthlyProfit, ShopItem, SoldItem};
use crate::record::Record;
use crate::store::{self, PointCall, Store};
use crate::view::{self, QueryDef};
use futures::Stream;
use rusqlite::Connection;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Compute<T> = dyn Fn(&Store) -> Result<T> + Send + Sync;

/// Async handle over a shared [`Store`]. Cheap to clone.
#[derive(Clone)]
pub struct FinanceDao {
    store: Arc<Store>,
}

impl FinanceDao {
    pub fn new(store: Store) -> Self {
        FinanceDao {
            store: Arc::new(store),
        }
    }

    pub fn from_shared(store: Arc<Store>) -> Self {
        FinanceDao { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Run a read whose statement is interrupted if this future is dropped
    /// before it completes.
    async fn point<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let (call, guard) = PointCall::start();
        let result = tokio::task::spawn_blocking(move || store.read_for(&call, f)).await;
        guard.disarm();
        result?
    }

    pub async fn insert<R: Record>(&self, record: R) -> Result<i64> {
        self.run(move |store| store.insert(&record)).await
    }

    pub async fn update<R: Record>(&self, record: R) -> Result<usize> {
        self.run(move |store| store.update(&record)).await
    }

    pub async fn delete<R: Record>(&self, record: R) -> Result<usize> {
        self.run(move |store| store.delete(&record)).await
    }

    pub async fn get<R: Record>(&self, id: i64) -> Result<Option<R>> {
        self.point(move |conn| store::fetch_by_id::<R>(conn, id)).await
    }

    pub async fn entry_by_name(&self, name: impl Into<String>) -> Result<Option<LedgerEntry>> {
        let name = name.into();
        self.point(move |conn| store::fetch_entry_by_name(conn, &name)).await
    }

    pub async fn entry_count(&self) -> Result<i64> {
        self.point(store::count_entries).await
    }

    pub async fn clear_all_tables(&self) -> Result<()> {
        self.run(|store| store.clear_all_tables()).await
    }

    pub fn observe_entries(&self) -> Result<LiveQuery<Vec<LedgerEntry>>> {
        self.observe(&view::ALL_ENTRIES, |store| store.all_entries())
    }

    pub fn observe_shop_items(&self) -> Result<LiveQuery<Vec<ShopItem>>> {
        self.observe(&view::ALL_SHOP_ITEMS, |store| store.all_shop_items())
    }

    pub fn observe_shop_total(&self) -> Result<LiveQuery<Option<f64>>> {
        self.observe(&view::SHOP_TOTAL, |store| store.shop_total())
    }

    pub fn observe_sold_items(&self) -> Result<LiveQuery<Vec<SoldItem>>> {
        self.observe(&view::ALL_SOLD_ITEMS, |store| store.all_sold_items())
    }

    pub fn observe_monthly_profits(&self) -> Result<LiveQuery<Vec<MonthlyProfit>>> {
        self.observe(&view::MONTHLY_PROFITS, |store| store.monthly_profits())
    }

    pub fn observe_history(&self, entry_id: i64) -> Result<LiveQuery<Vec<HistoryEntry>>> {
        self.observe(&view::HISTORY_FOR_ENTRY, move |store| store.history_for_entry(entry_id))
    }

    pub fn observe_credit_cards(&self) -> Result<LiveQuery<Vec<CreditCard>>> {
        self.observe(&view::ALL_CREDIT_CARDS, |store| store.all_credit_cards())
    }

    /// Observe `compute`, re-running it whenever a table read by `def` changes.
    ///
    /// Must be called from within a tokio runtime. The observer is registered
    /// before the initial read, so no write committed after this call is missed.
    pub fn observe<T, F>(&self, def: &QueryDef, compute: F) -> Result<LiveQuery<T>>
    where
        T: Send + 'static,
        F: Fn(&Store) -> Result<T> + Send + Sync + 'static,
    {
        let handle = Handle::try_current().map_err(|e| FinanceDbError::Other(e.to_string()))?;
        let tables = self
            .store
            .catalog()
            .tables_for(def.name)
            .cloned()
            .ok_or_else(|| FinanceDbError::Other(format!("Unknown query '{}'", def.name)))?;

        let (registration, mut changes) = self.store.tracker().register(tables);
        let (tx, rx) = mpsc::channel(1);
        let store = Arc::clone(&self.store);
        let compute: Arc<Compute<T>> = Arc::new(compute);
        let debounce = store.config().invalidation_debounce;
        let name = def.name;

        let task = handle.spawn(async move {
            let _registration = registration;
            loop {
                let s = Arc::clone(&store);
                let f = Arc::clone(&compute);
                let result = match tokio::task::spawn_blocking(move || f(s.as_ref())).await {
                    Ok(result) => result,
                    Err(e) => Err(e.into()),
                };

                let failed = result.is_err();
                if let Err(e) = &result {
                    log::warn!("Live query '{name}' failed: {e}");
                }
                if tx.send(result).await.is_err() || failed {
                    break;
                }

                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
                if !debounce.is_zero() {
                    tokio::time::sleep(debounce).await;
                    // Writes during the quiet period are covered by the next run.
                    let _ = changes.borrow_and_update();
                }
                log::debug!("Recomputing live query '{name}'");
            }
        });

        Ok(LiveQuery { name, rx, task })
    }
}

/// A reactive query result stream.
///
/// Yields the initial result and then one result per batch of relevant writes.
/// Bursts of writes may be folded into a single result reflecting the latest
/// state; results are never reordered. A failed recomputation is yielded as an
/// error and ends the stream. Dropping the stream unregisters its observer.
pub struct LiveQuery<T> {
    name: &'static str,
    rx: mpsc::Receiver<Result<T>>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Stream for LiveQuery<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::model::{EntryType, Timestamp};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::timeout;

    const QUIET: Duration = Duration::from_millis(150);

    fn setup_dao() -> FinanceDao {
        FinanceDao::new(Store::open_in_memory().unwrap())
    }

    async fn next<T>(live: &mut LiveQuery<T>) -> T {
        timeout(Duration::from_secs(5), live.next())
            .await
            .expect("timed out waiting for a result")
            .expect("stream ended")
            .unwrap()
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let dao = setup_dao();
        let id = dao.insert(LedgerEntry::new("Car", 190.0, EntryType::Expense)).await.unwrap();

        let mut entry: LedgerEntry = dao.get(id).await.unwrap().unwrap();
        assert_eq!(entry.name, "Car");
        entry.amount = 200.0;
        assert_eq!(dao.update(entry.clone()).await.unwrap(), 1);
        assert_eq!(dao.entry_by_name("Car").await.unwrap(), Some(entry.clone()));

        assert_eq!(dao.delete(entry).await.unwrap(), 1);
        assert_eq!(dao.entry_count().await.unwrap(), 0);
        assert!(dao.entry_by_name("Car").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abort_conflict_surfaces_to_caller() {
        let dao = setup_dao();
        let mut item = SoldItem::at("ps5", 40.0, Timestamp(0)).unwrap();
        item.id = 1;
        dao.insert(item.clone()).await.unwrap();
        let err = dao.insert(item).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_live_query_emits_once_per_insert() {
        let dao = setup_dao();
        let mut live = dao.observe_entries().unwrap();
        assert!(next(&mut live).await.is_empty());

        dao.insert(LedgerEntry::new("Sparkasse", 1634.0, EntryType::Income)).await.unwrap();
        let entries = next(&mut live).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Sparkasse");

        assert!(timeout(QUIET, live.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_unrelated_table_does_not_emit() {
        let dao = setup_dao();
        let mut live = dao.observe_entries().unwrap();
        next(&mut live).await;

        dao.insert(CreditCard::default()).await.unwrap();
        assert!(timeout(QUIET, live.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_aggregates_follow_writes() {
        let dao = setup_dao();
        let mut total = dao.observe_shop_total().unwrap();
        let mut profits = dao.observe_monthly_profits().unwrap();
        assert_eq!(next(&mut total).await, None);
        assert!(next(&mut profits).await.is_empty());

        dao.insert(ShopItem::new("a", 2, 5.0, 3.0)).await.unwrap();
        assert_eq!(next(&mut total).await, Some(6.0));

        dao.insert(SoldItem::at("a", 4.0, Timestamp(1_706_745_600_000)).unwrap()).await.unwrap();
        assert_eq!(
            next(&mut profits).await,
            vec![MonthlyProfit { year: 2024, month: 2, profit: 4.0 }]
        );
    }

    #[tokio::test]
    async fn test_history_query_is_per_table() {
        let dao = setup_dao();
        let mut live = dao.observe_history(1).unwrap();
        assert!(next(&mut live).await.is_empty());

        dao.insert(HistoryEntry::new(2, 1.0, 2.0)).await.unwrap();
        // Any write to the table triggers a rerun, even for another entry.
        assert!(next(&mut live).await.is_empty());

        dao.insert(HistoryEntry::new(1, 1.0, 2.0)).await.unwrap();
        assert_eq!(next(&mut live).await.len(), 1);
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let store = Store::open(StoreConfig::memory().invalidation_debounce(Duration::from_millis(200)))
            .unwrap();
        let dao = FinanceDao::new(store);
        let mut live = dao.observe_shop_items().unwrap();
        next(&mut live).await;

        for i in 0..5 {
            dao.store().insert(&ShopItem::new(format!("item {i}"), 1, 1.0, 1.0)).unwrap();
        }

        assert_eq!(next(&mut live).await.len(), 5);
        assert!(timeout(QUIET, live.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_wipe_reaches_every_observer() {
        let dao = setup_dao();
        dao.insert(CreditCard::default()).await.unwrap();
        let mut cards = dao.observe_credit_cards().unwrap();
        let mut sold = dao.observe_sold_items().unwrap();
        assert_eq!(next(&mut cards).await.len(), 1);
        next(&mut sold).await;

        dao.clear_all_tables().await.unwrap();
        assert!(next(&mut cards).await.is_empty());
        assert!(next(&mut sold).await.is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_registration() {
        let dao = setup_dao();
        let mut live = dao.observe_entries().unwrap();
        next(&mut live).await;
        assert_eq!(dao.store().tracker().observer_count(), 1);

        drop(live);
        timeout(Duration::from_secs(5), async {
            while dao.store().tracker().observer_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_recompute_ends_stream() {
        let dao = setup_dao();
        let mut live = dao
            .observe(&view::ALL_ENTRIES, |_| -> Result<()> {
                Err(FinanceDbError::Other("boom".into()))
            })
            .unwrap();

        let first = live.next().await.unwrap();
        assert!(matches!(first, Err(FinanceDbError::Other(ref m)) if m == "boom"));
        assert!(live.next().await.is_none());
        assert_eq!(live.name(), "all_entries");
    }

    #[tokio::test]
    async fn test_dropped_point_query_releases_connection() {
        let dao = setup_dao();
        dao.insert(LedgerEntry::new("Sparkasse", 1634.0, EntryType::Income)).await.unwrap();

        // Never finishes on its own.
        let endless = dao.point(|conn| {
            let n: i64 = conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        });
        assert!(timeout(Duration::from_millis(100), endless).await.is_err());

        let count = timeout(Duration::from_secs(2), dao.entry_count())
            .await
            .expect("connection still held by the abandoned query");
        assert_eq!(count.unwrap(), 1);
    }

    #[test]
    fn test_observe_outside_runtime_is_an_error() {
        let dao = setup_dao();
        assert!(dao.observe_entries().is_err());
    }
}

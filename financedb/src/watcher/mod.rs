use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

/// One active reactive query: the tables it reads and its invalidation signal.
struct Observer {
    tables: HashSet<String>,
    /// Generation counter. Receivers only see the latest value, so a burst of
    /// bumps is observed as a single change.
    signal: watch::Sender<u64>,
}

/// Table-level invalidation registry.
///
/// Reactive queries register the tables they read. After every committed write
/// the store calls [`InvalidationTracker::notify_tables`] and every observer
/// reading one of those tables is marked dirty.
#[derive(Default)]
pub struct InvalidationTracker {
    observers: Mutex<HashMap<u64, Observer>>,
    next_id: AtomicU64,
}

/// Keeps an observer registered. Dropping it unregisters.
pub struct Registration {
    id: u64,
    tracker: Weak<InvalidationTracker>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unregister(self.id);
        }
    }
}

impl InvalidationTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an observer for `tables`.
    ///
    /// The returned receiver reports a change every time one of the tables is
    /// written after this call.
    pub fn register<I, S>(self: &Arc<Self>, tables: I) -> (Registration, watch::Receiver<u64>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (signal, receiver) = watch::channel(0u64);
        let observer = Observer {
            tables: tables.into_iter().map(Into::into).collect(),
            signal,
        };

        log::debug!("Registering observer {id} on {:?}", observer.tables);
        self.lock().insert(id, observer);

        let registration = Registration {
            id,
            tracker: Arc::downgrade(self),
        };
        (registration, receiver)
    }

    fn unregister(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            log::debug!("Unregistered observer {id}");
        }
    }

    /// Mark every observer reading any of `tables` as invalidated.
    /// Returns the number of observers signalled.
    pub fn notify_tables(&self, tables: &[&str]) -> usize {
        if tables.is_empty() {
            return 0;
        }
        let observers = self.lock();
        let mut signalled = 0;
        for (id, observer) in observers.iter() {
            if tables.iter().any(|t| observer.tables.contains(*t)) {
                observer.signal.send_modify(|generation| *generation += 1);
                log::debug!("Invalidated observer {id} for {tables:?}");
                signalled += 1;
            }
        }
        signalled
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Observer>> {
        // No holder leaves the map half-updated, so a poisoned lock is still usable.
        self.observers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_matching_observers_only() {
        let tracker = InvalidationTracker::new();
        let (_entries, mut entries_rx) = tracker.register(["entries"]);
        let (_sold, mut sold_rx) = tracker.register(["sold_items"]);

        assert_eq!(tracker.notify_tables(&["entries"]), 1);
        assert!(entries_rx.has_changed().unwrap());
        assert!(!sold_rx.has_changed().unwrap());

        assert_eq!(*entries_rx.borrow_and_update(), 1);
        assert!(!entries_rx.has_changed().unwrap());
        assert_eq!(*sold_rx.borrow_and_update(), 0);
    }

    #[test]
    fn test_burst_is_coalesced() {
        let tracker = InvalidationTracker::new();
        let (_reg, mut rx) = tracker.register(["shop_items"]);

        for _ in 0..5 {
            tracker.notify_tables(&["shop_items"]);
        }
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 5);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_drop_unregisters() {
        let tracker = InvalidationTracker::new();
        let (reg, rx) = tracker.register(["credit_cards", "entries"]);
        assert_eq!(tracker.observer_count(), 1);

        drop(reg);
        assert_eq!(tracker.observer_count(), 0);
        assert_eq!(tracker.notify_tables(&["entries"]), 0);
        // Sender is gone with the observer.
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn test_registration_outliving_tracker() {
        let tracker = InvalidationTracker::new();
        let (reg, _rx) = tracker.register(["entries"]);
        drop(tracker);
        drop(reg);
    }
}

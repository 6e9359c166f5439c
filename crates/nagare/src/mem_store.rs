use crate::{
    counter::Counter,
    event::{EidSelect, Event, Stream},
    persist::PersistenceError,
    store::{AppendTransaction, CounterStore, EventPersister, EventReader, Transactor},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Memory-based event store for testing and development.
///
/// Row locks are one async mutex per counter row, held by the open
/// transaction, so same-channel appends serialize exactly as they do against
/// a relational backend while other channels proceed independently.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    id_seq: AtomicI64,
    counters: RwLock<HashMap<String, Counter>>,
    events: RwLock<Vec<Event>>,
    row_locks: RwLock<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id_seq: AtomicI64::new(1),
                counters: RwLock::new(HashMap::new()),
                events: RwLock::new(Vec::new()),
                row_locks: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn next_row_id(&self) -> i64 {
        self.id_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn row_lock(&self, id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.row_locks.write().unwrap();
        locks.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn has_event(&self, channel: &str, eid: i64) -> bool {
        let events = self.events.read().unwrap();
        events.iter().any(|row| row.channel == channel && row.eid == eid)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn find_counter(&self, name: &str) -> Result<Option<Counter>, PersistenceError> {
        let counters = self.inner.counters.read().unwrap();
        Ok(counters.get(name).cloned())
    }

    async fn create_counter(&self, name: &str) -> Result<Counter, PersistenceError> {
        let mut counters = self.inner.counters.write().unwrap();
        if counters.contains_key(name) {
            return Err(PersistenceError::CounterExists);
        }
        let counter = Counter {
            id: self.inner.next_row_id(),
            name: name.to_string(),
            value: 0,
            updated: Utc::now(),
        };
        counters.insert(name.to_string(), counter.clone());
        Ok(counter)
    }
}

#[async_trait]
impl Transactor for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, PersistenceError> {
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            guard: None,
            staged_events: Vec::new(),
            staged_counter: None,
        })
    }
}

/// A staged write set applied on commit. Dropping without commit discards
/// the staged rows and releases the row lock.
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    guard: Option<OwnedMutexGuard<()>>,
    staged_events: Vec<Event>,
    staged_counter: Option<Counter>,
}

#[async_trait]
impl AppendTransaction for MemoryTransaction {
    async fn lock_counter(&mut self, id: i64) -> Result<Counter, PersistenceError> {
        let lock = self.inner.row_lock(id);
        self.guard = Some(lock.lock_owned().await);
        let counters = self.inner.counters.read().unwrap();
        counters
            .values()
            .find(|counter| counter.id == id)
            .cloned()
            .ok_or_else(|| PersistenceError::unknown(format!("no counter with id {id}")))
    }

    async fn insert_event(&mut self, event: &mut Event) -> Result<(), PersistenceError> {
        let staged_conflict = self
            .staged_events
            .iter()
            .any(|row| row.channel == event.channel && row.eid == event.eid);
        if staged_conflict || self.inner.has_event(&event.channel, event.eid) {
            return Err(PersistenceError::DuplicateEvent {
                channel: event.channel.clone(),
                eid: event.eid,
            });
        }
        event.id = self.inner.next_row_id();
        event.created = Utc::now();
        self.staged_events.push(event.clone());
        Ok(())
    }

    async fn update_counter(&mut self, counter: &Counter) -> Result<(), PersistenceError> {
        self.staged_counter = Some(counter.clone());
        Ok(())
    }

    async fn commit(self) -> Result<(), PersistenceError> {
        {
            let mut events = self.inner.events.write().unwrap();
            events.extend(self.staged_events);
        }
        if let Some(counter) = self.staged_counter {
            let mut counters = self.inner.counters.write().unwrap();
            counters.insert(counter.name.clone(), counter);
        }
        // The row-lock guard drops here, after the staged writes land.
        Ok(())
    }

    async fn rollback(self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[async_trait]
impl EventPersister for MemoryStore {
    async fn save_event(&self, event: &mut Event) -> Result<(), PersistenceError> {
        let mut events = self.inner.events.write().unwrap();
        if event.id != 0 {
            match events.iter_mut().find(|row| row.id == event.id) {
                Some(row) => {
                    *row = event.clone();
                    Ok(())
                }
                None => Err(PersistenceError::unknown(format!("no event with id {}", event.id))),
            }
        } else {
            let conflict = events
                .iter()
                .any(|row| row.channel == event.channel && row.eid == event.eid);
            if conflict {
                return Err(PersistenceError::DuplicateEvent {
                    channel: event.channel.clone(),
                    eid: event.eid,
                });
            }
            event.id = self.inner.next_row_id();
            event.created = Utc::now();
            events.push(event.clone());
            Ok(())
        }
    }
}

impl EventReader for MemoryStore {
    fn stream_events(&self, channel: &str, select: EidSelect) -> Stream<'_, Event, PersistenceError> {
        let events = self.inner.events.read().unwrap();
        let mut rows: Vec<Event> = events
            .iter()
            .filter(|row| row.channel == channel)
            .filter(|row| match select {
                EidSelect::All => true,
                EidSelect::From(eid) => row.eid >= eid,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.eid);
        Box::pin(stream::iter(rows.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_counter_rejects_duplicates() {
        let store = MemoryStore::new();

        let counter = store.create_counter("chan").await.unwrap();
        assert_eq!(counter.value, 0);
        assert_ne!(counter.id, 0);

        let err = store.create_counter("chan").await.unwrap_err();
        assert!(matches!(err, PersistenceError::CounterExists));
    }

    #[tokio::test]
    async fn test_counter_for_falls_back_to_lookup() {
        let store = MemoryStore::new();

        let created = store.counter_for("chan").await.unwrap();
        let fetched = store.counter_for("chan").await.unwrap();
        assert_eq!(created.id, fetched.id);
    }

    #[tokio::test]
    async fn test_insert_event_enforces_channel_eid_uniqueness() {
        let store = MemoryStore::new();
        store.create_counter("chan").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut first = Event::draft("chan", "a", "1");
        first.eid = 1;
        tx.insert_event(&mut first).await.unwrap();
        let mut second = Event::draft("chan", "b", "2");
        second.eid = 1;
        let err = tx.insert_event(&mut second).await.unwrap_err();
        assert!(matches!(err, PersistenceError::DuplicateEvent { eid: 1, .. }));
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        let counter = store.create_counter("chan").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_counter(counter.id).await.unwrap();
        let mut event = Event::draft("chan", "a", "1");
        event.eid = 1;
        tx.insert_event(&mut event).await.unwrap();
        tx.rollback().await.unwrap();

        let rows: Vec<_> = store.stream_events("chan", EidSelect::All).collect().await;
        assert!(rows.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_counter_blocks_second_locker() {
        let store = MemoryStore::new();
        let counter = store.create_counter("chan").await.unwrap();

        let mut tx1 = store.begin().await.unwrap();
        tx1.lock_counter(counter.id).await.unwrap();

        let store2 = store.clone();
        let id = counter.id;
        let waiter = tokio::spawn(async move {
            let mut tx2 = store2.begin().await.unwrap();
            tx2.lock_counter(id).await.unwrap();
            tx2.commit().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        tx1.commit().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second locker should proceed after commit")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stream_events_orders_and_filters() {
        let store = MemoryStore::new();
        store.create_counter("chan").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        for eid in [2, 0, 1] {
            let mut event = Event::draft("chan", "t", "d");
            event.eid = eid;
            tx.insert_event(&mut event).await.unwrap();
        }
        tx.commit().await.unwrap();

        let all: Vec<_> = store
            .stream_events("chan", EidSelect::All)
            .map(|row| row.unwrap().eid)
            .collect()
            .await;
        assert_eq!(all, vec![0, 1, 2]);

        let tail: Vec<_> = store
            .stream_events("chan", EidSelect::From(1))
            .map(|row| row.unwrap().eid)
            .collect()
            .await;
        assert_eq!(tail, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_save_event_updates_in_place() {
        let store = MemoryStore::new();

        let mut event = Event::draft("chan", "t", "before");
        event.eid = 1;
        store.save_event(&mut event).await.unwrap();
        assert_ne!(event.id, 0);

        event.data = "after".to_string();
        store.save_event(&mut event).await.unwrap();

        let rows: Vec<_> = store
            .stream_events("chan", EidSelect::All)
            .map(|row| row.unwrap())
            .collect()
            .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, "after");
    }
}

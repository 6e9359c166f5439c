use crate::{
    counter::Counter,
    event::{EidSelect, Event, Stream},
    persist::PersistenceError,
};
use async_trait::async_trait;

/// Trait that defines the capabilities of an event store backend.
pub trait EventStore:
    CounterStore + Transactor + EventPersister + EventReader + Send + Sync + 'static
{
}

/// A marker trait for types that can be used as an event store.
impl<T> EventStore for T where
    T: CounterStore + Transactor + EventPersister + EventReader + Send + Sync + 'static
{
}

/// Durable mapping from channel name to its counter row.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Fetch the counter named `name`, if any.
    async fn find_counter(&self, name: &str) -> Result<Option<Counter>, PersistenceError>;

    /// Insert a fresh counter with value 0.
    ///
    /// Returns [`PersistenceError::CounterExists`] when another writer
    /// created the row first; callers fall back to a lookup.
    async fn create_counter(&self, name: &str) -> Result<Counter, PersistenceError>;

    /// Fetch the counter for `name`, creating it if absent.
    ///
    /// Guarantees only that a row exists; it reserves no sequence value.
    /// Concurrent callers for the same never-seen name converge on the same
    /// underlying row.
    async fn counter_for(&self, name: &str) -> Result<Counter, PersistenceError> {
        if let Some(counter) = self.find_counter(name).await? {
            return Ok(counter);
        }
        match self.create_counter(name).await {
            Ok(counter) => Ok(counter),
            // Lost the creation race; the row is there now.
            Err(PersistenceError::CounterExists) => match self.find_counter(name).await? {
                Some(counter) => Ok(counter),
                None => Err(PersistenceError::unknown(format!(
                    "counter {name} missing after duplicate-creation race"
                ))),
            },
            Err(err) => Err(err),
        }
    }
}

/// Opens the scoped transaction an append runs inside.
#[async_trait]
pub trait Transactor: Send + Sync + 'static {
    type Tx: AppendTransaction;

    async fn begin(&self) -> Result<Self::Tx, PersistenceError>;
}

/// One append's transaction scope.
///
/// The counter lock taken by [`lock_counter`](Self::lock_counter) is held
/// until the transaction commits, rolls back, or is dropped; a drop without
/// commit must discard every staged write.
#[async_trait]
pub trait AppendTransaction: Send {
    /// Re-fetch a counter row under a pessimistic lock, blocking other
    /// lockers of the same row until this transaction ends. Other rows stay
    /// unaffected.
    async fn lock_counter(&mut self, id: i64) -> Result<Counter, PersistenceError>;

    /// Insert an event row, filling its store identity and creation time.
    async fn insert_event(&mut self, event: &mut Event) -> Result<(), PersistenceError>;

    /// Write back the counter's value.
    async fn update_counter(&mut self, counter: &Counter) -> Result<(), PersistenceError>;

    async fn commit(self) -> Result<(), PersistenceError>;

    async fn rollback(self) -> Result<(), PersistenceError>;
}

/// Non-allocating event writes, used by the re-save path.
#[async_trait]
pub trait EventPersister: Send + Sync + 'static {
    /// Persist an event that already carries its eid. Updates in place when
    /// the row identity is known, inserts otherwise. Counters are untouched.
    async fn save_event(&self, event: &mut Event) -> Result<(), PersistenceError>;
}

/// Read access to a channel's history.
pub trait EventReader: Send + Sync + 'static {
    /// Events for `channel` ordered by ascending eid.
    fn stream_events(&self, channel: &str, select: EidSelect) -> Stream<'_, Event, PersistenceError>;
}

use crate::{
    counter::Counter,
    event::Event,
    persist::PersistenceError,
    sequence_number::SequenceNumber,
    store::{AppendTransaction, CounterStore, EventStore, Transactor},
};
use chrono::Utc;
use tracing::{debug, warn};

/// Assigns the next per-channel sequence number to new events and persists
/// event and counter atomically with respect to other appenders on the same
/// channel.
///
/// The store handed to [`new`](Self::new) selects the backing instance for
/// every operation; nothing is read from ambient configuration.
#[derive(Debug, Clone)]
pub struct EventAppender<S> {
    store: S,
}

impl<S> EventAppender<S>
where
    S: EventStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append an event to `channel`, assigning it the next eid.
    pub async fn append(
        &self,
        channel: &str,
        event_type: &str,
        data: &str,
    ) -> Result<Event, PersistenceError> {
        let mut event = Event::draft(channel, event_type, data);
        self.save(&mut event).await?;
        Ok(event)
    }

    /// Persist `event`, allocating its eid when it does not carry one.
    ///
    /// Re-saves (non-zero eid) bypass allocation entirely and never touch
    /// the channel's counter. For drafts, the placeholder insert, the event
    /// insert, and the counter write-back happen inside one transaction
    /// holding the counter's row lock: either all of them are visible
    /// afterwards, or none.
    pub async fn save(&self, event: &mut Event) -> Result<(), PersistenceError> {
        if event.eid != 0 {
            return self.store.save_event(event).await;
        }

        let counter = self.store.counter_for(&event.channel).await?;
        let mut tx = self.store.begin().await?;
        match Self::allocate(&mut tx, counter, event).await {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        channel = %event.channel,
                        error = %rollback_err,
                        "rollback failed after append error"
                    );
                }
                Err(err)
            }
        }
    }

    /// The last eid issued for `channel`, 0 when nothing was ever appended.
    pub async fn current_eid(&self, channel: &str) -> Result<SequenceNumber, PersistenceError> {
        Ok(self
            .store
            .find_counter(channel)
            .await?
            .map(|counter| counter.value)
            .unwrap_or(0))
    }

    async fn allocate(
        tx: &mut S::Tx,
        counter: Counter,
        event: &mut Event,
    ) -> Result<(), PersistenceError> {
        // Serializes against other in-flight appends on this channel;
        // appends on other channels lock other rows and proceed unaffected.
        let mut counter = tx.lock_counter(counter.id).await?;

        if counter.value == 0 {
            // First real append to this channel: insert the placeholder so
            // range queries can anchor at eid 0. The lock is held, so no
            // other appender can slip past the zero-value window; the store
            // constraint backstops an already-present row.
            let mut sentinel = Event::sentinel(&event.channel);
            match tx.insert_event(&mut sentinel).await {
                Ok(()) => debug!(channel = %event.channel, "inserted placeholder event"),
                Err(PersistenceError::DuplicateEvent { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        event.eid = counter.value + 1;
        if let Err(err) = tx.insert_event(event).await {
            // The allocated eid is abandoned, never reused: the counter does
            // not advance, and the channel keeps a permanent gap.
            event.eid = 0;
            return Err(err);
        }

        counter.value = event.eid;
        counter.updated = Utc::now();
        tx.update_counter(&counter).await
    }
}

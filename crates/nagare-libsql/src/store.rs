use crate::{
    config::{LibSqlConfig, TableNames},
    read::ConnectionManager,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use libsql::{params, Connection, Row, Transaction, TransactionBehavior};
use nagare::{
    counter::Counter,
    event::{EidSelect, Event, Stream},
    persist::PersistenceError,
    sequence_number::SequenceNumber,
    store::{AppendTransaction, CounterStore, EventPersister, EventReader, Transactor},
};
use std::sync::Arc;
use tracing::debug;

/// libSQL-backed event store.
///
/// Each append transaction runs on its own connection in immediate mode: the
/// writer lock is taken up front and stands in for the per-row counter lock,
/// and contending appends queue on the connection's busy timeout.
#[derive(Clone)]
pub struct LibSqlStore {
    manager: Arc<ConnectionManager>,
    tables: TableNames,
}

impl LibSqlStore {
    /// Build the store from configuration and install the schema.
    pub async fn connect(config: LibSqlConfig) -> Result<Self, LibSqlStoreError> {
        let tables = config.tables.clone();
        let manager = ConnectionManager::from_config(config).await?;
        let store = Self::new(manager, tables);
        store.install_schema().await?;
        Ok(store)
    }

    /// Wrap an existing connection manager without touching the schema.
    pub fn new(manager: ConnectionManager, tables: TableNames) -> Self {
        Self {
            manager: Arc::new(manager),
            tables,
        }
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Create the counter and event tables when missing. The unique
    /// constraints double as the backstop for the append protocol.
    pub async fn install_schema(&self) -> Result<(), LibSqlStoreError> {
        let connection = self.connection()?;
        let counters = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                value INTEGER NOT NULL DEFAULT 0,
                updated TEXT NOT NULL
            )",
            self.tables.counters
        );
        connection.execute(&counters, ()).await?;
        let events = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL DEFAULT '',
                eid INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL,
                UNIQUE (channel, eid)
            )",
            self.tables.events
        );
        connection.execute(&events, ()).await?;
        debug!(events = %self.tables.events, counters = %self.tables.counters, "schema installed");
        Ok(())
    }

    fn connection(&self) -> Result<Connection, LibSqlStoreError> {
        Ok(self.manager.connect()?)
    }

    async fn fetch_events(
        &self,
        channel: &str,
        select: EidSelect,
    ) -> Result<Vec<Event>, PersistenceError> {
        let connection = self.connection()?;
        let mut rows = match select {
            EidSelect::All => {
                let sql = format!(
                    "SELECT id, channel, type, data, eid, created FROM {} WHERE channel = ?1 ORDER BY eid ASC",
                    self.tables.events
                );
                connection.query(&sql, params![channel]).await
            }
            EidSelect::From(eid) => {
                let sql = format!(
                    "SELECT id, channel, type, data, eid, created FROM {} WHERE channel = ?1 AND eid >= ?2 ORDER BY eid ASC",
                    self.tables.events
                );
                connection.query(&sql, params![channel, eid]).await
            }
        }
        .map_err(LibSqlStoreError::from)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(LibSqlStoreError::from)? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl CounterStore for LibSqlStore {
    async fn find_counter(&self, name: &str) -> Result<Option<Counter>, PersistenceError> {
        let connection = self.connection()?;
        let sql = format!(
            "SELECT id, name, value, updated FROM {} WHERE name = ?1",
            self.tables.counters
        );
        let mut rows = connection
            .query(&sql, params![name])
            .await
            .map_err(LibSqlStoreError::from)?;
        match rows.next().await.map_err(LibSqlStoreError::from)? {
            Some(row) => Ok(Some(row_to_counter(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_counter(&self, name: &str) -> Result<Counter, PersistenceError> {
        let connection = self.connection()?;
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (name, value, updated) VALUES (?1, 0, ?2)",
            self.tables.counters
        );
        connection
            .execute(&sql, params![name, now.to_rfc3339()])
            .await
            .map_err(counter_insert_error)?;
        Ok(Counter {
            id: connection.last_insert_rowid(),
            name: name.to_string(),
            value: 0,
            updated: now,
        })
    }
}

#[async_trait]
impl Transactor for LibSqlStore {
    type Tx = LibSqlTransaction;

    async fn begin(&self) -> Result<LibSqlTransaction, PersistenceError> {
        let connection = self.connection()?;
        // Immediate mode takes the writer lock at BEGIN, so the counter
        // re-fetch below already runs serialized against other appends.
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(LibSqlStoreError::from)?;
        Ok(LibSqlTransaction {
            tx,
            tables: self.tables.clone(),
        })
    }
}

/// One append's transaction. Dropping without commit rolls back.
pub struct LibSqlTransaction {
    tx: Transaction,
    tables: TableNames,
}

#[async_trait]
impl AppendTransaction for LibSqlTransaction {
    async fn lock_counter(&mut self, id: i64) -> Result<Counter, PersistenceError> {
        let sql = format!(
            "SELECT id, name, value, updated FROM {} WHERE id = ?1",
            self.tables.counters
        );
        let mut rows = self
            .tx
            .query(&sql, params![id])
            .await
            .map_err(LibSqlStoreError::from)?;
        match rows.next().await.map_err(LibSqlStoreError::from)? {
            Some(row) => Ok(row_to_counter(&row)?),
            None => Err(PersistenceError::unknown(format!("no counter with id {id}"))),
        }
    }

    async fn insert_event(&mut self, event: &mut Event) -> Result<(), PersistenceError> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (channel, type, data, eid, created) VALUES (?1, ?2, ?3, ?4, ?5)",
            self.tables.events
        );
        self.tx
            .execute(
                &sql,
                params![
                    event.channel.as_str(),
                    event.event_type.as_str(),
                    event.data.as_str(),
                    event.eid,
                    now.to_rfc3339()
                ],
            )
            .await
            .map_err(|err| event_insert_error(err, event))?;
        event.id = self.tx.last_insert_rowid();
        event.created = now;
        Ok(())
    }

    async fn update_counter(&mut self, counter: &Counter) -> Result<(), PersistenceError> {
        let sql = format!(
            "UPDATE {} SET value = ?1, updated = ?2 WHERE id = ?3",
            self.tables.counters
        );
        self.tx
            .execute(&sql, params![counter.value, counter.updated.to_rfc3339(), counter.id])
            .await
            .map_err(LibSqlStoreError::from)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), PersistenceError> {
        self.tx.commit().await.map_err(LibSqlStoreError::from)?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), PersistenceError> {
        self.tx.rollback().await.map_err(LibSqlStoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl EventPersister for LibSqlStore {
    async fn save_event(&self, event: &mut Event) -> Result<(), PersistenceError> {
        let connection = self.connection()?;
        if event.id != 0 {
            let sql = format!(
                "UPDATE {} SET channel = ?1, type = ?2, data = ?3, eid = ?4 WHERE id = ?5",
                self.tables.events
            );
            let affected = connection
                .execute(
                    &sql,
                    params![
                        event.channel.as_str(),
                        event.event_type.as_str(),
                        event.data.as_str(),
                        event.eid,
                        event.id
                    ],
                )
                .await
                .map_err(|err| event_insert_error(err, event))?;
            if affected == 0 {
                return Err(PersistenceError::unknown(format!("no event with id {}", event.id)));
            }
        } else {
            let now = Utc::now();
            let sql = format!(
                "INSERT INTO {} (channel, type, data, eid, created) VALUES (?1, ?2, ?3, ?4, ?5)",
                self.tables.events
            );
            connection
                .execute(
                    &sql,
                    params![
                        event.channel.as_str(),
                        event.event_type.as_str(),
                        event.data.as_str(),
                        event.eid,
                        now.to_rfc3339()
                    ],
                )
                .await
                .map_err(|err| event_insert_error(err, event))?;
            event.id = connection.last_insert_rowid();
            event.created = now;
        }
        Ok(())
    }
}

impl EventReader for LibSqlStore {
    fn stream_events(&self, channel: &str, select: EidSelect) -> Stream<'_, Event, PersistenceError> {
        let store = self.clone();
        let channel = channel.to_string();
        Box::pin(
            stream::once(async move { store.fetch_events(&channel, select).await }).flat_map(
                |result| match result {
                    Ok(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
                    Err(err) => stream::once(async move { Err(err) }).boxed(),
                },
            ),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LibSqlStoreError {
    #[error("counter already exists")]
    CounterConflict,
    #[error("event already exists for channel {channel} at eid {eid}")]
    EventConflict { channel: String, eid: SequenceNumber },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error(transparent)]
    Driver(#[from] libsql::Error),
}

impl From<LibSqlStoreError> for PersistenceError {
    fn from(error: LibSqlStoreError) -> Self {
        match error {
            LibSqlStoreError::CounterConflict => Self::CounterExists,
            LibSqlStoreError::EventConflict { channel, eid } => Self::DuplicateEvent { channel, eid },
            err @ LibSqlStoreError::InvalidTimestamp(_) => Self::UnknownError(Box::new(err)),
            LibSqlStoreError::Driver(err) => Self::ConnectionError(Box::new(err)),
        }
    }
}

fn is_unique_violation(error: &libsql::Error) -> bool {
    const SQLITE_CONSTRAINT: i32 = 19;
    match error {
        libsql::Error::SqliteFailure(code, message) => {
            code & 0xff == SQLITE_CONSTRAINT || message.contains("UNIQUE constraint failed")
        }
        other => other.to_string().contains("UNIQUE constraint failed"),
    }
}

fn counter_insert_error(error: libsql::Error) -> LibSqlStoreError {
    if is_unique_violation(&error) {
        LibSqlStoreError::CounterConflict
    } else {
        LibSqlStoreError::Driver(error)
    }
}

fn event_insert_error(error: libsql::Error, event: &Event) -> LibSqlStoreError {
    if is_unique_violation(&error) {
        LibSqlStoreError::EventConflict {
            channel: event.channel.clone(),
            eid: event.eid,
        }
    } else {
        LibSqlStoreError::Driver(error)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LibSqlStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|datetime| datetime.with_timezone(&Utc))
        .map_err(|_| LibSqlStoreError::InvalidTimestamp(value.to_string()))
}

fn row_to_counter(row: &Row) -> Result<Counter, LibSqlStoreError> {
    Ok(Counter {
        id: row.get::<i64>(0)?,
        name: row.get::<String>(1)?,
        value: row.get::<i64>(2)?,
        updated: parse_timestamp(&row.get::<String>(3)?)?,
    })
}

fn row_to_event(row: &Row) -> Result<Event, LibSqlStoreError> {
    Ok(Event {
        id: row.get::<i64>(0)?,
        channel: row.get::<String>(1)?,
        event_type: row.get::<String>(2)?,
        data: row.get::<String>(3)?,
        eid: row.get::<i64>(4)?,
        created: parse_timestamp(&row.get::<String>(5)?)?,
    })
}

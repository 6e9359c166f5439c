mod common;

use common::LocalDbSetup;
use futures::StreamExt;
use nagare::{
    event::{EidSelect, Event},
    persist::PersistenceError,
    store::{CounterStore, EventPersister, EventReader},
    EventAppender,
};
use nagare_libsql::{LibSqlConfig, LibSqlStore, TableNames};

async fn channel_eids(store: &LibSqlStore, channel: &str) -> Vec<i64> {
    store
        .stream_events(channel, EidSelect::All)
        .map(|row| row.expect("stream event").eid)
        .collect()
        .await
}

#[tokio::test]
async fn test_append_assigns_sequential_eids_with_placeholder() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());

    let event = appender.append("alerts", "info", "hello").await.unwrap();
    assert_eq!(event.channel, "alerts");
    assert_eq!(event.eid, 1);
    assert_eq!(event.event_type, "info");
    assert_eq!(event.data, "hello");
    assert_ne!(event.id, 0);

    for i in 2..=4 {
        let event = appender.append("alerts", "info", &i.to_string()).await.unwrap();
        assert_eq!(event.eid, i);
    }

    assert_eq!(channel_eids(&setup.store, "alerts").await, vec![0, 1, 2, 3, 4]);
    assert_eq!(appender.current_eid("alerts").await.unwrap(), 4);

    let counter = setup.store.find_counter("alerts").await.unwrap().unwrap();
    assert_eq!(counter.value, 4);
}

#[tokio::test]
async fn test_placeholder_row_is_empty() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());
    appender.append("alerts", "info", "hello").await.unwrap();

    let rows: Vec<Event> = setup
        .store
        .stream_events("alerts", EidSelect::From(0))
        .map(|row| row.unwrap())
        .collect()
        .await;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_sentinel());
    assert!(rows[0].event_type.is_empty());
    assert!(rows[0].data.is_empty());
    assert_eq!(rows[1].eid, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_on_same_channel() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());

    let mut handles = Vec::new();
    for i in 0..6 {
        let appender = appender.clone();
        handles.push(tokio::spawn(async move {
            appender.append("x", "tick", &i.to_string()).await.unwrap().eid
        }));
    }

    let mut eids = Vec::new();
    for handle in handles {
        eids.push(handle.await.unwrap());
    }
    eids.sort_unstable();
    assert_eq!(eids, (1..=6).collect::<Vec<_>>());

    // One placeholder despite the fresh-channel race, no gaps, no dups.
    assert_eq!(channel_eids(&setup.store, "x").await, (0..=6).collect::<Vec<_>>());
    assert_eq!(appender.current_eid("x").await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_for_converges() {
    let setup = LocalDbSetup::new().await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = setup.store.clone();
        handles.push(tokio::spawn(async move {
            store.counter_for("never-seen").await.unwrap().id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_channels_keep_independent_sequences() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());

    assert_eq!(appender.append("a", "t", "1").await.unwrap().eid, 1);
    assert_eq!(appender.append("b", "t", "1").await.unwrap().eid, 1);
    assert_eq!(appender.append("a", "t", "2").await.unwrap().eid, 2);

    assert_eq!(channel_eids(&setup.store, "a").await, vec![0, 1, 2]);
    assert_eq!(channel_eids(&setup.store, "b").await, vec![0, 1]);
}

#[tokio::test]
async fn test_occupied_eid_slot_fails_and_leaves_counter() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());

    appender.append("chan", "t", "first").await.unwrap();

    // Occupy the next slot behind the allocator's back; the unique
    // constraint is the backstop when the computed eid is already taken.
    let mut squatter = Event::draft("chan", "rogue", "payload");
    squatter.eid = 2;
    setup.store.save_event(&mut squatter).await.unwrap();

    let mut draft = Event::draft("chan", "t", "doomed");
    let err = appender.save(&mut draft).await.unwrap_err();
    assert!(matches!(err, PersistenceError::DuplicateEvent { eid: 2, .. }));

    // The tentative eid was surrendered and the counter did not advance.
    assert_eq!(draft.eid, 0);
    assert_eq!(appender.current_eid("chan").await.unwrap(), 1);
}

#[tokio::test]
async fn test_resave_bypasses_allocation() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());

    let mut event = appender.append("chan", "t", "before").await.unwrap();
    event.data = "after".to_string();
    appender.save(&mut event).await.unwrap();

    assert_eq!(event.eid, 1);
    assert_eq!(appender.current_eid("chan").await.unwrap(), 1);

    let rows: Vec<Event> = setup
        .store
        .stream_events("chan", EidSelect::From(1))
        .map(|row| row.unwrap())
        .collect()
        .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data, "after");
    assert_eq!(rows[0].id, event.id);
}

#[tokio::test]
async fn test_stream_events_tails_from_anchor() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());
    for i in 1..=3 {
        appender.append("chan", "t", &i.to_string()).await.unwrap();
    }

    let tail: Vec<i64> = setup
        .store
        .stream_events("chan", EidSelect::From(2))
        .map(|row| row.unwrap().eid)
        .collect()
        .await;
    assert_eq!(tail, vec![2, 3]);
}

#[tokio::test]
async fn test_schema_install_is_idempotent() {
    let setup = LocalDbSetup::new().await;
    let appender = EventAppender::new(setup.store.clone());
    appender.append("chan", "t", "1").await.unwrap();

    // A second connect over the same file must leave existing rows alone.
    let store = LibSqlStore::connect(LibSqlConfig::from_local(setup.path.as_str()))
        .await
        .unwrap();
    assert_eq!(channel_eids(&store, "chan").await, vec![0, 1]);
}

#[tokio::test]
async fn test_custom_table_names() {
    let setup = LocalDbSetup::with_tables(TableNames {
        events: "stream_events".to_string(),
        counters: "stream_counters".to_string(),
    })
    .await;
    let appender = EventAppender::new(setup.store.clone());

    let event = appender.append("chan", "t", "1").await.unwrap();
    assert_eq!(event.eid, 1);
    assert_eq!(channel_eids(&setup.store, "chan").await, vec![0, 1]);
}

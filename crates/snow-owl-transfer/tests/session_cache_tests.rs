//! Session factory and session cache integration tests
//!
//! NIST 800-53: AC-10 (Concurrent Session Control), AC-12 (Session Termination)
//! Implementation: Connection sharing, pool bounds and reset semantics

use snow_owl_transfer::{
    CacheConfig, CachingSessionFactory, DefaultSessionFactory, MemoryConnector, Operation,
    Payload, RemoteFileWriter, Session, SessionFactory, TransferHint,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;

fn cache(connector: &MemoryConnector, shared: bool, pool_limit: usize) -> CachingSessionFactory {
    let factory = DefaultSessionFactory::new(connector.clone(), shared);
    CachingSessionFactory::new(
        Arc::new(factory),
        CacheConfig {
            pool_limit,
            ..CacheConfig::default()
        },
    )
}

#[tokio::test]
async fn test_shared_sessions_use_one_connection() {
    let connector = MemoryConnector::new();
    let factory = DefaultSessionFactory::new(connector.clone(), true);

    let s1 = factory.get_session().await.unwrap();
    let s2 = factory.get_session().await.unwrap();

    assert_eq!(s1.connection_id(), s2.connection_id());
    assert_eq!(connector.connections_opened(), 1);
}

#[tokio::test]
async fn test_unshared_sessions_use_distinct_connections() {
    let connector = MemoryConnector::new();
    let factory = DefaultSessionFactory::new(connector.clone(), false);

    let mut s1 = factory.get_session().await.unwrap();
    let s2 = factory.get_session().await.unwrap();
    assert_ne!(s1.connection_id(), s2.connection_id());

    // Closing one leaves the other usable
    s1.close().await.unwrap();
    assert!(s2.is_open());
    assert_eq!(connector.open_connections(), 1);
}

#[tokio::test]
async fn test_reset_never_hands_out_older_connections() {
    let connector = MemoryConnector::new();
    let cache = cache(&connector, false, 10);

    let mut before = Vec::new();
    for _ in 0..3 {
        before.push(cache.get_session().await.unwrap());
    }
    let old_ids: HashSet<_> = before.iter().map(|s| s.connection_id()).collect();
    for mut session in before {
        session.close().await.unwrap();
    }
    assert_eq!(cache.stats().idle, 3);

    cache.reset_cache().await;
    assert_eq!(cache.stats().idle, 0);
    assert_eq!(connector.open_connections(), 0);

    for _ in 0..3 {
        let session = cache.get_session().await.unwrap();
        assert!(!old_ids.contains(&session.connection_id()));
    }
}

/// A shared connection invalidated by a reset stays up while a session from
/// before the reset is still checked out, and is disconnected exactly once
/// when that session comes back.
#[tokio::test]
async fn test_shared_connection_outlives_reset_until_released() {
    let connector = MemoryConnector::new();
    let cache = cache(&connector, true, 10);

    let mut s1 = cache.get_session().await.unwrap();
    let mut s2 = cache.get_session().await.unwrap();
    assert_eq!(s1.connection_id(), s2.connection_id());
    s1.close().await.unwrap();

    cache.reset_cache().await;
    assert!(connector.is_connected(0));
    assert_eq!(connector.disconnect_count(), 0);

    let mut s3 = cache.get_session().await.unwrap();
    assert_ne!(s3.connection_id(), s2.connection_id());
    assert_eq!(connector.connections_opened(), 2);

    s2.close().await.unwrap();
    assert!(!connector.is_connected(0));
    assert_eq!(connector.disconnect_count(), 1);

    s3.close().await.unwrap();
    assert!(connector.is_connected(1));
    assert_eq!(connector.disconnect_count(), 1);
    assert_eq!(cache.stats().idle, 1);
}

/// Temporary paths of every write issued so far
fn writes_started(connector: &MemoryConnector) -> Vec<String> {
    connector
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            Operation::Write { path, .. } => Some(path),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_uploads_beyond_pool_limit_wait_for_a_session() {
    let connector = MemoryConnector::new();
    connector.add_directory("/out");
    let cache = cache(&connector, false, 3);
    let writer = Arc::new(RemoteFileWriter::new(Arc::new(cache.clone()), "/out"));

    // Each upload streams from a duplex pipe and stays busy until it is fed
    let mut feeds = HashMap::new();
    let mut tasks = JoinSet::new();
    for i in 0..4 {
        let (feed, body) = tokio::io::duplex(64);
        let name = format!("file-{i}.txt");
        feeds.insert(format!("/out/{name}.writing"), feed);
        let writer = Arc::clone(&writer);
        tasks.spawn(async move {
            writer
                .handle(Payload::Stream(Box::new(body)), &TransferHint::named(name))
                .await
        });
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = writes_started(&connector);
    assert_eq!(started.len(), 3);
    assert_eq!(connector.open_connections(), 3);
    assert_eq!(cache.stats().checked_out, 3);

    // Finishing one upload lets the waiting one take over its session
    let mut feed = feeds.remove(&started[0]).unwrap();
    feed.write_all(b"done").await.unwrap();
    drop(feed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(writes_started(&connector).len(), 4);
    assert_eq!(connector.connections_opened(), 3);
    assert_eq!(connector.open_connections(), 3);

    for (_, mut feed) in feeds {
        feed.write_all(b"done").await.unwrap();
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(connector.file_paths().len(), 4);
    assert_eq!(connector.file("/out/file-3.txt"), Some(b"done".to_vec()));
    assert_eq!(connector.connections_opened(), 3);
    assert_eq!(cache.stats().checked_out, 0);
    assert_eq!(writer.metrics().snapshot().transfers_succeeded, 4);
}

#[tokio::test]
async fn test_pooling_and_sharing_compose() {
    let connector = MemoryConnector::new();
    connector.add_directory("/out");
    let cache = cache(&connector, true, 4);
    let writer = Arc::new(RemoteFileWriter::new(Arc::new(cache), "/out"));

    let mut tasks = JoinSet::new();
    for i in 0..12 {
        let writer = Arc::clone(&writer);
        tasks.spawn(async move {
            writer
                .handle(Payload::from("x"), &TransferHint::named(format!("{i}.txt")))
                .await
        });
    }

    let mut connections = HashSet::new();
    while let Some(result) = tasks.join_next().await {
        connections.insert(result.unwrap().unwrap().connection);
    }

    assert_eq!(connections.len(), 1);
    assert_eq!(connector.connections_opened(), 1);
    assert_eq!(connector.file_paths().len(), 12);
}

#[tokio::test]
async fn test_destroyed_cache_rejects_uploads() {
    let connector = MemoryConnector::new();
    connector.add_directory("/out");
    let cache = cache(&connector, false, 2);
    let writer = RemoteFileWriter::new(Arc::new(cache.clone()), "/out");

    writer
        .handle(Payload::from("x"), &TransferHint::named("a.txt"))
        .await
        .unwrap();
    cache.destroy().await;

    let err = writer
        .handle(Payload::from("y"), &TransferHint::named("b.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, snow_owl_transfer::Error::FactoryClosed));
    assert_eq!(connector.open_connections(), 0);
}

mod common;

use std::sync::Arc;

use common::{Harness, harness_with, identity};
use handlequota::{
    error::Error,
    handles::AllocatorConfig,
    quota::Remaining,
    store::{HandleIndex, ProfileStore, SqliteStore},
};
use tempfile::TempDir;
use time::Duration;
use tokio::task::JoinSet;

async fn sqlite_harness() -> (TempDir, Harness<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("handlequota.db").display());
    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    (dir, harness_with(store, AllocatorConfig::default()))
}

#[tokio::test]
async fn profile_round_trips_through_sqlite() {
    let (_dir, h) = sqlite_harness().await;
    let created = h
        .bootstrap
        .ensure_profile(&identity("u1", Some("Alice"), Some("alice@example.com")))
        .await
        .unwrap();

    let stored = h.store.get("u1").await.unwrap().unwrap();
    assert_eq!(stored, created);
    assert!(h.store.get("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn handle_claims_are_exclusive() {
    let (_dir, h) = sqlite_harness().await;
    assert!(h.store.claim("alice", "u1").await.unwrap());
    assert!(!h.store.claim("alice", "u2").await.unwrap());
    assert_eq!(h.store.owner("alice").await.unwrap().as_deref(), Some("u1"));

    assert!(!h.store.release("alice", "u2").await.unwrap(), "only the owner can release");
    assert!(h.store.release("alice", "u1").await.unwrap());
    assert!(h.store.owner("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn quota_sequence_and_rollover() {
    let (_dir, h) = sqlite_harness().await;
    h.bootstrap.ensure_profile(&identity("u1", Some("Alice"), None)).await.unwrap();

    for expected in [4, 3, 2, 1, 0] {
        assert_eq!(h.ledger.consume("u1").await.unwrap().remaining, Remaining::Limited(expected));
    }
    assert!(matches!(h.ledger.consume("u1").await, Err(Error::QuotaExceeded { .. })));

    h.clock.advance(Duration::days(7));
    assert_eq!(h.ledger.consume("u1").await.unwrap().remaining, Remaining::Limited(4));

    let stored = h.store.get("u1").await.unwrap().unwrap();
    assert_eq!(stored.quota.sent_count, 1);
    assert_eq!(stored.quota.window_start, common::start() + Duration::days(7));
    assert_eq!(stored.total_messages, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumes_respect_capacity() {
    let (_dir, h) = sqlite_harness().await;
    h.bootstrap.ensure_profile(&identity("u1", Some("Alice"), None)).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..12 {
        let ledger = h.ledger.clone();
        tasks.spawn(async move { ledger.consume("u1").await });
    }
    let mut ok = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::QuotaExceeded { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(h.store.get("u1").await.unwrap().unwrap().quota.sent_count, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bootstrap_leaves_one_profile() {
    let (_dir, h) = sqlite_harness().await;
    let who = identity("u1", Some("Racer"), None);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let bootstrap = h.bootstrap.clone();
        let who = who.clone();
        tasks.spawn(async move { bootstrap.ensure_profile(&who).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap().uid, "u1");
    }

    let (profiles,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    let (handles,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM handles")
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    assert_eq!(profiles, 1);
    assert_eq!(handles, 1);
}

#[tokio::test]
async fn change_handle_persists() {
    let (_dir, h) = sqlite_harness().await;
    h.bootstrap.ensure_profile(&identity("u1", Some("Alice"), None)).await.unwrap();

    let changed = h.allocator.change_handle("u1", "wonder").await.unwrap();
    assert_eq!(changed.handle, "wonder");
    assert_eq!(h.store.owner("wonder").await.unwrap().as_deref(), Some("u1"));
    assert!(h.store.owner("alice").await.unwrap().is_none());
}

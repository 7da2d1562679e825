//! Integration tests for directory refresh: single-flight, freshness,
//! failure fallback and cache persistence.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use slackwire::directory::{
    CacheLoad, CacheStore, DirectoryError, DirectoryService, DirectorySettings, Snapshot,
    SnapshotSource,
};
use support::*;

/// Pages for the standard workspace: 2 user pages + 1 per channel type.
const FULL_FETCH_CALLS: usize = 6;

async fn seed_cache(dir: &std::path::Path, age: chrono::Duration) {
    let (users, channels) = workspace();
    let snapshot = Snapshot::new(users, channels, Utc::now() - age);
    CacheStore::new(dir).save(&snapshot).await.unwrap();
}

#[tokio::test]
async fn concurrent_refreshes_share_one_fetch() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard().with_delay(Duration::from_millis(20)));
    let svc = service(api.clone(), tmp.path());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move { svc.refresh(false).await }));
    }
    let mut dirs = Vec::new();
    for h in handles {
        dirs.push(h.await.unwrap().unwrap());
    }

    assert_eq!(api.listing_calls(), FULL_FETCH_CALLS);
    assert!(dirs.iter().all(|d| Arc::ptr_eq(d, &dirs[0])));
    assert_eq!(dirs[0].users().len(), 3, "all user pages collected");
    assert_eq!(dirs[0].channels().len(), 5);
}

#[tokio::test]
async fn fresh_snapshot_is_not_refetched() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    let first = svc.refresh(false).await.unwrap();
    let second = svc.refresh(false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(api.listing_calls(), FULL_FETCH_CALLS);

    let forced = svc.refresh(true).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &forced));
    assert_eq!(api.listing_calls(), 2 * FULL_FETCH_CALLS);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    let before = svc.refresh(false).await.unwrap();
    api.fail_listing.store(true, Ordering::SeqCst);

    let err = svc.refresh(true).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Unavailable(_)), "got {err:?}");

    let held = svc.peek().expect("snapshot kept");
    assert!(Arc::ptr_eq(&before, &held));
    let status = svc.status();
    assert!(status.last_error.unwrap().contains("invalid_auth"));
    assert_eq!(svc.resolve_channel("#general").await.unwrap(), GENERAL);
}

#[tokio::test]
async fn failure_after_some_pages_discards_them() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    let before = svc.refresh(false).await.unwrap();
    svc.flush().await;

    // Both user pages come back, the first channel page fails.
    api.fail_listing_after(2);
    let err = svc.refresh(true).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Unavailable(_)), "got {err:?}");
    assert_eq!(api.listing_calls(), FULL_FETCH_CALLS + 3);

    let held = svc.peek().expect("snapshot kept");
    assert!(Arc::ptr_eq(&before, &held));
    assert_eq!(svc.status().source, Some(SnapshotSource::Remote));

    svc.flush().await;
    match CacheStore::new(tmp.path()).load().await {
        CacheLoad::Loaded(snapshot) => assert_eq!(snapshot.fetched_at, before.fetched_at()),
        other => panic!("expected the first cache, got {other:?}"),
    }
}

#[tokio::test]
async fn failure_after_some_pages_without_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    api.fail_listing_after(1);
    let svc = service(api.clone(), tmp.path());

    assert!(matches!(
        svc.refresh(false).await,
        Err(DirectoryError::Unavailable(_))
    ));
    assert_eq!(api.listing_calls(), 2);
    assert!(svc.peek().is_none());

    svc.flush().await;
    assert!(matches!(
        CacheStore::new(tmp.path()).load().await,
        CacheLoad::NotFound
    ));
}

#[tokio::test]
async fn no_snapshot_and_failing_api_is_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    api.fail_listing.store(true, Ordering::SeqCst);
    let svc = service(api.clone(), tmp.path());

    assert!(matches!(
        svc.current().await,
        Err(DirectoryError::Unavailable(_))
    ));
    assert!(svc.peek().is_none());
    assert!(!svc.status().loaded);
}

#[tokio::test]
async fn warm_up_uses_fresh_cache_without_remote_calls() {
    let tmp = tempfile::tempdir().unwrap();
    seed_cache(tmp.path(), chrono::Duration::minutes(5)).await;
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    let dir = svc.warm_up().await.unwrap();
    assert_eq!(dir.users().len(), 3);
    assert_eq!(api.listing_calls(), 0);

    let status = svc.status();
    assert_eq!(status.source, Some(SnapshotSource::Cache));
    assert!(!status.stale);
}

#[tokio::test]
async fn warm_up_serves_stale_cache_when_refresh_fails() {
    let tmp = tempfile::tempdir().unwrap();
    seed_cache(tmp.path(), chrono::Duration::hours(3)).await;
    let api = Arc::new(MockSlack::standard());
    api.fail_listing.store(true, Ordering::SeqCst);
    let svc = service(api.clone(), tmp.path());

    let dir = svc.warm_up().await.unwrap();
    assert_eq!(dir.channels().len(), 5);

    let status = svc.status();
    assert!(status.stale);
    assert!(status.last_error.is_some());
    assert_eq!(status.source, Some(SnapshotSource::Cache));
}

#[tokio::test]
async fn stale_snapshot_is_served_while_revalidating() {
    let tmp = tempfile::tempdir().unwrap();
    seed_cache(tmp.path(), chrono::Duration::hours(3)).await;
    let api = Arc::new(MockSlack::standard().with_delay(Duration::from_millis(20)));
    let svc = service(api.clone(), tmp.path());

    let stale = svc.load_cached().await.expect("cache adopted");
    let served = svc.current().await.unwrap();
    assert!(Arc::ptr_eq(&stale, &served), "stale snapshot returned immediately");
    assert!(svc.status().refresh_in_flight);

    // Joins the background refresh instead of starting a second one.
    let fresh = svc.refresh(false).await.unwrap();
    assert!(fresh.fetched_at() > stale.fetched_at());
    assert_eq!(api.listing_calls(), FULL_FETCH_CALLS);
    assert_eq!(svc.status().source, Some(SnapshotSource::Remote));
}

#[tokio::test]
async fn forced_refresh_ignores_fresh_cache() {
    let tmp = tempfile::tempdir().unwrap();
    seed_cache(tmp.path(), chrono::Duration::minutes(1)).await;
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    svc.refresh(true).await.unwrap();
    assert_eq!(api.listing_calls(), FULL_FETCH_CALLS);
    assert_eq!(svc.status().source, Some(SnapshotSource::Remote));
}

#[tokio::test]
async fn forced_refresh_does_not_settle_for_a_plain_one() {
    let tmp = tempfile::tempdir().unwrap();
    seed_cache(tmp.path(), chrono::Duration::minutes(1)).await;
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    // The plain refresh starts first and only adopts the fresh cache.
    let (plain, forced) = tokio::join!(svc.current(), svc.refresh(true));
    assert_eq!(plain.unwrap().users().len(), 3);
    let forced = forced.unwrap();

    assert_eq!(api.listing_calls(), FULL_FETCH_CALLS);
    assert_eq!(svc.status().source, Some(SnapshotSource::Remote));
    assert!(Arc::ptr_eq(&forced, &svc.peek().unwrap()));
}

#[tokio::test]
async fn concurrent_forced_refreshes_share_one_fetch() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard().with_delay(Duration::from_millis(20)));
    let svc = service(api.clone(), tmp.path());
    svc.refresh(false).await.unwrap();

    let (a, b) = tokio::join!(svc.refresh(true), svc.refresh(true));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(api.listing_calls(), 2 * FULL_FETCH_CALLS);
}

#[tokio::test]
async fn refreshed_snapshot_is_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    let svc = service(api.clone(), tmp.path());

    let dir = svc.refresh(false).await.unwrap();
    svc.flush().await;

    match CacheStore::new(tmp.path()).load().await {
        CacheLoad::Loaded(snapshot) => {
            assert_eq!(snapshot.fetched_at, dir.fetched_at());
            assert_eq!(snapshot.users, dir.users());
            assert_eq!(snapshot.channels, dir.channels());
        }
        other => panic!("expected a saved cache, got {other:?}"),
    }
}

#[tokio::test]
async fn restricted_channel_types_are_honoured() {
    let tmp = tempfile::tempdir().unwrap();
    let api = Arc::new(MockSlack::standard());
    let svc = DirectoryService::new(
        api.clone(),
        CacheStore::new(tmp.path()),
        DirectorySettings {
            channel_types: vec![slackwire::directory::ChannelType::PublicChannel],
            ..settings()
        },
    );

    let dir = svc.refresh(false).await.unwrap();
    assert_eq!(dir.channels().len(), 2);
    assert_eq!(api.channel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_max_age_never_goes_stale() {
    let tmp = tempfile::tempdir().unwrap();
    seed_cache(tmp.path(), chrono::Duration::days(30)).await;
    let api = Arc::new(MockSlack::standard());
    let svc = DirectoryService::new(
        api.clone(),
        CacheStore::new(tmp.path()),
        DirectorySettings {
            max_age: None,
            ..settings()
        },
    );

    svc.current().await.unwrap();
    assert!(!svc.status().stale);
    assert_eq!(api.listing_calls(), 0);
}

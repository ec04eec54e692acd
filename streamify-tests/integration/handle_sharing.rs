//! Handle sharing and reference counting across concurrent consumers

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use streamify_core::config::StreamifyConfig;
use streamify_core::catalog::SourceDescriptor;
use streamify_core::engine::{InfoHash, MockEngine, PiecePriority, mock_locator};
use streamify_core::{HandleError, spawn_handle_manager};

use crate::common::descriptor;

#[tokio::test(start_paused = true)]
async fn test_concurrent_cold_acquires_share_one_add() {
    let engine = Arc::new(MockEngine::new().with_add_delay(Duration::from_millis(200)));
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(1);

    let leases = join_all((0..10).map(|_| manager.acquire(&source))).await;
    let leases: Vec<_> = leases.into_iter().map(Result::unwrap).collect();

    assert_eq!(engine.add_calls(), 1);
    let first = leases[0].handle();
    assert!(leases.iter().all(|lease| Arc::ptr_eq(lease.handle(), first)));

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.ref_count(source.hash), Some(10));
}

#[tokio::test]
async fn test_ref_count_tracks_acquires_minus_releases() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(2);

    for _ in 0..5 {
        manager.acquire(&source).await.unwrap().detach();
    }
    for _ in 0..3 {
        manager.release(source.hash);
    }
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.ref_count(source.hash), Some(2));
    assert_eq!(stats.referenced, 1);

    // Over-releasing saturates at zero
    for _ in 0..4 {
        manager.release(source.hash);
    }
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.ref_count(source.hash), Some(0));
    assert_eq!(stats.idle, 1);

    // And a fresh acquire counts from zero again
    let _lease = manager.acquire(&source).await.unwrap();
    assert_eq!(manager.stats().await.unwrap().ref_count(source.hash), Some(1));
    assert_eq!(engine.add_calls(), 1);
}

#[tokio::test]
async fn test_sequential_consumers_reuse_handle() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(3);

    let first = manager.acquire(&source).await.unwrap();
    let first_handle = first.handle().clone();
    drop(first);

    let second = manager.acquire(&source).await.unwrap();
    assert!(Arc::ptr_eq(second.handle(), &first_handle));
    assert_eq!(engine.add_calls(), 1);
    assert_eq!(manager.stats().await.unwrap().ref_count(source.hash), Some(1));
}

#[tokio::test]
async fn test_distinct_hashes_get_distinct_handles() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());

    let a = manager.acquire(&descriptor(4)).await.unwrap();
    let b = manager.acquire(&descriptor(5)).await.unwrap();

    assert_ne!(a.info_hash(), b.info_hash());
    assert_eq!(engine.add_calls(), 2);
    assert_eq!(manager.stats().await.unwrap().referenced, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_acquire_can_be_retried() {
    let engine = Arc::new(MockEngine::new());
    engine.hang_adds();
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(6);

    let err = manager.acquire(&source).await.unwrap_err();
    assert!(matches!(err, HandleError::AcquireTimeout { .. }));

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.pending, 0);

    engine.succeed_adds();
    let lease = manager.acquire(&source).await.unwrap();
    assert_eq!(lease.info_hash(), source.hash);
    assert_eq!(engine.add_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_add_settles_every_waiter() {
    let engine = Arc::new(MockEngine::new().with_add_delay(Duration::from_millis(100)));
    engine.fail_adds();
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(7);

    let results = join_all((0..3).map(|_| manager.acquire(&source))).await;
    for result in results {
        assert!(matches!(result, Err(HandleError::AcquireFailed { .. })));
    }
    assert_eq!(engine.add_calls(), 1);

    engine.succeed_adds();
    manager.acquire(&source).await.unwrap();
    assert_eq!(engine.add_calls(), 2);
}

#[tokio::test]
async fn test_duplicate_add_adopts_engine_handle() {
    let engine = Arc::new(MockEngine::new());
    let source = descriptor(8);
    let external = engine.insert_external(&source.locator);
    // The proactive lookup misses, so the add hits the duplicate path
    engine.miss_next_lookups(1);

    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let lease = manager.acquire(&source).await.unwrap();

    assert_eq!(lease.info_hash(), source.hash);
    assert_eq!(engine.add_calls(), 1);
    // Adopted handles keep the engine's own priorities
    assert!(external.priorities().iter().all(|p| *p == PiecePriority::Low));
    assert_eq!(manager.stats().await.unwrap().ref_count(source.hash), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_alias_hash_cannot_evict_live_handle() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let real = descriptor(0x11);
    // Catalog entry keyed by another hash but pointing at the same content
    let alias = SourceDescriptor::new(
        InfoHash::new([0x22; 20]),
        mock_locator(real.hash, "movie.mp4", 1000),
    );

    let held = manager.acquire(&real).await.unwrap();
    let err = manager.acquire(&alias).await.unwrap_err();
    assert!(matches!(err, HandleError::AcquireFailed { .. }));

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.ref_count(alias.hash), None);

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(manager.reap_idle().await.unwrap(), 0);

    assert_eq!(manager.stats().await.unwrap().ref_count(real.hash), Some(1));
    assert!(!engine.handle(real.hash).unwrap().is_destroyed());
    assert_eq!(engine.remove_calls(), 0);
    assert_eq!(held.info_hash(), real.hash);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_does_not_leak_reference() {
    let engine = Arc::new(MockEngine::new().with_add_delay(Duration::from_millis(100)));
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(9);

    let task = {
        let manager = manager.clone();
        let source = source.clone();
        tokio::spawn(async move { manager.acquire(&source).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();
    let _ = task.await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.ref_count(source.hash), Some(0));
}

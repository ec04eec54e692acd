//! Idle eviction with the production lifecycle timings

use std::sync::Arc;
use std::time::Duration;

use streamify_core::config::StreamifyConfig;
use streamify_core::engine::MockEngine;
use streamify_core::{HandleError, spawn_handle_manager};

use crate::common::descriptor;

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_unreferenced_handle_evicted_after_idle_timeout() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::default());
    let source = descriptor(1);

    drop(manager.acquire(&source).await.unwrap());

    // Reaper passes at 5, 10 and 15 minutes see at most exactly 15 minutes idle
    tokio::time::sleep(15 * MINUTE + Duration::from_secs(1)).await;
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.ref_count(source.hash), Some(0));
    assert_eq!(engine.remove_calls(), 0);

    tokio::time::sleep(5 * MINUTE).await;
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(engine.remove_calls(), 1);
    assert!(!engine.contains(source.hash));
}

#[tokio::test(start_paused = true)]
async fn test_referenced_handle_is_never_evicted() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::default());
    let source = descriptor(2);

    let lease = manager.acquire(&source).await.unwrap();
    tokio::time::sleep(120 * MINUTE).await;

    assert_eq!(manager.stats().await.unwrap().ref_count(source.hash), Some(1));
    assert_eq!(engine.remove_calls(), 0);
    assert!(!engine.handle(source.hash).unwrap().is_destroyed());
    drop(lease);
}

#[tokio::test(start_paused = true)]
async fn test_reacquire_resets_idle_clock() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::default());
    let source = descriptor(3);

    drop(manager.acquire(&source).await.unwrap());
    tokio::time::sleep(12 * MINUTE).await;
    drop(manager.acquire(&source).await.unwrap());

    // 24 minutes after the first release, 12 after the second
    tokio::time::sleep(12 * MINUTE).await;
    assert_eq!(manager.stats().await.unwrap().total, 1);
    assert_eq!(engine.add_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_hash_is_added_again_on_demand() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::default());
    let source = descriptor(4);

    drop(manager.acquire(&source).await.unwrap());
    tokio::time::sleep(16 * MINUTE).await;
    assert_eq!(manager.reap_idle().await.unwrap(), 1);

    let lease = manager.acquire(&source).await.unwrap();
    assert_eq!(lease.info_hash(), source.hash);
    assert_eq!(engine.add_calls(), 2);
}

#[tokio::test]
async fn test_shutdown_destroys_referenced_handles() {
    let engine = Arc::new(MockEngine::new());
    let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
    let source = descriptor(5);

    let lease = manager.acquire(&source).await.unwrap();
    manager.shutdown().await.unwrap();

    assert!(engine.handle(source.hash).is_none());
    assert_eq!(engine.remove_calls(), 1);
    assert!(matches!(
        manager.stats().await,
        Err(HandleError::ManagerShutdown)
    ));
    // Late release after shutdown is harmless
    drop(lease);
}

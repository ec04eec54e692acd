//! End-to-end streaming over the simulated swarm engine

use std::sync::Arc;
use std::time::Duration;

use axum::http::{StatusCode, header};
use streamify_core::catalog::{InMemoryCatalog, SourceDescriptor};
use streamify_core::config::StreamifyConfig;
use streamify_core::engine::{InfoHash, mock_locator};
use streamify_sim::{SimulatedEngine, SimulationConfig};

use crate::common::{TestApp, body_bytes, header_str};

const FEATURE_LENGTH: u64 = 20_000;

fn feature_hash() -> InfoHash {
    InfoHash::new([0x5E; 20])
}

fn simulated_app(config: SimulationConfig) -> (TestApp, Arc<SimulatedEngine>) {
    let engine = Arc::new(SimulatedEngine::new(config));
    let catalog = InMemoryCatalog::new();
    catalog.insert(
        "feature",
        SourceDescriptor::new(
            feature_hash(),
            mock_locator(feature_hash(), "feature.mkv", FEATURE_LENGTH),
        ),
    );
    let app = TestApp::new(
        engine.clone(),
        Arc::new(catalog),
        &StreamifyConfig::for_testing(),
    );
    (app, engine)
}

fn feature_uri() -> String {
    format!("/stream/feature/{}", feature_hash())
}

#[tokio::test]
async fn test_streams_main_file_not_sample() {
    let (app, engine) = simulated_app(SimulationConfig::instant());

    let response = app.get(&feature_uri(), Some("bytes=1000-2999")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/x-matroska");
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        format!("bytes 1000-2999/{FEATURE_LENGTH}")
    );

    let body = body_bytes(response).await;
    let handle = engine.simulated_handle(feature_hash()).unwrap();
    let expected = handle.expected_content(1, 1000, 2999).unwrap();
    assert_eq!(body.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_streams_while_pieces_download() {
    let config = SimulationConfig {
        piece_latency: Duration::from_millis(1),
        ..SimulationConfig::instant()
    };
    let (app, engine) = simulated_app(config);

    let response = app.get(&feature_uri(), Some("bytes=15000-")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = tokio::time::timeout(Duration::from_secs(10), body_bytes(response))
        .await
        .unwrap();

    let handle = engine.simulated_handle(feature_hash()).unwrap();
    let expected = handle
        .expected_content(1, 15_000, FEATURE_LENGTH - 1)
        .unwrap();
    assert_eq!(body.len(), expected.len());
    assert_eq!(body.as_ref(), expected.as_slice());
    assert!(!handle.critical_requests().is_empty());
}

#[tokio::test]
async fn test_repeat_requests_reuse_simulated_handle() {
    let (app, engine) = simulated_app(SimulationConfig::instant());

    for range in ["bytes=0-99", "bytes=100-199", "bytes=-50"] {
        let response = app.get(&feature_uri(), Some(range)).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT, "{range}");
        body_bytes(response).await;
    }

    assert_eq!(engine.handle_count(), 1);
    assert_eq!(app.ref_count(feature_hash()).await, Some(0));
}

//! HTTP contract of the streaming and API routes

use std::sync::Arc;

use axum::http::{StatusCode, header};
use http_body_util::BodyExt;
use streamify_core::engine::{MockEngine, MockHandle, StreamBehavior};

use crate::common::{TestApp, body_bytes, header_str, movie_descriptor, movie_hash};

#[tokio::test]
async fn test_bounded_range_returns_partial_content() {
    let engine = Arc::new(MockEngine::new());
    let app = TestApp::with_mock(engine.clone());

    let response = app.stream_movie(Some("bytes=200-499")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "300");
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 200-499/1000");
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(header_str(&response, header::CACHE_CONTROL), "no-cache");

    let body = body_bytes(response).await;
    let expected: Vec<u8> = (200..500).map(MockHandle::byte_at).collect();
    assert_eq!(body.as_ref(), expected.as_slice());

    assert_eq!(app.ref_count(movie_hash()).await, Some(0));
    assert_eq!(engine.add_calls(), 1);
}

#[tokio::test]
async fn test_open_ended_and_suffix_ranges() {
    let app = TestApp::with_mock(Arc::new(MockEngine::new()));

    let response = app.stream_movie(Some("bytes=900-")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 900-999/1000");
    assert_eq!(body_bytes(response).await.len(), 100);

    let response = app.stream_movie(Some("bytes=-10")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 990-999/1000");
    let expected: Vec<u8> = (990..1000).map(MockHandle::byte_at).collect();
    assert_eq!(body_bytes(response).await.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_end_past_file_is_clamped() {
    let app = TestApp::with_mock(Arc::new(MockEngine::new()));

    let response = app.stream_movie(Some("bytes=500-5000")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 500-999/1000");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "500");
}

#[tokio::test]
async fn test_missing_range_is_rejected_before_acquire() {
    let engine = Arc::new(MockEngine::new());
    let app = TestApp::with_mock(engine.clone());

    let response = app.stream_movie(None).await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(engine.add_calls(), 0);
    assert_eq!(app.handles.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_unsatisfiable_range_releases_reference() {
    let engine = Arc::new(MockEngine::new());
    let app = TestApp::with_mock(engine.clone());

    let response = app.stream_movie(Some("bytes=9000-9500")).await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */1000");
    assert_eq!(app.ref_count(movie_hash()).await, Some(0));
    assert_eq!(engine.handle(movie_hash()).unwrap().reads_opened(), 0);
}

#[tokio::test]
async fn test_malformed_range_is_bad_request() {
    let engine = Arc::new(MockEngine::new());
    let app = TestApp::with_mock(engine.clone());

    for range in ["bytes=abc-", "items=0-10", "bytes=0-1,5-9", "bytes=-"] {
        let response = app.stream_movie(Some(range)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{range}");
    }
    assert_eq!(engine.add_calls(), 0);
}

#[tokio::test]
async fn test_unknown_content_and_hash_are_not_found() {
    let engine = Arc::new(MockEngine::new());
    let app = TestApp::with_mock(engine.clone());

    let response = app
        .get(&format!("/stream/nope/{}", movie_hash()), Some("bytes=0-"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let other = "00".repeat(20);
    let response = app
        .get(&format!("/stream/movie-1/{other}"), Some("bytes=0-"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/stream/movie-1/not-a-hash", Some("bytes=0-")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(engine.add_calls(), 0);
}

#[tokio::test]
async fn test_acquire_failure_is_opaque_server_error() {
    let engine = Arc::new(MockEngine::new());
    engine.fail_adds();
    let app = TestApp::with_mock(engine.clone());

    let response = app.stream_movie(Some("bytes=0-99")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(!message.contains("Mock add failure"), "{message}");
}

#[tokio::test]
async fn test_client_disconnect_releases_exactly_once() {
    let engine = Arc::new(MockEngine::new());
    engine.set_stream_behavior(StreamBehavior::StallAfterFirstChunk);
    let app = TestApp::with_mock(engine.clone());

    // A second consumer keeps the count observable above zero
    let held = app.handles.acquire(&movie_descriptor()).await.unwrap();

    let mut response = app.stream_movie(Some("bytes=0-999")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let first = response.body_mut().frame().await.unwrap().unwrap();
    assert_eq!(first.into_data().unwrap().len(), 64);
    assert_eq!(app.ref_count(movie_hash()).await, Some(2));

    drop(response);
    assert_eq!(app.ref_count(movie_hash()).await, Some(1));

    drop(held);
    assert_eq!(app.ref_count(movie_hash()).await, Some(0));
}

#[tokio::test]
async fn test_mid_stream_error_releases_exactly_once() {
    let engine = Arc::new(MockEngine::new());
    engine.set_stream_behavior(StreamBehavior::FailAfterFirstChunk);
    let app = TestApp::with_mock(engine.clone());
    let held = app.handles.acquire(&movie_descriptor()).await.unwrap();

    let response = app.stream_movie(Some("bytes=0-999")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert!(response.into_body().collect().await.is_err());

    assert_eq!(app.ref_count(movie_hash()).await, Some(1));
    drop(held);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_handle() {
    let engine = Arc::new(MockEngine::new());
    let app = TestApp::with_mock(engine.clone());

    let responses = futures::future::join_all(
        (0..8).map(|i| {
            let range = format!("bytes={}-{}", i * 100, i * 100 + 99);
            let app = &app;
            async move { app.stream_movie(Some(range.as_str())).await }
        }),
    )
    .await;

    for response in responses {
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_bytes(response).await.len(), 100);
    }
    assert_eq!(engine.add_calls(), 1);
    assert_eq!(app.ref_count(movie_hash()).await, Some(0));
}

#[tokio::test]
async fn test_stats_endpoint_reports_registry() {
    let app = TestApp::with_mock(Arc::new(MockEngine::new()));
    let _held = app.handles.acquire(&movie_descriptor()).await.unwrap();

    let response = app.get("/api/handles/stats", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stats: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["referenced"], 1);
    assert_eq!(stats["entries"][0]["info_hash"], movie_hash().to_string());
    assert_eq!(stats["entries"][0]["ref_count"], 1);
    assert_eq!(stats["entries"][0]["name"], "movie.mp4");
    assert_eq!(stats["entries"][0]["progress_percent"], 100);
    assert_eq!(stats["entries"][0]["download_speed"], 0);
}

#[tokio::test]
async fn test_stats_endpoint_unavailable_after_shutdown() {
    let app = TestApp::with_mock(Arc::new(MockEngine::new()));
    app.handles.shutdown().await.unwrap();

    let response = app.get("/api/handles/stats", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app.stream_movie(Some("bytes=0-99")).await;
    assert!(response.status().is_server_error());
}

#[tokio::test]
async fn test_health_reports_mode() {
    let app = TestApp::with_mock(Arc::new(MockEngine::new()));

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["mode"], "DEVELOPMENT");
}

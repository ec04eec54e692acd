//! Streaming local library content through the directory engine

use std::sync::Arc;

use axum::http::{StatusCode, header};
use streamify_core::catalog::{InMemoryCatalog, SourceDescriptor};
use streamify_core::config::StreamifyConfig;
use streamify_core::engine::DirectoryEngine;
use tempfile::TempDir;

use crate::common::{TestApp, body_bytes, header_str};

fn movie_bytes() -> Vec<u8> {
    (0..5000u32).map(|i| (i * 7 % 256) as u8).collect()
}

async fn library() -> (TempDir, TestApp, String) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not a video").unwrap();
    std::fs::write(dir.path().join("movie.webm"), movie_bytes()).unwrap();

    let locator = dir.path().to_string_lossy().into_owned();
    let hash = DirectoryEngine::info_hash_of(&locator).await.unwrap();

    let config = StreamifyConfig::for_testing();
    let catalog = InMemoryCatalog::new();
    catalog.insert("library", SourceDescriptor::new(hash, locator));
    let app = TestApp::new(
        Arc::new(DirectoryEngine::new(&config.engine)),
        Arc::new(catalog),
        &config,
    );
    (dir, app, format!("/stream/library/{hash}"))
}

#[tokio::test]
async fn test_serves_media_file_bytes() {
    let (_dir, app, uri) = library().await;

    let response = app.get(&uri, Some("bytes=1000-2999")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/webm");
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 1000-2999/5000");
    let body = body_bytes(response).await;
    assert_eq!(body.as_ref(), &movie_bytes()[1000..3000]);
}

#[tokio::test]
async fn test_suffix_range_reads_file_tail() {
    let (_dir, app, uri) = library().await;

    let response = app.get(&uri, Some("bytes=-300")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 4700-4999/5000");
    assert_eq!(body_bytes(response).await.as_ref(), &movie_bytes()[4700..]);
}

#[tokio::test]
async fn test_directory_without_media_is_not_found() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("readme.txt"), b"nothing to watch").unwrap();
    let locator = dir.path().to_string_lossy().into_owned();
    let hash = DirectoryEngine::info_hash_of(&locator).await.unwrap();

    let config = StreamifyConfig::for_testing();
    let catalog = InMemoryCatalog::new();
    catalog.insert("empty", SourceDescriptor::new(hash, locator));
    let app = TestApp::new(
        Arc::new(DirectoryEngine::new(&config.engine)),
        Arc::new(catalog),
        &config,
    );

    let response = app.get(&format!("/stream/empty/{hash}"), Some("bytes=0-")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.ref_count(hash).await, Some(0));
}

//! Shared fixtures for integration tests

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use bytes::Bytes;
use http_body_util::BodyExt;
use streamify_core::catalog::{Catalog, InMemoryCatalog, SourceDescriptor};
use streamify_core::config::StreamifyConfig;
use streamify_core::engine::{DownloadEngine, InfoHash, MockEngine, mock_locator};
use streamify_core::handles::{HandleManager, spawn_handle_manager};
use streamify_core::{RuntimeMode, StreamingService};
use streamify_web::{AppState, router};
use tower::ServiceExt;

pub const CONTENT_ID: &str = "movie-1";

/// Hash of the 1000-byte `movie.mp4` served under [`CONTENT_ID`].
pub fn movie_hash() -> InfoHash {
    InfoHash::new([0xAB; 20])
}

pub fn descriptor(byte: u8) -> SourceDescriptor {
    let hash = InfoHash::new([byte; 20]);
    SourceDescriptor::new(hash, mock_locator(hash, "movie.mp4", 1000))
}

pub fn movie_descriptor() -> SourceDescriptor {
    SourceDescriptor::new(movie_hash(), mock_locator(movie_hash(), "movie.mp4", 1000))
}

/// Router plus the pieces tests inspect.
pub struct TestApp {
    pub app: Router,
    pub handles: HandleManager,
}

impl TestApp {
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        catalog: Arc<dyn Catalog>,
        config: &StreamifyConfig,
    ) -> Self {
        let handles = spawn_handle_manager(engine, config);
        let streaming = StreamingService::new(catalog, handles.clone(), config.streaming.clone());
        let app = router(AppState::new(streaming, RuntimeMode::Development));
        Self { app, handles }
    }

    /// App over `engine` with [`movie_descriptor`] under [`CONTENT_ID`].
    pub fn with_mock(engine: Arc<MockEngine>) -> Self {
        let catalog = InMemoryCatalog::new();
        catalog.insert(CONTENT_ID, movie_descriptor());
        Self::new(engine, Arc::new(catalog), &StreamifyConfig::for_testing())
    }

    pub async fn get(&self, uri: &str, range: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().uri(uri);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }
        self.app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn stream_movie(&self, range: Option<&str>) -> Response<Body> {
        self.get(&format!("/stream/{CONTENT_ID}/{}", movie_hash()), range)
            .await
    }

    pub async fn ref_count(&self, hash: InfoHash) -> Option<u32> {
        self.handles.stats().await.unwrap().ref_count(hash)
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub fn header_str<'a>(response: &'a Response<Body>, name: header::HeaderName) -> &'a str {
    response.headers()[name].to_str().unwrap()
}

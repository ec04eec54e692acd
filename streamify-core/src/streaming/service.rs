//! Streaming request orchestration.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use super::{
    LeasedByteStream, PriorityPlan, RangeWindow, StreamingError, content_type_for,
    parse_range_header, select_playable_file,
};
use crate::catalog::{Catalog, SourceDescriptor};
use crate::config::StreamingConfig;
use crate::engine::InfoHash;
use crate::handles::HandleManager;

/// A prioritized partial-content stream ready to be sent.
#[derive(Debug)]
pub struct RangeStream {
    pub window: RangeWindow,
    pub file_length: u64,
    pub file_name: String,
    pub content_type: String,
    pub body: LeasedByteStream,
}

impl RangeStream {
    /// `Content-Range` header value.
    pub fn content_range(&self) -> String {
        self.window.content_range(self.file_length)
    }

    /// `Content-Length` of the body.
    pub fn content_length(&self) -> u64 {
        self.window.byte_count()
    }
}

/// Serves range requests for catalog content over shared handles.
#[derive(Clone)]
pub struct StreamingService {
    catalog: Arc<dyn Catalog>,
    handles: HandleManager,
    config: StreamingConfig,
}

impl StreamingService {
    pub fn new(catalog: Arc<dyn Catalog>, handles: HandleManager, config: StreamingConfig) -> Self {
        Self {
            catalog,
            handles,
            config,
        }
    }

    pub fn handles(&self) -> &HandleManager {
        &self.handles
    }

    /// Opens a prioritized stream over the requested bytes of `hash`.
    ///
    /// The Range header is validated before anything is acquired. Once a
    /// lease is held, every failure path drops it, so a failed request
    /// leaves no net reference behind.
    ///
    /// # Errors
    /// - `StreamingError::RangeRequired` - No Range header
    /// - `StreamingError::RangeMalformed` - Range header cannot be parsed
    /// - `StreamingError::NotFound` - Unknown content or hash not among its sources
    /// - `StreamingError::Acquire` - Handle acquisition failed or timed out
    /// - `StreamingError::NoPlayableFile` - Handle has no media file
    /// - `StreamingError::RangeInvalid` - Range lies outside the file
    /// - `StreamingError::Stream` - Engine refused to open the read
    pub async fn stream(
        &self,
        content_id: &str,
        hash: InfoHash,
        range_header: Option<&str>,
    ) -> Result<RangeStream, StreamingError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("stream", %request_id, content_id, %hash);

        async move {
            let result = self.open(content_id, hash, range_header).await;
            match &result {
                Ok(stream) => tracing::info!(
                    range = %stream.content_range(),
                    file = %stream.file_name,
                    "Streaming range"
                ),
                Err(error) if error.is_client_error() => {
                    tracing::debug!(%error, "Rejected range request")
                }
                Err(error) => tracing::error!(%error, "Range request failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn open(
        &self,
        content_id: &str,
        hash: InfoHash,
        range_header: Option<&str>,
    ) -> Result<RangeStream, StreamingError> {
        let spec = parse_range_header(range_header.ok_or(StreamingError::RangeRequired)?)?;
        let descriptor = self.resolve_source(content_id, hash).await?;

        let lease = self.handles.acquire(&descriptor).await?;

        let file_index = select_playable_file(lease.files())
            .ok_or(StreamingError::NoPlayableFile { info_hash: hash })?;
        let file = lease.files()[file_index].clone();
        let window = spec.resolve(file.length)?;

        let plan = PriorityPlan::compute(
            &file,
            window,
            lease.piece_length(),
            lease.piece_count(),
            &self.config,
        );
        plan.apply(lease.handle().as_ref());

        let bytes = lease
            .open_read(file_index, window.start, window.end)
            .map_err(|e| StreamingError::Stream {
                reason: e.to_string(),
            })?;

        Ok(RangeStream {
            window,
            file_length: file.length,
            content_type: content_type_for(&file.name),
            file_name: file.name,
            body: LeasedByteStream::new(bytes, lease, window.byte_count()),
        })
    }

    async fn resolve_source(
        &self,
        content_id: &str,
        hash: InfoHash,
    ) -> Result<SourceDescriptor, StreamingError> {
        self.catalog
            .lookup(content_id)
            .await?
            .into_iter()
            .find(|source| source.hash == hash)
            .ok_or_else(|| StreamingError::NotFound {
                content_id: content_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::config::StreamifyConfig;
    use crate::engine::{MockEngine, MockHandle, mock_locator};
    use crate::handles::{HandleError, spawn_handle_manager};

    struct Fixture {
        engine: Arc<MockEngine>,
        service: StreamingService,
        hash: InfoHash,
    }

    fn fixture(engine: MockEngine) -> Fixture {
        let engine = Arc::new(engine);
        let config = StreamifyConfig::for_testing();
        let handles = spawn_handle_manager(engine.clone(), &config);

        let hash = InfoHash::new([9; 20]);
        let catalog = InMemoryCatalog::new();
        catalog.insert(
            "movie-1",
            SourceDescriptor::new(hash, mock_locator(hash, "movie.mp4", 1000)),
        );

        let service = StreamingService::new(Arc::new(catalog), handles, config.streaming);
        Fixture {
            engine,
            service,
            hash,
        }
    }

    #[tokio::test]
    async fn test_stream_serves_requested_bytes() {
        let f = fixture(MockEngine::new());

        let stream = f
            .service
            .stream("movie-1", f.hash, Some("bytes=200-499"))
            .await
            .unwrap();
        assert_eq!(stream.content_range(), "bytes 200-499/1000");
        assert_eq!(stream.content_length(), 300);
        assert_eq!(stream.content_type, "video/mp4");

        let chunks: Vec<_> = stream.body.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.concat();
        let expected: Vec<u8> = (200..500).map(MockHandle::byte_at).collect();
        assert_eq!(body, expected);

        let stats = f.service.handles().stats().await.unwrap();
        assert_eq!(stats.ref_count(f.hash), Some(0));
    }

    #[tokio::test]
    async fn test_plan_applied_before_read() {
        let f = fixture(MockEngine::new());

        let _stream = f
            .service
            .stream("movie-1", f.hash, Some("bytes=250-"))
            .await
            .unwrap();

        let mock = f.engine.handle(f.hash).unwrap();
        assert_eq!(mock.critical_ranges(), vec![(2, 9)]);
        assert_eq!(mock.reads_opened(), 1);
    }

    #[tokio::test]
    async fn test_missing_range_acquires_nothing() {
        let f = fixture(MockEngine::new());

        let result = f.service.stream("movie-1", f.hash, None).await;
        assert!(matches!(result, Err(StreamingError::RangeRequired)));
        assert_eq!(f.engine.add_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_content_and_hash() {
        let f = fixture(MockEngine::new());

        let result = f.service.stream("nope", f.hash, Some("bytes=0-")).await;
        assert!(matches!(result, Err(StreamingError::NotFound { .. })));

        let other = InfoHash::new([1; 20]);
        let result = f.service.stream("movie-1", other, Some("bytes=0-")).await;
        assert!(matches!(result, Err(StreamingError::NotFound { .. })));
        assert_eq!(f.engine.add_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_playable_file_releases_lease() {
        let f = fixture(MockEngine::new());
        let hash = InfoHash::new([4; 20]);
        let catalog = InMemoryCatalog::new();
        catalog.insert(
            "docs",
            SourceDescriptor::new(hash, mock_locator(hash, "readme.txt", 100)),
        );
        let service = StreamingService::new(
            Arc::new(catalog),
            f.service.handles().clone(),
            StreamingConfig::default(),
        );

        let result = service.stream("docs", hash, Some("bytes=0-")).await;
        assert!(matches!(result, Err(StreamingError::NoPlayableFile { .. })));

        let stats = service.handles().stats().await.unwrap();
        assert_eq!(stats.ref_count(hash), Some(0));
    }

    #[tokio::test]
    async fn test_acquire_failure_surfaces() {
        let engine = MockEngine::new();
        engine.fail_adds();
        let f = fixture(engine);

        let result = f.service.stream("movie-1", f.hash, Some("bytes=0-")).await;
        assert!(matches!(
            result,
            Err(StreamingError::Acquire(HandleError::AcquireFailed { .. }))
        ));
    }
}

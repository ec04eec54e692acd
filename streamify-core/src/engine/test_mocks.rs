//! Mock download engine for testing the handle manager and streaming.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{
    AddOptions, ByteStream, DownloadEngine, EngineError, InfoHash, MagnetLocator, PiecePriority,
    TorrentFile, TorrentHandle, check_read_bounds, piece_count_for,
};

const MOCK_PIECE_LENGTH: u64 = 100;
const MOCK_CHUNK_SIZE: usize = 64;

/// How [`MockEngine::add`] behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AddBehavior {
    Succeed,
    Fail,
    Hang,
}

/// How byte streams from a [`MockHandle`] behave after the first chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamBehavior {
    /// Deliver every requested byte
    #[default]
    Complete,
    /// Deliver one chunk, then never resolve again
    StallAfterFirstChunk,
    /// Deliver one chunk, then yield an I/O error
    FailAfterFirstChunk,
}

/// Mock engine that counts calls and supports failure injection.
///
/// Locators must be magnet URIs; `xl` sets the size of the single
/// `dn`-named file (default `movie.mp4`, 1000 bytes).
pub struct MockEngine {
    handles: Mutex<HashMap<InfoHash, Arc<MockHandle>>>,
    add_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    lookup_misses: AtomicUsize,
    add_delay: Mutex<Duration>,
    add_behavior: Mutex<AddBehavior>,
    stream_behavior: Mutex<StreamBehavior>,
    extra_files: Mutex<Vec<TorrentFile>>,
}

impl MockEngine {
    /// Creates a mock engine whose adds succeed immediately.
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            lookup_misses: AtomicUsize::new(0),
            add_delay: Mutex::new(Duration::ZERO),
            add_behavior: Mutex::new(AddBehavior::Succeed),
            stream_behavior: Mutex::new(StreamBehavior::Complete),
            extra_files: Mutex::new(Vec::new()),
        }
    }

    /// Delays every add by `delay` before it resolves.
    pub fn with_add_delay(self, delay: Duration) -> Self {
        *self.add_delay.lock() = delay;
        self
    }

    /// Appends non-primary files to every new handle, after the main file.
    pub fn with_extra_files(self, files: Vec<(&str, u64)>) -> Self {
        *self.extra_files.lock() = files
            .into_iter()
            .map(|(name, length)| TorrentFile::new(name, length, 0))
            .collect();
        self
    }

    /// Makes subsequent adds fail with `SourceUnavailable`.
    pub fn fail_adds(&self) {
        *self.add_behavior.lock() = AddBehavior::Fail;
    }

    /// Makes subsequent adds never resolve.
    pub fn hang_adds(&self) {
        *self.add_behavior.lock() = AddBehavior::Hang;
    }

    /// Restores successful adds.
    pub fn succeed_adds(&self) {
        *self.add_behavior.lock() = AddBehavior::Succeed;
    }

    /// Sets the stream behavior for handles created afterwards.
    pub fn set_stream_behavior(&self, behavior: StreamBehavior) {
        *self.stream_behavior.lock() = behavior;
    }

    /// Makes the next `count` lookups miss even if a handle exists.
    ///
    /// Models an engine whose index lags behind its own adds, which forces
    /// the caller down the duplicate-add path.
    pub fn miss_next_lookups(&self, count: usize) {
        self.lookup_misses.store(count, Ordering::SeqCst);
    }

    /// Registers a handle as if it had been added outside the manager.
    pub fn insert_external(&self, locator: &str) -> Arc<MockHandle> {
        let handle = self.build_handle(locator).expect("valid mock locator");
        self.handles.lock().insert(handle.info_hash, handle.clone());
        handle
    }

    /// Number of times `add` was called.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Number of successful `remove` calls.
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Whether the engine currently holds a handle for `info_hash`.
    pub fn contains(&self, info_hash: InfoHash) -> bool {
        self.handles.lock().contains_key(&info_hash)
    }

    /// Returns the concrete mock handle for inspection.
    pub fn handle(&self, info_hash: InfoHash) -> Option<Arc<MockHandle>> {
        self.handles.lock().get(&info_hash).cloned()
    }

    fn build_handle(&self, locator: &str) -> Result<Arc<MockHandle>, EngineError> {
        let magnet = MagnetLocator::parse(locator)?;
        let main_name = magnet
            .display_name
            .unwrap_or_else(|| "movie.mp4".to_string());
        let main_length = magnet.exact_length.unwrap_or(1000);

        let mut files = vec![TorrentFile::new(main_name, main_length, 0)];
        let mut offset = main_length;
        for extra in self.extra_files.lock().iter() {
            files.push(TorrentFile::new(extra.name.clone(), extra.length, offset));
            offset += extra.length;
        }

        Ok(Arc::new(MockHandle::new(
            magnet.info_hash,
            files,
            *self.stream_behavior.lock(),
        )))
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn add(
        &self,
        locator: &str,
        _options: &AddOptions,
    ) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.add_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.add_behavior.lock().clone();
        match behavior {
            AddBehavior::Fail => Err(EngineError::SourceUnavailable {
                reason: "Mock add failure".to_string(),
            }),
            AddBehavior::Hang => futures::future::pending().await,
            AddBehavior::Succeed => {
                let handle = self.build_handle(locator)?;
                let mut handles = self.handles.lock();
                if handles.contains_key(&handle.info_hash) {
                    return Err(EngineError::DuplicateHandle {
                        info_hash: handle.info_hash,
                    });
                }
                handles.insert(handle.info_hash, handle.clone());
                Ok(handle)
            }
        }
    }

    async fn get(&self, info_hash: InfoHash) -> Option<Arc<dyn TorrentHandle>> {
        let missed = self
            .lookup_misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return None;
        }

        self.handles
            .lock()
            .get(&info_hash)
            .map(|handle| handle.clone() as Arc<dyn TorrentHandle>)
    }

    async fn remove(&self, info_hash: InfoHash, _destroy_store: bool) -> Result<(), EngineError> {
        let handle = self
            .handles
            .lock()
            .remove(&info_hash)
            .ok_or(EngineError::HandleNotFound { info_hash })?;
        handle.destroyed.store(true, Ordering::SeqCst);
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock handle with deterministic content and recorded priority calls.
pub struct MockHandle {
    info_hash: InfoHash,
    files: Vec<TorrentFile>,
    piece_count: u32,
    stream_behavior: StreamBehavior,
    priorities: Mutex<Vec<PiecePriority>>,
    critical_ranges: Mutex<Vec<(u32, u32)>>,
    reads_opened: AtomicUsize,
    destroyed: AtomicBool,
}

impl MockHandle {
    fn new(info_hash: InfoHash, files: Vec<TorrentFile>, stream_behavior: StreamBehavior) -> Self {
        let total: u64 = files.iter().map(|f| f.length).sum();
        let piece_count = piece_count_for(total, MOCK_PIECE_LENGTH);
        Self {
            info_hash,
            files,
            piece_count,
            stream_behavior,
            // Unselected pieces report Low so the background pass is observable
            priorities: Mutex::new(vec![PiecePriority::Low; piece_count as usize]),
            critical_ranges: Mutex::new(Vec::new()),
            reads_opened: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Byte value at an absolute torrent offset.
    pub fn byte_at(offset: u64) -> u8 {
        (offset % 251) as u8
    }

    /// Current priority of every piece.
    pub fn priorities(&self) -> Vec<PiecePriority> {
        self.priorities.lock().clone()
    }

    /// Every `mark_critical` call in order.
    pub fn critical_ranges(&self) -> Vec<(u32, u32)> {
        self.critical_ranges.lock().clone()
    }

    /// Number of byte streams opened.
    pub fn reads_opened(&self) -> usize {
        self.reads_opened.load(Ordering::SeqCst)
    }

    /// Whether the engine destroyed this handle.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl TorrentHandle for MockHandle {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> &str {
        &self.files[0].name
    }

    fn piece_length(&self) -> u64 {
        MOCK_PIECE_LENGTH
    }

    fn piece_count(&self) -> u32 {
        self.piece_count
    }

    fn files(&self) -> &[TorrentFile] {
        &self.files
    }

    fn select(&self, pieces: RangeInclusive<u32>, priority: PiecePriority) {
        let mut priorities = self.priorities.lock();
        for index in pieces {
            if let Some(slot) = priorities.get_mut(index as usize) {
                *slot = priority;
            }
        }
    }

    fn mark_critical(&self, start_piece: u32, end_piece: u32) {
        self.critical_ranges.lock().push((start_piece, end_piece));
    }

    fn open_read(
        &self,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, EngineError> {
        let file = check_read_bounds(&self.files, file_index, start, end)?;
        self.reads_opened.fetch_add(1, Ordering::SeqCst);

        let base = file.offset;
        let chunks: Vec<Bytes> = (start..=end)
            .step_by(MOCK_CHUNK_SIZE)
            .map(|chunk_start| {
                let chunk_end = (chunk_start + MOCK_CHUNK_SIZE as u64 - 1).min(end);
                (chunk_start..=chunk_end)
                    .map(|pos| Self::byte_at(base + pos))
                    .collect::<Vec<u8>>()
                    .into()
            })
            .collect();

        let stream = match self.stream_behavior {
            StreamBehavior::Complete => futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
            StreamBehavior::StallAfterFirstChunk => {
                futures::stream::iter(chunks.into_iter().take(1).map(Ok))
                    .chain(futures::stream::pending())
                    .boxed()
            }
            StreamBehavior::FailAfterFirstChunk => {
                let error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock peer reset");
                futures::stream::iter(chunks.into_iter().take(1).map(Ok))
                    .chain(futures::stream::once(async move { Err(error) }))
                    .boxed()
            }
        };

        Ok(stream)
    }
}

/// Builds a magnet locator accepted by [`MockEngine`].
pub fn mock_locator(info_hash: InfoHash, name: &str, length: u64) -> String {
    format!("magnet:?xt=urn:btih:{info_hash}&dn={name}&xl={length}")
}

//! Directory-backed download engine.
//!
//! Treats a local file or directory as a torrent whose pieces are already
//! complete. Piece geometry is computed from the configured piece length so
//! the range-to-priority pipeline behaves exactly as it does for a live swarm.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

use super::{
    AddOptions, ByteStream, DownloadEngine, EngineError, InfoHash, PiecePriority, TorrentFile,
    TorrentHandle, check_read_bounds, piece_count_for,
};
use crate::config::EngineConfig;

/// Engine serving already-downloaded content from the local filesystem.
pub struct DirectoryEngine {
    piece_length: u64,
    read_chunk_size: usize,
    handles: RwLock<HashMap<InfoHash, Arc<DirectoryHandle>>>,
}

impl DirectoryEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            piece_length: config.piece_length.max(1),
            read_chunk_size: config.read_chunk_size.max(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a locator to a local path.
    ///
    /// Accepts `file://` URLs and plain paths.
    ///
    /// # Errors
    /// - `EngineError::InvalidLocator` - Unsupported scheme or malformed URL
    pub fn locator_path(locator: &str) -> Result<PathBuf, EngineError> {
        if !locator.contains("://") {
            return Ok(PathBuf::from(locator));
        }

        let invalid = |reason: &str| EngineError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(locator).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "file" {
            return Err(invalid("directory engine only accepts file:// locators"));
        }
        url.to_file_path()
            .map_err(|_| invalid("URL does not name a local path"))
    }

    /// Info hash for a canonical content path.
    pub fn info_hash_for(path: &Path) -> InfoHash {
        let digest = Sha1::digest(path.to_string_lossy().as_bytes());
        InfoHash::new(digest.into())
    }

    /// Resolves the info hash a locator will be registered under.
    ///
    /// # Errors
    /// - `EngineError::InvalidLocator` - Locator is unusable or path missing
    pub async fn info_hash_of(locator: &str) -> Result<InfoHash, EngineError> {
        let path = Self::locator_path(locator)?;
        let canonical = fs::canonicalize(&path)
            .await
            .map_err(|e| EngineError::InvalidLocator {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::info_hash_for(&canonical))
    }
}

#[async_trait]
impl DownloadEngine for DirectoryEngine {
    async fn add(
        &self,
        locator: &str,
        options: &AddOptions,
    ) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        let path = Self::locator_path(locator)?;
        let root = fs::canonicalize(&path)
            .await
            .map_err(|e| EngineError::SourceUnavailable {
                reason: format!("{}: {e}", path.display()),
            })?;
        let info_hash = Self::info_hash_for(&root);

        if self.handles.read().contains_key(&info_hash) {
            return Err(EngineError::DuplicateHandle { info_hash });
        }

        let (files, paths) = scan_content(&root)
            .await
            .map_err(|e| EngineError::SourceUnavailable {
                reason: format!("{}: {e}", root.display()),
            })?;
        let total_length = files.iter().map(|f| f.length).sum();
        let piece_count = piece_count_for(total_length, self.piece_length);

        let handle = Arc::new(DirectoryHandle {
            info_hash,
            name: root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string()),
            files,
            paths,
            piece_length: self.piece_length,
            piece_count,
            read_chunk_size: self.read_chunk_size,
        });

        // Another add may have finished while we were scanning
        let mut handles = self.handles.write();
        if handles.contains_key(&info_hash) {
            return Err(EngineError::DuplicateHandle { info_hash });
        }
        handles.insert(info_hash, handle.clone());

        tracing::debug!(
            %info_hash,
            root = %root.display(),
            files = handle.files.len(),
            piece_count,
            skip_verify = options.skip_verify,
            "Directory content added"
        );

        Ok(handle)
    }

    async fn get(&self, info_hash: InfoHash) -> Option<Arc<dyn TorrentHandle>> {
        self.handles
            .read()
            .get(&info_hash)
            .map(|handle| handle.clone() as Arc<dyn TorrentHandle>)
    }

    async fn remove(&self, info_hash: InfoHash, destroy_store: bool) -> Result<(), EngineError> {
        self.handles
            .write()
            .remove(&info_hash)
            .ok_or(EngineError::HandleNotFound { info_hash })?;

        // Library content is owned by the user, never deleted
        tracing::debug!(%info_hash, destroy_store, "Directory content released");
        Ok(())
    }
}

/// Handle over local content whose pieces are all present.
pub struct DirectoryHandle {
    info_hash: InfoHash,
    name: String,
    files: Vec<TorrentFile>,
    paths: Vec<PathBuf>,
    piece_length: u64,
    piece_count: u32,
    read_chunk_size: usize,
}

impl TorrentHandle for DirectoryHandle {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn piece_length(&self) -> u64 {
        self.piece_length
    }

    fn piece_count(&self) -> u32 {
        self.piece_count
    }

    fn files(&self) -> &[TorrentFile] {
        &self.files
    }

    fn select(&self, pieces: RangeInclusive<u32>, priority: PiecePriority) {
        // Every piece is already on disk
        tracing::trace!(info_hash = %self.info_hash, ?pieces, ?priority, "Selection");
    }

    fn mark_critical(&self, start_piece: u32, end_piece: u32) {
        tracing::trace!(info_hash = %self.info_hash, start_piece, end_piece, "Critical range");
    }

    fn open_read(
        &self,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, EngineError> {
        check_read_bounds(&self.files, file_index, start, end)?;

        let state = ReadState {
            path: self.paths[file_index].clone(),
            file: None,
            position: start,
            end,
            chunk_size: self.read_chunk_size,
        };

        Ok(futures::stream::try_unfold(state, read_next_chunk).boxed())
    }
}

struct ReadState {
    path: PathBuf,
    file: Option<fs::File>,
    position: u64,
    end: u64,
    chunk_size: usize,
}

async fn read_next_chunk(mut state: ReadState) -> io::Result<Option<(Bytes, ReadState)>> {
    if state.position > state.end {
        return Ok(None);
    }

    let file = match state.file.as_mut() {
        Some(file) => file,
        None => {
            let mut file = fs::File::open(&state.path).await?;
            file.seek(SeekFrom::Start(state.position)).await?;
            state.file.insert(file)
        }
    };

    let remaining = state.end - state.position + 1;
    let mut buffer = vec![0u8; remaining.min(state.chunk_size as u64) as usize];
    let read = file.read(&mut buffer).await?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "file truncated during read",
        ));
    }
    buffer.truncate(read);
    state.position += read as u64;

    Ok(Some((Bytes::from(buffer), state)))
}

/// Lists regular files under `root` in a stable order with torrent offsets.
async fn scan_content(root: &Path) -> io::Result<(Vec<TorrentFile>, Vec<PathBuf>)> {
    let mut found = Vec::new();

    if fs::metadata(root).await?.is_file() {
        found.push(root.to_path_buf());
    } else {
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    found.push(entry.path());
                }
            }
        }
        found.sort();
    }

    let base = if found.len() == 1 && found[0] == root {
        root.parent().unwrap_or(root)
    } else {
        root
    };

    let mut files = Vec::with_capacity(found.len());
    let mut offset = 0;
    for path in &found {
        let length = fs::metadata(path).await?.len();
        let name = path
            .strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        files.push(TorrentFile::new(name, length, offset));
        offset += length;
    }

    Ok((files, found))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    fn engine() -> DirectoryEngine {
        DirectoryEngine::new(&EngineConfig {
            piece_length: 16,
            read_chunk_size: 7,
            ..Default::default()
        })
    }

    async fn write_library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.mp4"), (0u8..100).collect::<Vec<_>>())
            .await
            .unwrap();
        fs::create_dir(dir.path().join("extras")).await.unwrap();
        fs::write(dir.path().join("extras/readme.txt"), b"hello")
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_add_directory_computes_geometry() {
        let dir = write_library().await;
        let engine = engine();

        let handle = engine
            .add(dir.path().to_str().unwrap(), &AddOptions::default())
            .await
            .unwrap();

        let names: Vec<_> = handle.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["extras/readme.txt", "movie.mp4"]);
        assert_eq!(handle.files()[1].offset, 5);
        assert_eq!(handle.piece_count(), 7); // 105 bytes / 16
        assert!(engine.get(handle.info_hash()).await.is_some());
    }

    #[tokio::test]
    async fn test_second_add_reports_duplicate() {
        let dir = write_library().await;
        let engine = engine();
        let locator = Url::from_directory_path(dir.path()).unwrap().to_string();

        let handle = engine.add(&locator, &AddOptions::default()).await.unwrap();
        let err = engine
            .add(&locator, &AddOptions::default())
            .await
            .err()
            .unwrap();

        match err {
            EngineError::DuplicateHandle { info_hash } => {
                assert_eq!(info_hash, handle.info_hash())
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_read_returns_exact_range() {
        let dir = write_library().await;
        let engine = engine();
        let handle = engine
            .add(dir.path().to_str().unwrap(), &AddOptions::default())
            .await
            .unwrap();

        let chunks: Vec<Bytes> = handle.open_read(1, 10, 29).unwrap().try_collect().await.unwrap();
        let data: Vec<u8> = chunks.concat();
        assert_eq!(data, (10u8..30).collect::<Vec<_>>());
        assert!(chunks.iter().all(|c| c.len() <= 7));
    }

    #[tokio::test]
    async fn test_remove_keeps_files_on_disk() {
        let dir = write_library().await;
        let engine = engine();
        let handle = engine
            .add(dir.path().to_str().unwrap(), &AddOptions::default())
            .await
            .unwrap();

        engine.remove(handle.info_hash(), true).await.unwrap();
        assert!(engine.get(handle.info_hash()).await.is_none());
        assert!(dir.path().join("movie.mp4").exists());
        assert!(matches!(
            engine.remove(handle.info_hash(), true).await,
            Err(EngineError::HandleNotFound { .. })
        ));
    }

    #[test]
    fn test_locator_path_rejects_remote_urls() {
        assert!(DirectoryEngine::locator_path("https://example.com/x").is_err());
        assert_eq!(
            DirectoryEngine::locator_path("/srv/movies").unwrap(),
            PathBuf::from("/srv/movies")
        );
    }
}

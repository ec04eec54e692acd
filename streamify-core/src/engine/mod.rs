//! Download engine abstraction
//!
//! The peer-to-peer protocol itself lives behind [`DownloadEngine`]. The
//! handle manager only needs to add sources, look up and remove live
//! handles, and steer piece priorities on the returned [`TorrentHandle`].

pub mod directory;
pub mod magnet;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;
mod types;

use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use directory::DirectoryEngine;
pub use magnet::MagnetLocator;
#[cfg(any(test, feature = "test-utils"))]
pub use test_mocks::{MockEngine, MockHandle, StreamBehavior, mock_locator};
pub use types::{AddOptions, InfoHash, PiecePriority, TorrentFile};

/// Bounded byte stream produced by [`TorrentHandle::open_read`].
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Operations the handle manager consumes from a download engine.
///
/// Implementations own their handles; callers only ever hold shared
/// references and must never tear a handle down except through `remove`.
#[async_trait]
pub trait DownloadEngine: Send + Sync + 'static {
    /// Adds a source and resolves once its metadata is available.
    ///
    /// # Errors
    /// - `EngineError::DuplicateHandle` - Engine already has a live handle for this hash
    /// - `EngineError::InvalidLocator` - Locator cannot be interpreted by this engine
    /// - `EngineError::SourceUnavailable` - Source metadata could not be fetched
    async fn add(
        &self,
        locator: &str,
        options: &AddOptions,
    ) -> Result<Arc<dyn TorrentHandle>, EngineError>;

    /// Returns the live handle for `info_hash`, if the engine has one.
    async fn get(&self, info_hash: InfoHash) -> Option<Arc<dyn TorrentHandle>>;

    /// Destroys a handle, optionally deleting its backing storage.
    ///
    /// # Errors
    /// - `EngineError::HandleNotFound` - No live handle for this hash
    async fn remove(&self, info_hash: InfoHash, destroy_store: bool) -> Result<(), EngineError>;
}

/// Live engine-managed representation of one download.
pub trait TorrentHandle: Send + Sync {
    /// Info hash identifying the content.
    fn info_hash(&self) -> InfoHash;

    /// Display name of the content.
    fn name(&self) -> &str;

    /// Size of every piece except possibly the last, in bytes.
    fn piece_length(&self) -> u64;

    /// Number of pieces covering all files.
    fn piece_count(&self) -> u32;

    /// Files in torrent order.
    fn files(&self) -> &[TorrentFile];

    /// Fraction of pieces available locally, in `0.0..=1.0`.
    ///
    /// Engines serving already-complete content keep the default.
    fn progress(&self) -> f64 {
        1.0
    }

    /// Current download rate in bytes per second.
    fn download_speed(&self) -> u64 {
        0
    }

    /// Assigns `priority` to every piece in `pieces`.
    fn select(&self, pieces: RangeInclusive<u32>, priority: PiecePriority);

    /// Marks pieces as needed immediately by a blocked reader.
    fn mark_critical(&self, start_piece: u32, end_piece: u32);

    /// Opens a read over the inclusive byte range `[start, end]` of a file.
    ///
    /// # Errors
    /// - `EngineError::FileIndexOutOfRange` - No file at `file_index`
    /// - `EngineError::ByteRangeOutOfBounds` - Range exceeds the file
    fn open_read(&self, file_index: usize, start: u64, end: u64)
    -> Result<ByteStream, EngineError>;
}

impl std::fmt::Debug for dyn TorrentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentHandle")
            .field("info_hash", &self.info_hash())
            .field("name", &self.name())
            .field("piece_count", &self.piece_count())
            .finish()
    }
}

/// Errors reported by download engines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Engine already has a live handle for {info_hash}")]
    DuplicateHandle { info_hash: InfoHash },

    #[error("Invalid locator {locator}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("Invalid info hash: {value}")]
    InvalidInfoHash { value: String },

    #[error("Handle {info_hash} not found")]
    HandleNotFound { info_hash: InfoHash },

    #[error("Source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("File index {index} out of range")]
    FileIndexOutOfRange { index: usize },

    #[error("Byte range {start}-{end} outside file of {length} bytes")]
    ByteRangeOutOfBounds { start: u64, end: u64, length: u64 },

    #[error("Engine is shut down")]
    EngineShutdown,
}

/// Validates a read request against a file and returns its file index.
///
/// Shared by engine implementations so every `open_read` enforces the
/// same bounds.
///
/// # Errors
/// - `EngineError::FileIndexOutOfRange` - No file at `file_index`
/// - `EngineError::ByteRangeOutOfBounds` - `start > end` or `end` past the file
pub fn check_read_bounds(
    files: &[TorrentFile],
    file_index: usize,
    start: u64,
    end: u64,
) -> Result<&TorrentFile, EngineError> {
    let file = files
        .get(file_index)
        .ok_or(EngineError::FileIndexOutOfRange { index: file_index })?;

    if start > end || end >= file.length {
        return Err(EngineError::ByteRangeOutOfBounds {
            start,
            end,
            length: file.length,
        });
    }

    Ok(file)
}

/// Splits `total_length` bytes into pieces of `piece_length`.
pub fn piece_count_for(total_length: u64, piece_length: u64) -> u32 {
    if piece_length == 0 {
        return 0;
    }
    total_length.div_ceil(piece_length) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<TorrentFile> {
        vec![
            TorrentFile::new("a.mkv", 100, 0),
            TorrentFile::new("b.srt", 10, 100),
        ]
    }

    #[test]
    fn test_check_read_bounds() {
        let files = files();
        assert!(check_read_bounds(&files, 0, 0, 99).is_ok());
        assert!(check_read_bounds(&files, 1, 5, 9).is_ok());
        assert!(matches!(
            check_read_bounds(&files, 0, 50, 100),
            Err(EngineError::ByteRangeOutOfBounds { length: 100, .. })
        ));
        assert!(matches!(
            check_read_bounds(&files, 2, 0, 0),
            Err(EngineError::FileIndexOutOfRange { index: 2 })
        ));
    }

    #[test]
    fn test_piece_count_for() {
        assert_eq!(piece_count_for(0, 16), 0);
        assert_eq!(piece_count_for(16, 16), 1);
        assert_eq!(piece_count_for(17, 16), 2);
        assert_eq!(piece_count_for(10, 0), 0);
    }
}

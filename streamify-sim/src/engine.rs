//! Simulated download engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use streamify_core::engine::{
    AddOptions, DownloadEngine, EngineError, InfoHash, MagnetLocator, TorrentFile, TorrentHandle,
};

use crate::SimulationConfig;
use crate::handle::SimulatedHandle;

const SAMPLE_DIVISOR: u64 = 50;
const NFO_SIZE: u64 = 2 * 1024;

/// Engine that fabricates deterministic content for magnet locators.
///
/// Each add produces a torrent with a short sample clip, the main file
/// named by `dn` (sized by `xl`), and a small `.nfo` file, in that order.
pub struct SimulatedEngine {
    config: SimulationConfig,
    handles: RwLock<HashMap<InfoHash, Arc<SimulatedHandle>>>,
}

impl SimulatedEngine {
    /// Creates an engine with no live handles.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Concrete handle for inspection in tests and diagnostics.
    pub fn simulated_handle(&self, info_hash: InfoHash) -> Option<Arc<SimulatedHandle>> {
        self.handles.read().get(&info_hash).cloned()
    }

    /// Number of live handles.
    pub fn handle_count(&self) -> usize {
        self.handles.read().len()
    }

    fn layout(&self, magnet: &MagnetLocator) -> (String, Vec<TorrentFile>) {
        let main_name = magnet
            .display_name
            .clone()
            .unwrap_or_else(|| format!("{}.mp4", magnet.info_hash));
        let main_length = magnet
            .exact_length
            .unwrap_or(self.config.default_file_size)
            .max(1);

        let stem = main_name
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| main_name.clone());
        let sample_length = (main_length / SAMPLE_DIVISOR).max(1);

        let mut files = Vec::with_capacity(3);
        let mut offset = 0;
        for (name, length) in [
            ("sample.mp4".to_string(), sample_length),
            (main_name.clone(), main_length),
            (format!("{stem}.nfo"), NFO_SIZE),
        ] {
            files.push(TorrentFile::new(name, length, offset));
            offset += length;
        }

        (stem, files)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

#[async_trait]
impl DownloadEngine for SimulatedEngine {
    async fn add(
        &self,
        locator: &str,
        options: &AddOptions,
    ) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        let magnet = MagnetLocator::parse(locator)?;

        if !self.config.metadata_delay.is_zero() {
            tokio::time::sleep(self.config.metadata_delay).await;
        }

        let (name, files) = self.layout(&magnet);
        let instant = self.config.piece_latency.is_zero();
        let handle = Arc::new(SimulatedHandle::new(
            magnet.info_hash,
            name,
            files,
            self.config.seed,
            self.config.piece_length,
            instant,
        ));

        {
            let mut handles = self.handles.write();
            if handles.contains_key(&magnet.info_hash) {
                return Err(EngineError::DuplicateHandle {
                    info_hash: magnet.info_hash,
                });
            }
            handles.insert(magnet.info_hash, handle.clone());
        }

        if !instant {
            handle.spawn_downloader(self.config.piece_latency);
        }

        tracing::info!(
            info_hash = %magnet.info_hash,
            name = handle.name(),
            pieces = handle.piece_count(),
            trackers = magnet.trackers.len(),
            max_web_conns = options.max_web_conns,
            "Simulated handle added"
        );
        Ok(handle)
    }

    async fn get(&self, info_hash: InfoHash) -> Option<Arc<dyn TorrentHandle>> {
        self.simulated_handle(info_hash)
            .map(|handle| handle as Arc<dyn TorrentHandle>)
    }

    async fn remove(&self, info_hash: InfoHash, destroy_store: bool) -> Result<(), EngineError> {
        let handle = self
            .handles
            .write()
            .remove(&info_hash)
            .ok_or(EngineError::HandleNotFound { info_hash })?;

        handle.destroy();
        tracing::info!(%info_hash, destroy_store, "Simulated handle removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::TryStreamExt;
    use streamify_core::engine::{PiecePriority, mock_locator};

    use super::*;

    fn locator(byte: u8, length: u64) -> (InfoHash, String) {
        let hash = InfoHash::new([byte; 20]);
        (hash, mock_locator(hash, "Big.Movie.mkv", length))
    }

    fn slow_config() -> SimulationConfig {
        SimulationConfig {
            piece_length: 100,
            piece_latency: Duration::from_millis(10),
            metadata_delay: Duration::ZERO,
            ..SimulationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_layout_has_sample_main_and_nfo() {
        let engine = SimulatedEngine::new(SimulationConfig::instant());
        let (_, locator) = locator(1, 10_000);

        let handle = engine.add(&locator, &AddOptions::default()).await.unwrap();
        let files = handle.files();

        assert_eq!(handle.name(), "Big.Movie");
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].name, "sample.mp4");
        assert_eq!(files[0].length, 200);
        assert_eq!(files[1].name, "Big.Movie.mkv");
        assert_eq!(files[1].offset, 200);
        assert_eq!(files[2].name, "Big.Movie.nfo");
        assert_eq!(handle.piece_count(), (200 + 10_000 + 2048u64).div_ceil(1024) as u32);
    }

    #[tokio::test]
    async fn test_duplicate_add_is_reported() {
        let engine = SimulatedEngine::new(SimulationConfig::instant());
        let (hash, locator) = locator(2, 1000);

        engine.add(&locator, &AddOptions::default()).await.unwrap();
        let result = engine.add(&locator, &AddOptions::default()).await;

        assert!(matches!(
            result,
            Err(EngineError::DuplicateHandle { info_hash }) if info_hash == hash
        ));
        assert_eq!(engine.handle_count(), 1);
    }

    #[tokio::test]
    async fn test_instant_content_reads_deterministically() {
        let (hash, locator) = locator(3, 5000);
        let first = SimulatedEngine::new(SimulationConfig::instant());
        let second = SimulatedEngine::new(SimulationConfig::instant());

        let a = first.add(&locator, &AddOptions::default()).await.unwrap();
        let b = second.add(&locator, &AddOptions::default()).await.unwrap();

        let read_a: Vec<_> = a.open_read(1, 1000, 2999).unwrap().try_collect().await.unwrap();
        let read_b: Vec<_> = b.open_read(1, 1000, 2999).unwrap().try_collect().await.unwrap();
        let read_a = read_a.concat();

        assert_eq!(read_a.len(), 2000);
        assert_eq!(read_a, read_b.concat());
        assert_eq!(
            read_a,
            first
                .simulated_handle(hash)
                .unwrap()
                .expected_content(1, 1000, 2999)
                .unwrap()
        );
        assert!((a.progress() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_pieces_download_first() {
        let engine = SimulatedEngine::new(slow_config());
        let (hash, locator) = locator(4, 5000);
        let handle = engine.add(&locator, &AddOptions::default()).await.unwrap();
        let sim = engine.simulated_handle(hash).unwrap();

        handle.mark_critical(30, 31);
        handle.select(30..=31, PiecePriority::Critical);
        handle.select(32..=33, PiecePriority::High);

        tokio::time::sleep(Duration::from_millis(45)).await;

        assert!(sim.is_piece_complete(30));
        assert!(sim.is_piece_complete(31));
        assert!(sim.is_piece_complete(32));
        assert!(sim.is_piece_complete(33));
        assert!(!sim.is_piece_complete(0));
        assert_eq!(sim.critical_requests(), vec![(30, 31)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_speed_reflects_completed_pieces() {
        let engine = SimulatedEngine::new(slow_config());
        let (hash, slow) = locator(7, 5000);
        let (_, done) = locator(8, 5000);
        let handle = engine.add(&slow, &AddOptions::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(55)).await;

        // Five 100-byte pieces in 55ms
        let sim = engine.simulated_handle(hash).unwrap();
        assert_eq!(sim.completed_pieces(), 5);
        assert!((8_000..=10_000).contains(&handle.download_speed()));

        let instant = SimulatedEngine::new(SimulationConfig::instant());
        let complete = instant.add(&done, &AddOptions::default()).await.unwrap();
        assert_eq!(complete.download_speed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_waits_for_pieces() {
        let engine = SimulatedEngine::new(slow_config());
        let (hash, locator) = locator(5, 5000);
        let handle = engine.add(&locator, &AddOptions::default()).await.unwrap();
        let sim = engine.simulated_handle(hash).unwrap();

        // Main file starts at offset 100, so bytes 0..=199 are pieces 1 and 2
        let body: Vec<_> = handle.open_read(1, 0, 199).unwrap().try_collect().await.unwrap();

        assert_eq!(body.concat(), sim.expected_content(1, 0, 199).unwrap());
        assert!(sim.is_piece_complete(1) && sim.is_piece_complete(2));
        assert!(sim.completed_pieces() < handle.piece_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_fails_blocked_reads() {
        let engine = SimulatedEngine::new(SimulationConfig {
            piece_latency: Duration::from_secs(3600),
            ..slow_config()
        });
        let (hash, locator) = locator(6, 5000);
        let handle = engine.add(&locator, &AddOptions::default()).await.unwrap();
        let mut stream = handle.open_read(1, 0, 99).unwrap();

        let reader = tokio::spawn(async move { stream.try_next().await });
        tokio::task::yield_now().await;

        engine.remove(hash, true).await.unwrap();
        let result = reader.await.unwrap();

        assert!(result.is_err());
        assert!(engine.simulated_handle(hash).is_none());
        assert!(matches!(
            engine.remove(hash, true).await,
            Err(EngineError::HandleNotFound { .. })
        ));
    }
}

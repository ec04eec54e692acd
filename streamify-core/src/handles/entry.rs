//! Registry entry for one live handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::TorrentHandle;

/// A live handle plus its consumer count and last access time.
pub struct ManagedEntry {
    pub handle: Arc<dyn TorrentHandle>,
    pub ref_count: u32,
    pub last_accessed_at: Instant,
}

impl ManagedEntry {
    pub fn new(handle: Arc<dyn TorrentHandle>, ref_count: u32) -> Self {
        Self {
            handle,
            ref_count,
            last_accessed_at: Instant::now(),
        }
    }

    /// Adds a consumer and refreshes the access time.
    pub fn retain(&mut self) {
        self.ref_count += 1;
        self.last_accessed_at = Instant::now();
    }

    /// Drops a consumer. Returns false if the count was already zero.
    pub fn release(&mut self) -> bool {
        self.last_accessed_at = Instant::now();
        match self.ref_count.checked_sub(1) {
            Some(count) => {
                self.ref_count = count;
                true
            }
            None => false,
        }
    }

    /// Time since the entry was last acquired or released.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed_at)
    }

    /// Unreferenced and untouched for longer than `idle_timeout`.
    pub fn is_evictable(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.ref_count == 0 && self.idle_for(now) > idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AddOptions, DownloadEngine, InfoHash, MockEngine, mock_locator};

    async fn entry(ref_count: u32) -> ManagedEntry {
        let engine = MockEngine::new();
        let locator = mock_locator(InfoHash::new([1; 20]), "a.mp4", 100);
        let handle = engine.add(&locator, &AddOptions::default()).await.unwrap();
        ManagedEntry::new(handle, ref_count)
    }

    #[tokio::test]
    async fn test_release_never_goes_negative() {
        let mut entry = entry(1).await;
        assert!(entry.release());
        assert_eq!(entry.ref_count, 0);
        assert!(!entry.release());
        assert_eq!(entry.ref_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evictable_only_after_idle_timeout() {
        let mut entry = entry(1).await;
        let timeout = Duration::from_secs(60);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!entry.is_evictable(Instant::now(), timeout), "still referenced");

        entry.release();
        tokio::time::advance(timeout).await;
        assert!(!entry.is_evictable(Instant::now(), timeout), "exactly at timeout");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_evictable(Instant::now(), timeout));

        entry.retain();
        assert!(!entry.is_evictable(Instant::now() + timeout * 2, timeout));
    }
}

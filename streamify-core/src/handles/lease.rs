//! Scoped references to managed handles.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::HandleError;
use super::commands::HandleCommand;
use crate::engine::{InfoHash, TorrentHandle};

/// One counted reference to a managed handle.
///
/// Dropping the lease issues exactly one release, whichever way the owner
/// exits: normal completion, error, or cancellation.
pub struct HandleLease {
    info_hash: InfoHash,
    handle: Arc<dyn TorrentHandle>,
    releaser: Option<mpsc::UnboundedSender<HandleCommand>>,
}

impl HandleLease {
    pub(crate) fn new(
        info_hash: InfoHash,
        handle: Arc<dyn TorrentHandle>,
        releaser: mpsc::UnboundedSender<HandleCommand>,
    ) -> Self {
        Self {
            info_hash,
            handle,
            releaser: Some(releaser),
        }
    }

    /// Hash the reference is counted under.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Shared handle, usable beyond the lease only for inspection.
    pub fn handle(&self) -> &Arc<dyn TorrentHandle> {
        &self.handle
    }

    /// Gives up automatic release.
    ///
    /// The caller becomes responsible for a matching
    /// [`HandleManager::release`](super::HandleManager::release).
    pub fn detach(mut self) -> Arc<dyn TorrentHandle> {
        self.releaser = None;
        self.handle.clone()
    }
}

impl Deref for HandleLease {
    type Target = dyn TorrentHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl std::fmt::Debug for HandleLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleLease")
            .field("info_hash", &self.info_hash)
            .field("armed", &self.releaser.is_some())
            .finish()
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            tracing::trace!(info_hash = %self.info_hash, "Lease dropped");
            let _ = releaser.send(HandleCommand::Release {
                info_hash: self.info_hash,
            });
        }
    }
}

/// Receiving side of an acquire that cannot leak a reference.
///
/// If the acquiring future is dropped after the actor counted and sent a
/// handle but before it was received, the guard releases that reference.
pub(crate) struct AcquireGuard {
    receiver: oneshot::Receiver<Result<Arc<dyn TorrentHandle>, HandleError>>,
    info_hash: InfoHash,
    releaser: mpsc::UnboundedSender<HandleCommand>,
    settled: bool,
}

impl AcquireGuard {
    pub(crate) fn new(
        receiver: oneshot::Receiver<Result<Arc<dyn TorrentHandle>, HandleError>>,
        info_hash: InfoHash,
        releaser: mpsc::UnboundedSender<HandleCommand>,
    ) -> Self {
        Self {
            receiver,
            info_hash,
            releaser,
            settled: false,
        }
    }

    pub(crate) async fn settle(&mut self) -> Result<Arc<dyn TorrentHandle>, HandleError> {
        let result = (&mut self.receiver).await;
        self.settled = true;
        result.map_err(|_| HandleError::ManagerShutdown)?
    }
}

impl Drop for AcquireGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        // Closing first makes any later send from the actor fail, so it is
        // never counted
        self.receiver.close();
        if let Ok(Ok(_)) = self.receiver.try_recv() {
            tracing::debug!(info_hash = %self.info_hash, "Acquire cancelled after delivery");
            let _ = self.releaser.send(HandleCommand::Release {
                info_hash: self.info_hash,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::catalog::SourceDescriptor;
    use crate::config::StreamifyConfig;
    use crate::engine::{InfoHash, MockEngine, mock_locator};
    use crate::handles::spawn_handle_manager;

    #[tokio::test]
    async fn test_dropping_delivered_acquire_releases_reference() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
        let hash = InfoHash::new([0x31; 20]);
        let source = SourceDescriptor::new(hash, mock_locator(hash, "movie.mp4", 1000));
        drop(manager.acquire(&source).await.unwrap());

        let mut acquire = Box::pin(manager.acquire(&source));
        assert!(futures::poll!(acquire.as_mut()).is_pending());

        // Served by the live entry before the stats request, never received
        assert_eq!(manager.stats().await.unwrap().ref_count(hash), Some(1));

        drop(acquire);
        assert_eq!(manager.stats().await.unwrap().ref_count(hash), Some(0));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_detached_lease_does_not_release() {
        let engine = Arc::new(MockEngine::new());
        let manager = spawn_handle_manager(engine.clone(), &StreamifyConfig::for_testing());
        let hash = InfoHash::new([0x32; 20]);
        let source = SourceDescriptor::new(hash, mock_locator(hash, "movie.mp4", 1000));

        let handle = manager.acquire(&source).await.unwrap().detach();
        assert_eq!(handle.info_hash(), hash);
        assert_eq!(manager.stats().await.unwrap().ref_count(hash), Some(1));

        manager.release(hash);
        assert_eq!(manager.stats().await.unwrap().ref_count(hash), Some(0));
        manager.shutdown().await.unwrap();
    }
}

//! Handle for communicating with the handle manager actor.

use tokio::sync::{mpsc, oneshot};

use super::commands::{HandleCommand, ManagerStats};
use super::lease::{AcquireGuard, HandleLease};
use super::HandleError;
use crate::catalog::SourceDescriptor;
use crate::engine::InfoHash;

/// Shared entry point to the handle registry.
///
/// Cheap to clone; every clone talks to the same actor. Construct it with
/// [`spawn_handle_manager`](super::spawn_handle_manager) and pass it to
/// whatever needs handles.
#[derive(Clone)]
pub struct HandleManager {
    sender: mpsc::Sender<HandleCommand>,
    internal: mpsc::UnboundedSender<HandleCommand>,
}

impl HandleManager {
    pub(crate) fn new(
        sender: mpsc::Sender<HandleCommand>,
        internal: mpsc::UnboundedSender<HandleCommand>,
    ) -> Self {
        Self { sender, internal }
    }

    /// Acquires a reference to the live handle for `descriptor`.
    ///
    /// Reuses a registered handle, joins an in-flight add for the same hash,
    /// or starts a new engine add bounded by the acquire timeout. The
    /// returned lease releases its reference when dropped.
    ///
    /// # Errors
    /// - `HandleError::AcquireTimeout` - Engine did not produce a handle in time
    /// - `HandleError::AcquireFailed` - Engine rejected the source
    /// - `HandleError::ManagerShutdown` - Manager actor is no longer running
    pub async fn acquire(&self, descriptor: &SourceDescriptor) -> Result<HandleLease, HandleError> {
        let (responder, receiver) = oneshot::channel();
        let command = HandleCommand::Acquire {
            descriptor: descriptor.clone(),
            responder,
        };

        self.sender
            .send(command)
            .await
            .map_err(|_| HandleError::ManagerShutdown)?;

        let mut guard = AcquireGuard::new(receiver, descriptor.hash, self.internal.clone());
        let handle = guard.settle().await?;

        Ok(HandleLease::new(descriptor.hash, handle, self.internal.clone()))
    }

    /// Drops one reference to the handle for `info_hash`.
    ///
    /// Never tears the handle down; unreferenced handles are left for the
    /// idle reaper. Releasing more often than acquiring is logged and
    /// otherwise ignored.
    pub fn release(&self, info_hash: InfoHash) {
        let _ = self.internal.send(HandleCommand::Release { info_hash });
    }

    /// Runs an idle reaper pass immediately and returns the eviction count.
    ///
    /// # Errors
    /// - `HandleError::ManagerShutdown` - Manager actor is no longer running
    pub async fn reap_idle(&self) -> Result<usize, HandleError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(HandleCommand::ReapIdle { responder })
            .await
            .map_err(|_| HandleError::ManagerShutdown)?;

        rx.await.map_err(|_| HandleError::ManagerShutdown)
    }

    /// Snapshot of registry counts and per-handle details.
    ///
    /// # Errors
    /// - `HandleError::ManagerShutdown` - Manager actor is no longer running
    pub async fn stats(&self) -> Result<ManagerStats, HandleError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(HandleCommand::GetStats { responder })
            .await
            .map_err(|_| HandleError::ManagerShutdown)?;

        rx.await.map_err(|_| HandleError::ManagerShutdown)
    }

    /// Stops the reaper and destroys every handle regardless of references.
    ///
    /// After this call all operations return `HandleError::ManagerShutdown`.
    ///
    /// # Errors
    /// - `HandleError::ManagerShutdown` - Manager was already shut down
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(HandleCommand::Shutdown { responder })
            .await
            .map_err(|_| HandleError::ManagerShutdown)?;

        rx.await.map_err(|_| HandleError::ManagerShutdown)
    }

    /// Checks if the manager actor is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

//! Command definitions for the handle manager actor.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;

use super::HandleError;
use crate::catalog::SourceDescriptor;
use crate::engine::{InfoHash, TorrentHandle};

pub(crate) type AcquireResponder = oneshot::Sender<Result<Arc<dyn TorrentHandle>, HandleError>>;

/// Commands sent to the handle manager actor.
///
/// Each request carries its own response channel so the actor settles
/// every caller exactly once.
pub(crate) enum HandleCommand {
    /// Acquire a reference to the handle for a source.
    Acquire {
        descriptor: SourceDescriptor,
        responder: AcquireResponder,
    },
    /// Drop one reference to a handle.
    Release { info_hash: InfoHash },
    /// Run an idle reaper pass now.
    ReapIdle { responder: oneshot::Sender<usize> },
    /// Snapshot registry statistics.
    GetStats {
        responder: oneshot::Sender<ManagerStats>,
    },
    /// Destroy every handle and stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
    /// Internal notification that an engine add settled.
    AcquireSettled {
        info_hash: InfoHash,
        result: Result<AcquiredHandle, HandleError>,
    },
}

/// A handle produced by a settled acquisition.
pub(crate) struct AcquiredHandle {
    pub handle: Arc<dyn TorrentHandle>,
    /// False when an existing engine handle was adopted
    pub freshly_added: bool,
}

/// Registry statistics for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    /// Live handles in the registry
    pub total: usize,
    /// Handles with at least one consumer
    pub referenced: usize,
    /// Handles with no consumers, waiting for the reaper
    pub idle: usize,
    /// Engine adds still in flight
    pub pending: usize,
    pub entries: Vec<EntryStats>,
}

/// Per-handle statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub info_hash: InfoHash,
    pub name: String,
    pub ref_count: u32,
    pub idle_secs: u64,
    pub progress_percent: u8,
    /// Bytes per second
    pub download_speed: u64,
}

impl ManagerStats {
    /// Stats for one hash, if it is registered.
    pub fn entry(&self, info_hash: InfoHash) -> Option<&EntryStats> {
        self.entries.iter().find(|e| e.info_hash == info_hash)
    }

    /// Reference count for a hash, if it is registered.
    pub fn ref_count(&self, info_hash: InfoHash) -> Option<u32> {
        self.entry(info_hash).map(|e| e.ref_count)
    }
}

//! Shared, reference-counted torrent handle management
//!
//! One actor task owns the registry of live handles and in-flight
//! acquisitions. Concurrent requests for the same content share a single
//! engine add and a single handle; unreferenced handles are torn down by a
//! periodic idle reaper, never by the request that released them.

mod actor;
mod commands;
mod entry;
mod lease;
mod manager;

pub use actor::spawn_handle_manager;
pub use commands::{EntryStats, ManagerStats};
pub use entry::ManagedEntry;
pub use lease::HandleLease;
pub use manager::HandleManager;

use crate::engine::{EngineError, InfoHash};

/// Errors surfaced by the handle manager.
///
/// Duplicate-add conflicts reported by the engine are recovered internally
/// and never appear here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandleError {
    #[error("Timed out after {timeout_secs}s acquiring {info_hash}")]
    AcquireTimeout { info_hash: InfoHash, timeout_secs: u64 },

    #[error("Failed to acquire handle: {reason}")]
    AcquireFailed { reason: String },

    #[error("Handle manager is shut down")]
    ManagerShutdown,
}

impl From<EngineError> for HandleError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::EngineShutdown => HandleError::ManagerShutdown,
            other => HandleError::AcquireFailed {
                reason: other.to_string(),
            },
        }
    }
}

//! Streamify Core - Shared torrent handles and range streaming
//!
//! This crate turns HTTP byte-range requests for media into deduplicated,
//! reference-counted acquisitions of live download engine handles and
//! prioritized partial-content byte streams.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod handles;
pub mod mode;
pub mod streaming;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use catalog::{Catalog, CatalogError, SourceDescriptor};
pub use config::StreamifyConfig;
pub use engine::{DownloadEngine, EngineError, InfoHash, TorrentHandle};
pub use handles::{HandleError, HandleLease, HandleManager, spawn_handle_manager};
pub use mode::RuntimeMode;
pub use streaming::{RangeStream, StreamingError, StreamingService};

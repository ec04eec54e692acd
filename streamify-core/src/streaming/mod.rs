//! Range-to-priority streaming pipeline
//!
//! Turns an HTTP byte-range request into a prioritized partial-content byte
//! stream over a shared handle. The pipeline is: parse the Range header,
//! resolve the source through the catalog, acquire a handle lease, pick the
//! playable file, translate the byte window into piece priorities, and open
//! a bounded read that carries the lease until the body ends.

mod body;
mod media;
mod plan;
mod range;
mod service;

pub use body::LeasedByteStream;
pub use media::{MEDIA_EXTENSIONS, content_type_for, is_media_file, select_playable_file};
pub use plan::{PriorityPlan, PriorityTier};
pub use range::{RangeSpec, RangeWindow, parse_range_header};
pub use service::{RangeStream, StreamingService};

use crate::catalog::CatalogError;
use crate::engine::InfoHash;
use crate::handles::HandleError;

/// Errors produced while serving a range request.
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("Content {content_id} not found")]
    NotFound { content_id: String },

    #[error("Range header is required")]
    RangeRequired,

    #[error("Malformed Range header: {header}")]
    RangeMalformed { header: String },

    #[error("Requested range not satisfiable for {file_length} byte file")]
    RangeInvalid { file_length: u64 },

    #[error("No playable media file in {info_hash}")]
    NoPlayableFile { info_hash: InfoHash },

    #[error(transparent)]
    Acquire(#[from] HandleError),

    #[error("Stream failed: {reason}")]
    Stream { reason: String },

    #[error("Catalog lookup failed: {reason}")]
    Catalog { reason: String },
}

impl StreamingError {
    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StreamingError::NotFound { .. }
                | StreamingError::RangeRequired
                | StreamingError::RangeMalformed { .. }
                | StreamingError::RangeInvalid { .. }
        )
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            StreamingError::NotFound { .. } | StreamingError::NoPlayableFile { .. } => 404,
            StreamingError::RangeRequired | StreamingError::RangeInvalid { .. } => 416,
            StreamingError::RangeMalformed { .. } => 400,
            StreamingError::Acquire(_)
            | StreamingError::Stream { .. }
            | StreamingError::Catalog { .. } => 500,
        }
    }
}

impl From<CatalogError> for StreamingError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::ContentNotFound { content_id } => StreamingError::NotFound { content_id },
            other => StreamingError::Catalog {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StreamingError::RangeRequired.status_code(), 416);
        assert_eq!(
            StreamingError::RangeInvalid { file_length: 10 }.status_code(),
            416
        );
        assert_eq!(
            StreamingError::RangeMalformed {
                header: "items=0-1".to_string()
            }
            .status_code(),
            400
        );
        assert_eq!(
            StreamingError::Acquire(HandleError::ManagerShutdown).status_code(),
            500
        );
    }

    #[test]
    fn test_catalog_miss_becomes_not_found() {
        let error: StreamingError = CatalogError::ContentNotFound {
            content_id: "tt01".to_string(),
        }
        .into();
        assert!(matches!(error, StreamingError::NotFound { ref content_id } if content_id == "tt01"));
        assert!(error.is_client_error());

        let error: StreamingError = CatalogError::Unavailable {
            reason: "db down".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), 500);
        assert!(!error.is_client_error());
    }
}

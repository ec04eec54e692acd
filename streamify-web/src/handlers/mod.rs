//! HTTP request handlers organized by functionality

pub mod api;
pub mod range;
pub mod streaming;

pub use api::{HealthResponse, api_handle_stats, health};
pub use range::{extract_range_header, partial_content_response};
pub use streaming::stream_content;

//! Integration tests for Streamify
//!
//! These tests drive the handle manager, streaming service and HTTP router
//! together against the mock, simulated and directory engines.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/directory_streaming.rs"]
mod directory_streaming;
#[path = "integration/handle_sharing.rs"]
mod handle_sharing;
#[path = "integration/http_routes.rs"]
mod http_routes;
#[path = "integration/idle_eviction.rs"]
mod idle_eviction;
#[path = "integration/simulated_streaming.rs"]
mod simulated_streaming;

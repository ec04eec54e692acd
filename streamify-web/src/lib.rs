//! Streamify Web - HTTP range streaming server

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! Serves `GET /stream/{content_id}/{hash}` as `206 Partial Content` over
//! shared handles, plus a small JSON surface for handle statistics and
//! health checks.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ServerError};
pub use server::{AppState, build_engine, router, run_server};

//! Streamify Simulation - Deterministic in-memory download engine.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! [`SimulatedEngine`] stands in for a real peer-to-peer engine during
//! development and testing. Content bytes are derived from a seed, so the
//! same locator always yields the same data, and pieces "download" one at
//! a time in priority order so streaming behaviour can be observed without
//! a network.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamify_core::config::StreamifyConfig;
//! use streamify_core::handles::spawn_handle_manager;
//! use streamify_sim::{SimulatedEngine, SimulationConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = Arc::new(SimulatedEngine::new(SimulationConfig::default()));
//! let manager = spawn_handle_manager(engine, &StreamifyConfig::default());
//! # manager.shutdown().await.unwrap();
//! # }
//! ```

mod content;
mod engine;
mod handle;

use std::time::Duration;

pub use engine::SimulatedEngine;
pub use handle::SimulatedHandle;

/// Tuning for the simulated engine.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed mixed into every piece's content
    pub seed: u64,
    /// Piece size in bytes
    pub piece_length: u64,
    /// Time to "download" one piece; zero makes content complete on add
    pub piece_latency: Duration,
    /// Delay before an add resolves, modelling metadata fetch
    pub metadata_delay: Duration,
    /// Main file size when the locator carries no `xl`
    pub default_file_size: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            piece_length: 256 * 1024, // 256 KiB
            piece_latency: Duration::from_millis(5),
            metadata_delay: Duration::from_millis(50),
            default_file_size: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

impl SimulationConfig {
    /// Small pieces and instant completion for fast tests.
    pub fn instant() -> Self {
        Self {
            piece_length: 1024,
            piece_latency: Duration::ZERO,
            metadata_delay: Duration::ZERO,
            default_file_size: 64 * 1024,
            ..Self::default()
        }
    }
}

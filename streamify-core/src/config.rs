//! Centralized configuration for Streamify.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::time::Duration;

use crate::engine::AddOptions;

/// Central configuration for all Streamify components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct StreamifyConfig {
    pub handles: HandleConfig,
    pub engine: EngineConfig,
    pub streaming: StreamingConfig,
    pub server: ServerConfig,
}

/// Handle manager lifecycle configuration.
///
/// The acquire timeout bounds request latency; the idle timeout bounds how
/// long an unreferenced handle is retained. The two are independent.
#[derive(Debug, Clone)]
pub struct HandleConfig {
    /// Maximum time to wait for the engine to produce a handle
    pub acquire_timeout: Duration,
    /// How long a handle with no references survives before eviction
    pub idle_timeout: Duration,
    /// Interval between idle reaper passes
    pub reap_interval: Duration,
    /// Capacity of the manager command channel
    pub command_buffer: usize,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(15 * 60), // 15 minutes
            reap_interval: Duration::from_secs(5 * 60), // 5 minutes
            command_buffer: 100,
        }
    }
}

/// Options passed to the download engine when adding a source.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max web seed connections per handle
    pub max_web_conns: u32,
    /// Skip piece verification on add
    pub skip_verify: bool,
    /// Delete backing storage when a handle is removed
    pub destroy_store_on_remove: bool,
    /// Piece length used by engines that compute their own geometry
    pub piece_length: u64,
    /// Read chunk size for file-backed byte streams
    pub read_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_web_conns: 20,
            skip_verify: false,
            destroy_store_on_remove: true,
            piece_length: 256 * 1024, // 256 KiB
            read_chunk_size: 64 * 1024,
        }
    }
}

impl EngineConfig {
    /// Builds the per-add options handed to the engine.
    pub fn add_options(&self) -> AddOptions {
        AddOptions {
            max_web_conns: self.max_web_conns,
            skip_verify: self.skip_verify,
            destroy_store_on_remove: self.destroy_store_on_remove,
        }
    }
}

/// Range-to-priority translation parameters.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Minimum number of lookahead pieces past the requested range
    pub base_lookahead_pieces: u32,
    /// Lookahead as a fraction of the total piece count
    pub lookahead_ratio: f64,
    /// Hard ceiling on lookahead pieces
    pub max_lookahead_pieces: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            base_lookahead_pieces: 5,
            lookahead_ratio: 0.02,
            max_lookahead_pieces: 40,
        }
    }
}

/// HTTP server binding configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl StreamifyConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_parse::<u64>("STREAMIFY_ACQUIRE_TIMEOUT") {
            config.handles.acquire_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("STREAMIFY_IDLE_TIMEOUT") {
            config.handles.idle_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("STREAMIFY_REAP_INTERVAL") {
            if seconds > 0 {
                config.handles.reap_interval = Duration::from_secs(seconds);
            }
        }

        if let Some(pieces) = env_parse::<u32>("STREAMIFY_MAX_LOOKAHEAD") {
            config.streaming.max_lookahead_pieces = pieces;
        }

        if let Ok(host) = std::env::var("STREAMIFY_HOST") {
            config.server.host = host;
        }

        if let Some(port) = env_parse::<u16>("STREAMIFY_PORT") {
            config.server.port = port;
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            handles: HandleConfig {
                acquire_timeout: Duration::from_secs(5),
                idle_timeout: Duration::from_secs(60),
                reap_interval: Duration::from_secs(10),
                command_buffer: 32,
            },
            engine: EngineConfig {
                piece_length: 1024,
                read_chunk_size: 256,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = StreamifyConfig::default();

        assert_eq!(config.handles.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.handles.idle_timeout, Duration::from_secs(900));
        assert_eq!(config.handles.reap_interval, Duration::from_secs(300));
        assert_eq!(config.engine.max_web_conns, 20);
        assert!(config.engine.destroy_store_on_remove);
        assert_eq!(config.streaming.max_lookahead_pieces, 40);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_add_options_follow_engine_config() {
        let mut config = EngineConfig::default();
        config.skip_verify = true;

        let options = config.add_options();
        assert!(options.skip_verify);
        assert_eq!(options.max_web_conns, 20);
        assert!(options.destroy_store_on_remove);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("STREAMIFY_ACQUIRE_TIMEOUT", "15");
            std::env::set_var("STREAMIFY_IDLE_TIMEOUT", "600");
            std::env::set_var("STREAMIFY_REAP_INTERVAL", "0");
            std::env::set_var("STREAMIFY_PORT", "8080");
        }

        let config = StreamifyConfig::from_env();

        assert_eq!(config.handles.acquire_timeout, Duration::from_secs(15));
        assert_eq!(config.handles.idle_timeout, Duration::from_secs(600));
        // A zero reap interval would panic the reaper and is ignored
        assert_eq!(config.handles.reap_interval, Duration::from_secs(300));
        assert_eq!(config.server.port, 8080);

        // Cleanup
        unsafe {
            std::env::remove_var("STREAMIFY_ACQUIRE_TIMEOUT");
            std::env::remove_var("STREAMIFY_IDLE_TIMEOUT");
            std::env::remove_var("STREAMIFY_REAP_INTERVAL");
            std::env::remove_var("STREAMIFY_PORT");
        }
    }
}

//! Tracing setup for Streamify
//!
//! Console output follows the user's chosen level. When a logs directory is
//! given, a second layer records everything at TRACE to
//! `streamify-last-run.log`, overwritten on each run, so handle lifecycle
//! events can be inspected after the fact.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run debug log.
pub const LAST_RUN_LOG: &str = "streamify-last-run.log";

/// Errors raised while installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides `console_level` for the console layer. Returns the
/// path of the debug log file when one was opened.
///
/// # Errors
///
/// - `TracingError::LogFile` - Logs directory or file could not be created
/// - `TracingError::AlreadyInstalled` - A global subscriber was already set
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<Option<PathBuf>, TracingError> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(console_level)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let Some(dir) = logs_dir else {
        tracing_subscriber::registry().with(console_layer).try_init()?;
        tracing::info!(console = %console_level, "Tracing initialized");
        return Ok(None);
    };

    let log_file_path = dir.join(LAST_RUN_LOG);
    let log_file = create_dir_all(dir)
        .and_then(|_| File::create(&log_file_path))
        .map_err(|source| TracingError::LogFile {
            path: log_file_path.clone(),
            source,
        })?;

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        console = %console_level,
        debug_file = %log_file_path.display(),
        "Tracing initialized"
    );

    Ok(Some(log_file_path))
}

/// Console directives: our crates at the chosen level, HTTP plumbing quieter.
fn default_directives(level: Level) -> String {
    let quiet = if level < Level::INFO { level } else { Level::WARN };
    format!("{level},hyper={quiet},tower_http={quiet}")
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    #[default]
    Info,
    /// Debug, informational, warning, and error messages
    Debug,
    /// All messages including detailed tracing
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::default()), Level::INFO);
    }

    #[test]
    fn test_default_directives_quiet_http_stack() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "DEBUG,hyper=WARN,tower_http=WARN"
        );
        assert_eq!(
            default_directives(Level::ERROR),
            "ERROR,hyper=ERROR,tower_http=ERROR"
        );
    }
}

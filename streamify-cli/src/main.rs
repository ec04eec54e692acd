//! Streamify CLI - Command-line interface
//!
//! Runs the streaming server and helps build catalog entries.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use streamify_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "streamify")]
#[command(about = "Range streaming over shared torrent handles")]
struct Cli {
    /// Console log level; RUST_LOG takes precedence
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run trace log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.into(), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command).await
}

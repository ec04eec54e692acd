//! CLI command implementations

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Subcommand;
use streamify_core::RuntimeMode;
use streamify_core::catalog::{Catalog, InMemoryCatalog, SourceDescriptor};
use streamify_core::config::StreamifyConfig;
use streamify_core::engine::{DirectoryEngine, InfoHash, MagnetLocator};
use streamify_web::run_server;

const DEMO_CONTENT_ID: &str = "demo";
const DEMO_HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
const DEMO_SIZE: u64 = 64 * 1024 * 1024;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        /// Host to bind to, overriding STREAMIFY_HOST
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to, overriding STREAMIFY_PORT
        #[arg(short, long)]
        port: Option<u16>,
        /// Engine backing the handle manager
        #[arg(long, default_value = "development")]
        mode: RuntimeMode,
        /// JSON catalog mapping content ids to sources
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Print the catalog entry for a locator
    Inspect {
        /// Magnet URI, file:// URL, or local path
        locator: String,
        /// Content id to key the entry under
        #[arg(long, default_value = "content")]
        content_id: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of whichever command ran
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            mode,
            catalog,
        } => serve(host, port, mode, catalog).await,
        Commands::Inspect {
            locator,
            content_id,
        } => inspect(locator, content_id).await,
    }
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    mode: RuntimeMode,
    catalog_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = StreamifyConfig::from_env();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let catalog: Arc<dyn Catalog> = match (catalog_path, mode) {
        (Some(path), _) => {
            let catalog = InMemoryCatalog::from_json_file(&path)
                .await
                .with_context(|| format!("loading catalog {}", path.display()))?;
            if catalog.is_empty() {
                tracing::warn!(path = %path.display(), "Catalog has no entries");
            } else {
                tracing::info!(path = %path.display(), entries = catalog.len(), "Catalog loaded");
            }
            Arc::new(catalog)
        }
        (None, RuntimeMode::Development) => {
            let catalog = demo_catalog()?;
            tracing::info!(
                url = %format!(
                    "http://{}:{}/stream/{DEMO_CONTENT_ID}/{DEMO_HASH}",
                    config.server.host, config.server.port
                ),
                "No catalog given, serving simulated demo content"
            );
            Arc::new(catalog)
        }
        (None, RuntimeMode::Production) => bail!("--catalog is required in production mode"),
    };

    tracing::info!(
        %mode,
        acquire_timeout_secs = config.handles.acquire_timeout.as_secs(),
        idle_timeout_secs = config.handles.idle_timeout.as_secs(),
        "Starting Streamify"
    );
    run_server(config, mode, catalog).await?;
    Ok(())
}

fn demo_catalog() -> anyhow::Result<InMemoryCatalog> {
    let hash: InfoHash = DEMO_HASH.parse()?;
    let locator = format!("magnet:?xt=urn:btih:{hash}&dn=Demo.Movie.mp4&xl={DEMO_SIZE}");

    let catalog = InMemoryCatalog::new();
    catalog.insert(DEMO_CONTENT_ID, SourceDescriptor::new(hash, locator));
    Ok(catalog)
}

async fn inspect(locator: String, content_id: String) -> anyhow::Result<()> {
    let hash = if locator.starts_with("magnet:") {
        MagnetLocator::parse(&locator)?.info_hash
    } else {
        DirectoryEngine::info_hash_of(&locator).await?
    };

    let entry = HashMap::from([(content_id, vec![SourceDescriptor::new(hash, locator)])]);
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

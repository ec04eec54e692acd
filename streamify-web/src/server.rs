//! HTTP server wiring for Streamify
//!
//! Builds the engine for the runtime mode, spawns the handle manager, and
//! serves the router until Ctrl-C or SIGTERM, then shuts the manager down.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use chrono::{DateTime, Utc};
use streamify_core::catalog::Catalog;
use streamify_core::config::StreamifyConfig;
use streamify_core::engine::{DirectoryEngine, DownloadEngine};
use streamify_core::handles::{HandleManager, spawn_handle_manager};
use streamify_core::{RuntimeMode, StreamingService};
use streamify_sim::{SimulatedEngine, SimulationConfig};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::handlers::{api_handle_stats, health, stream_content};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Range streaming over shared handles
    pub streaming: StreamingService,
    /// Mode the engine was chosen for
    pub mode: RuntimeMode,
    /// Server start time
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates state stamped with the current time.
    pub fn new(streaming: StreamingService, mode: RuntimeMode) -> Self {
        Self {
            streaming,
            mode,
            started_at: Utc::now(),
        }
    }

    /// Handle manager behind the streaming service.
    pub fn handles(&self) -> &HandleManager {
        self.streaming.handles()
    }
}

/// Chooses the download engine for `mode`.
///
/// Production serves local content through [`DirectoryEngine`];
/// development fabricates content with [`SimulatedEngine`].
pub fn build_engine(mode: RuntimeMode, config: &StreamifyConfig) -> Arc<dyn DownloadEngine> {
    match mode {
        RuntimeMode::Production => Arc::new(DirectoryEngine::new(&config.engine)),
        RuntimeMode::Development => Arc::new(SimulatedEngine::new(SimulationConfig {
            piece_length: config.engine.piece_length,
            ..SimulationConfig::default()
        })),
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream/{content_id}/{hash}", get(stream_content))
        .route("/api/handles/stats", get(api_handle_stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the server until a shutdown signal arrives.
///
/// The handle manager is shut down after the listener stops, destroying
/// every remaining handle.
///
/// # Errors
/// - `ServerError::Bind` - Address could not be bound
/// - `ServerError::Serve` - Server loop failed
pub async fn run_server(
    config: StreamifyConfig,
    mode: RuntimeMode,
    catalog: Arc<dyn Catalog>,
) -> Result<(), ServerError> {
    let engine = build_engine(mode, &config);
    let handles = spawn_handle_manager(engine, &config);
    let streaming = StreamingService::new(catalog, handles.clone(), config.streaming.clone());
    let app = router(AppState::new(streaming, mode));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    tracing::info!(%address, %mode, "Streamify listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(error) = handles.shutdown().await {
        tracing::warn!(%error, "Handle manager already stopped");
    }
    tracing::info!("Streamify stopped");

    served.map_err(ServerError::Serve)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

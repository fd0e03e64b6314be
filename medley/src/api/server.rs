//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::config::Settings;
use crate::error::Result;
use crate::library::MediaRoot;
use crate::streaming::TranscoderConfig;
use crate::tasks::MediaTaskManager;
use taskman::TaskManager;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12590,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to
    /// defaults.
    ///
    /// Supported env vars:
    /// - `MEDLEY_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `MEDLEY_PORT` (e.g. "8080")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("MEDLEY_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("MEDLEY_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Media library root for path resolution
    pub media_root: Arc<MediaRoot>,
    /// Background task engine
    pub task_manager: Arc<MediaTaskManager>,
    /// Encoder settings for transcoded streaming
    pub transcoder: TranscoderConfig,
}

impl AppState {
    /// Build the application state from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            start_time: Instant::now(),
            media_root: Arc::new(MediaRoot::new(settings.media_root.clone())),
            task_manager: Arc::new(TaskManager::with_retention(settings.task_retention.clone())),
            transcoder: TranscoderConfig {
                ffmpeg_path: settings.ffmpeg_path.clone(),
            },
        }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create a server with the given configuration and state.
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Start the server.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| crate::Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

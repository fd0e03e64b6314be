use medley::api::server::{ApiServer, ApiServerConfig, AppState};
use medley::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> medley::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medley=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = Settings::from_env_or_default();
    let config = ApiServerConfig::from_env_or_default();
    let state = AppState::from_settings(&settings);

    let server = ApiServer::new(config, state);
    let shutdown = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    server.run().await
}

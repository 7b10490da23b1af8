use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use tokio::net::TcpListener;

use trader_backend::app;
use trader_backend::config::AppConfig;
use trader_backend::external::build_price_provider;
use trader_backend::logging::{init_logging, LoggingConfig};
use trader_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env()).map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    let config = AppConfig::from_env().map_err(|e| anyhow!(e))?;
    let provider = build_price_provider(&config).context("failed to build price provider")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, provider);
    let app = app::create_app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("🚀 Trader backend running at http://{}/", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

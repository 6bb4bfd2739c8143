mod api;
mod backend;
mod config;
mod summarizer;

use anyhow::{Context, Result};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    dotenv().ok();

    // Configuration is read once; startup fails without a backend credential.
    let config = config::AppConfig::from_env()?;
    let backend = Arc::new(backend::OpenAiBackend::new(&config)?);

    // API router with CORS and request tracing
    let app = api::app(api::AppState::new(config.clone(), backend))?;

    // Bind
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid HOST/PORT")?;
    tracing::info!(model = %config.model, "listening on http://{}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

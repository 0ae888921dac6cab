mod assembler;
mod composer;
mod config;
mod fallback;
mod gemini;
mod models;
mod pipeline;
mod refiner;
mod routes;
mod search;
mod serpapi;
mod services;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    composer::ImageLoader,
    config::AppConfig,
    fallback::FallbackCatalog,
    gemini::GeminiClient,
    pipeline::{Pipeline, Services},
    routes::AppState,
    serpapi::SerpApiClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    let http = reqwest::Client::builder()
        .connect_timeout(config.request_timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let gemini = Arc::new(GeminiClient::new(http.clone(), &config));
    let services = Services {
        completion: gemini.clone(),
        search: Arc::new(SerpApiClient::new(http.clone(), &config)),
        synthesis: gemini,
        loader: ImageLoader::new(http, config.request_timeout),
    };
    let pipeline = Pipeline::new(services, FallbackCatalog::curated(), &config);

    let state = AppState { pipeline: Arc::new(pipeline), output_dir: Arc::new(config.output_dir.clone()) };
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("serving HTTP")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

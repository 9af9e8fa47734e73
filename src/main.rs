//! Chain Derive Sandbox
//!
//! HTTP API server exposing memoized derived chain views (elections, council)
//! over an in-memory chain loaded from a storage export at startup.

use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chain_derive_sandbox::api::{self, AppState};
use chain_derive_sandbox::chain::state_loader::StateLoader;
use chain_derive_sandbox::chain::SandboxChain;
use chain_derive_sandbox::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    let chain = Arc::new(load_chain(&config)?);
    let summary = chain.stats();
    tracing::info!(
        "Sandbox chain ready: {} storage items, {} constants, modules: {}",
        summary.storage_items,
        summary.constants,
        summary.modules.join(", ")
    );

    let state = AppState::new(chain);

    // Warm the elections view so the first request does not wait on it
    match state.derive.elections_info().first().await {
        Some(Ok(info)) => tracing::info!(
            "Elections: {} members, {} runners-up, {} candidates",
            info.members.len(),
            info.runners_up.len(),
            info.candidate_count
        ),
        Some(Err(e)) => tracing::warn!("Elections view unavailable: {}", e),
        None => tracing::warn!("Elections view ended before producing a value"),
    }

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    tracing::info!("Starting server on {}", config.bind_addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /health                       - Health check");
    tracing::info!("  GET  /api/elections/info           - Derived elections view");
    tracing::info!("  GET  /api/council/members          - Council membership");
    tracing::info!("  GET  /api/council/proposals        - Open proposals with votes");
    tracing::info!("  GET  /api/council/proposals/:hash  - Single proposal");
    tracing::info!("  GET  /api/chain/summary            - Sandbox chain statistics");
    tracing::info!("  POST /api/chain/storage            - Write a storage value");
    tracing::info!("  POST /api/derive/clear             - Drop cached subscriptions");

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

/// Hydrate the sandbox chain from the configured export, or start empty
fn load_chain(config: &ServerConfig) -> anyhow::Result<SandboxChain> {
    let path = config.state_file.as_path();
    if !path.exists() {
        tracing::warn!(
            "State file not found: {} - starting with an empty chain",
            path.display()
        );
        return Ok(SandboxChain::new());
    }

    let mut loader = StateLoader::new();
    let count = loader
        .load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let stats = loader.stats();
    tracing::info!(
        "Loaded {} entries from {} ({} storage, {} constants, block {})",
        count,
        path.display(),
        stats.storage_entries,
        stats.constant_entries,
        stats.max_block
    );

    Ok(loader.into_chain())
}

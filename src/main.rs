mod analyzer;
mod compiler;
mod config;
mod core;
mod engine;
mod installer;
mod languages;
mod runner;
mod server;
mod workspace;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::languages::LanguageRegistry;
use crate::runner::LocalRunner;
use crate::server::{AppState, RateLimiter};
use crate::workspace::WorkspaceManager;

/// Workspaces older than this at startup belong to a previous process
const STALE_WORKSPACE_AGE: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderunner=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;

    // Load language configurations
    let registry = LanguageRegistry::load(config.languages_config.as_deref())?;
    match &config.languages_config {
        Some(path) => info!("Loaded language configurations from {}", path.display()),
        None => info!("Using built-in language configurations"),
    }

    let workspaces = WorkspaceManager::new(&config.workspace_dir)?;
    workspaces.sweep_stale(STALE_WORKSPACE_AGE);
    info!("Workspaces under {}", workspaces.root().display());

    let engine = Engine::new(
        Arc::new(registry),
        Arc::new(workspaces),
        Arc::new(LocalRunner::new()),
        config.max_output_bytes,
        config.max_concurrent_runs,
    );

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_per_window,
        config.rate_limit_window,
    ));
    let _sweeper = rate_limiter.spawn_sweeper();

    let state = AppState {
        engine: Arc::new(engine),
        rate_limiter,
        trust_forwarded_for: config.trust_forwarded_for,
    };
    let router = server::build_router(state, &config)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(
        "Code runner listening on {} (CORS origin {}, {} requests/{}s per IP, {} concurrent runs)",
        config.bind_addr,
        config.cors_origin,
        config.rate_limit_per_window,
        config.rate_limit_window.as_secs(),
        config.max_concurrent_runs
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Code runner shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use review_loop::config::Config;
use review_loop::github::OctocrabFetcher;
use review_loop::orchestrator::Orchestrator;
use review_loop::persistence::FileReviewStore;
use review_loop::reviewer::CommandEngine;
use review_loop::server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_loop=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let token = std::env::var("GITHUB_TOKEN")
        .map_err(|_| "GITHUB_TOKEN environment variable is required")?;
    let fetcher = OctocrabFetcher::from_token(token)?;

    let engine_command = std::env::var("REVIEW_LOOP_ENGINE_CMD")
        .unwrap_or_else(|_| "review-engine".to_string());
    let engine = CommandEngine::new(engine_command);

    let store = FileReviewStore::new(config.state_dir.clone());
    let port = config.port;

    let orchestrator = Arc::new(Orchestrator::new(store, fetcher, engine, config));

    // Resume any review a previous process left unfinished.
    let resumed = orchestrator.resume_persisted().await?;
    if resumed > 0 {
        tracing::info!(count = resumed, "resumed persisted reviews");
    }

    let app = build_router(AppState::new(orchestrator));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

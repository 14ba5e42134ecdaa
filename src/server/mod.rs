//! HTTP server for the review loop.
//!
//! A thin surface over the orchestrator:
//! - schedule and cancel review runs
//! - inspect active runs, the queue, and persisted review records
//! - health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /api/v1/repos/{owner}/{repo}/reviews/{pr}` - Schedules a review run (202 Accepted)
//! - `POST /api/v1/repos/{owner}/{repo}/reviews/{pr}/cancel` - Cancels a running review
//! - `GET  /api/v1/repos/{owner}/{repo}/reviews/{pr}` - Returns the persisted review record
//! - `GET  /api/v1/reviews/active` - Lists reviews holding a concurrency permit
//! - `GET  /api/v1/reviews/queue` - Reports the number of queued reviews
//! - `GET  /healthz` - Returns 200 if the server is running

use std::sync::Arc;

pub mod health;
pub mod reviews;

pub use health::health_handler;

use crate::github::StatusFetcher;
use crate::orchestrator::Orchestrator;
use crate::persistence::ReviewStore;
use crate::reviewer::ReviewEngine;

/// Shared application state, passed to handlers via axum's `State` extractor.
pub struct AppState<S, F, E> {
    orchestrator: Arc<Orchestrator<S, F, E>>,
}

// Derived Clone would require S/F/E: Clone; only the Arc is cloned.
impl<S, F, E> Clone for AppState<S, F, E> {
    fn clone(&self) -> Self {
        AppState {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

impl<S, F, E> AppState<S, F, E> {
    pub fn new(orchestrator: Arc<Orchestrator<S, F, E>>) -> Self {
        AppState { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<S, F, E>> {
        &self.orchestrator
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S, F, E>(app_state: AppState<S, F, E>) -> axum::Router
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/api/v1/repos/{owner}/{repo}/reviews/{pr}",
            post(reviews::schedule_handler).get(reviews::state_handler),
        )
        .route(
            "/api/v1/repos/{owner}/{repo}/reviews/{pr}/cancel",
            post(reviews::cancel_handler),
        )
        .route("/api/v1/reviews/active", get(reviews::active_handler))
        .route("/api/v1/reviews/queue", get(reviews::queue_handler))
        .route("/healthz", get(health_handler))
        .with_state(app_state)
}

//! Review scheduling, cancellation, and inspection endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::AppState;
use crate::github::StatusFetcher;
use crate::orchestrator::ReviewRequest;
use crate::persistence::{ReviewStore, StoreError};
use crate::reviewer::ReviewEngine;
use crate::types::{PrNumber, RepoId, ReviewState};

/// Errors surfaced by the review endpoints.
#[derive(Debug, Error)]
pub enum ReviewsError {
    /// The trigger is not on the configured allow-list.
    #[error("trigger {0:?} is not allowed")]
    Unauthorized(String),

    /// No persisted record exists for the PR.
    #[error("no review record for {repo}#{pr}")]
    RecordNotFound { repo: RepoId, pr: PrNumber },

    /// No run is registered for the PR, so there is nothing to cancel.
    #[error("no active review for {repo}#{pr}")]
    NoActiveRun { repo: RepoId, pr: PrNumber },

    /// Store error reading a record.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ReviewsError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReviewsError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ReviewsError::RecordNotFound { .. } | ReviewsError::NoActiveRun { .. } => {
                StatusCode::NOT_FOUND
            }
            ReviewsError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Request body for scheduling a review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub pr_url: String,
    pub branch_name: String,
    pub triggered_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub scheduled: bool,
}

/// Request body for cancelling a review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub requested_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// One entry in the active-reviews listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveReviewEntry {
    pub owner: String,
    pub repo: String,
    pub pr: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueResponse {
    pub queued: usize,
}

/// Schedules a review run as a background task.
///
/// The run itself may take hours (it polls CI between iterations); the
/// handler only checks authorization, spawns the run, and returns
/// 202 Accepted. Outcomes are observable via the record endpoint.
pub async fn schedule_handler<S, F, E>(
    State(app_state): State<AppState<S, F, E>>,
    Path((owner, repo, pr)): Path<(String, String, u64)>,
    Json(body): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ReviewsError>
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    let orchestrator = app_state.orchestrator();
    if !orchestrator.config().is_trigger_allowed(&body.triggered_by) {
        return Err(ReviewsError::Unauthorized(body.triggered_by));
    }

    let request = ReviewRequest {
        pr_number: PrNumber(pr),
        repo: RepoId::new(owner, repo),
        pr_url: body.pr_url,
        branch_name: body.branch_name,
        triggered_by: body.triggered_by,
    };
    info!(repo = %request.repo, pr = %request.pr_number, "scheduling review run");

    let orchestrator = std::sync::Arc::clone(orchestrator);
    tokio::spawn(async move { orchestrator.run(request).await });

    Ok((StatusCode::ACCEPTED, Json(ScheduleResponse { scheduled: true })))
}

/// Cancels the run for a PR. 404 if no run is registered.
pub async fn cancel_handler<S, F, E>(
    State(app_state): State<AppState<S, F, E>>,
    Path((owner, repo, pr)): Path<(String, String, u64)>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ReviewsError>
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    let repo = RepoId::new(owner, repo);
    let pr = PrNumber(pr);
    if app_state
        .orchestrator()
        .cancel(&repo, pr, body.requested_by)
        .await
    {
        Ok(Json(CancelResponse { cancelled: true }))
    } else {
        Err(ReviewsError::NoActiveRun { repo, pr })
    }
}

/// Returns the persisted review record for a PR.
pub async fn state_handler<S, F, E>(
    State(app_state): State<AppState<S, F, E>>,
    Path((owner, repo, pr)): Path<(String, String, u64)>,
) -> Result<Json<ReviewState>, ReviewsError>
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    let repo = RepoId::new(owner, repo);
    let pr = PrNumber(pr);
    let state = app_state
        .orchestrator()
        .get_review_state(&repo, pr)
        .await?
        .ok_or(ReviewsError::RecordNotFound { repo, pr })?;
    Ok(Json(state))
}

/// Lists reviews currently holding a concurrency permit.
pub async fn active_handler<S, F, E>(
    State(app_state): State<AppState<S, F, E>>,
) -> Json<Vec<ActiveReviewEntry>>
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    let active = app_state.orchestrator().get_active_reviews().await;
    Json(
        active
            .into_iter()
            .map(|(repo, pr)| ActiveReviewEntry {
                owner: repo.owner,
                repo: repo.repo,
                pr: pr.0,
            })
            .collect(),
    )
}

/// Reports how many runs are queued for a concurrency permit.
pub async fn queue_handler<S, F, E>(
    State(app_state): State<AppState<S, F, E>>,
) -> Json<QueueResponse>
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    Json(QueueResponse {
        queued: app_state.orchestrator().get_queue_size().await,
    })
}

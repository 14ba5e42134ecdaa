//! The orchestrator: drives the bounded review-and-fix loop for one PR.
//!
//! One `run()` call owns one PR's review from trigger to terminal status.
//! The loop per iteration: persist, wait for checks, branch exhaustively on
//! the wait outcome, run the review engine when checks resolve, persist
//! again. Every failure inside the loop becomes a state mutation; `run()`
//! always returns a report, never an error.
//!
//! Concurrency is bounded by a semaphore shared across all runs; a run that
//! cannot get a permit queues (acquire blocks, it does not fail). Each run
//! registers a cancellation token with the controller so `cancel()` can
//! interrupt it at the next checkpoint.

pub mod controller;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{Config, RECOVERY_TRIGGER};
use crate::github::StatusFetcher;
use crate::persistence::{ReviewStore, StoreError};
use crate::reviewer::ReviewEngine;
use crate::types::{
    CheckStatus, PrNumber, RepoId, ReviewState, ReviewStatus, WaitForChecksResult, WaitOutcome,
};
use crate::waiter::CheckWaiter;

pub use controller::{ReviewController, ReviewKey};

/// A request to run the review loop for one PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub pr_number: PrNumber,
    pub repo: RepoId,
    pub pr_url: String,
    pub branch_name: String,

    /// Who asked for this run; checked against the configured allow-list.
    pub triggered_by: String,
}

/// How one `run()` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    /// Checks green and no outstanding findings.
    ReadyToMerge,

    /// The PR was closed while under review.
    PrClosed,

    /// The PR was merged while under review.
    PrMerged,

    /// Cancellation was requested and honored.
    Cancelled,

    /// Repeated failures exhausted the tolerance threshold.
    Failed,

    /// The iteration budget ran out with findings remaining.
    MaxIterationsReached,

    /// The trigger was not on the allow-list; no state was touched.
    Unauthorized,

    /// A run for this PR is already registered.
    AlreadyRunning,
}

/// The caller-facing summary of one `run()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub result: RunResult,
    pub pr_number: PrNumber,
    pub iterations_completed: u32,

    /// Whether the last observed CI state was all green.
    pub ci_all_passed: bool,

    /// Failure detail, present when `result` is `Failed`.
    pub error: Option<String>,
}

/// Supervises review runs: concurrency limit, cancellation, persistence.
///
/// Constructed explicitly with its collaborators; no global state. Shared
/// across tasks behind an `Arc`.
pub struct Orchestrator<S, F, E> {
    store: S,
    fetcher: F,
    engine: E,
    config: Config,
    controller: ReviewController,
    semaphore: Arc<Semaphore>,
}

impl<S, F, E> Orchestrator<S, F, E>
where
    S: ReviewStore,
    F: StatusFetcher,
    E: ReviewEngine,
{
    pub fn new(store: S, fetcher: F, engine: E, config: Config) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_reviews));
        Orchestrator {
            store,
            fetcher,
            engine,
            config,
            controller: ReviewController::new(),
            semaphore,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the review loop for one PR to a terminal status.
    ///
    /// Long-running: callers that need non-blocking behavior spawn this as a
    /// background task. Never returns an error; every failure mode is a
    /// `RunResult`.
    #[instrument(skip_all, fields(repo = %request.repo, pr = %request.pr_number, trigger = %request.triggered_by))]
    pub async fn run(&self, request: ReviewRequest) -> RunReport {
        if !self.config.is_trigger_allowed(&request.triggered_by) {
            warn!("review trigger rejected");
            return RunReport {
                result: RunResult::Unauthorized,
                pr_number: request.pr_number,
                iterations_completed: 0,
                ci_all_passed: false,
                error: Some(format!("trigger {:?} is not allowed", request.triggered_by)),
            };
        }

        let key: ReviewKey = (request.repo.clone(), request.pr_number);
        let Some(token) = self.controller.register(key.clone()).await else {
            info!("review already running for this PR");
            return RunReport {
                result: RunResult::AlreadyRunning,
                pr_number: request.pr_number,
                iterations_completed: 0,
                ci_all_passed: false,
                error: None,
            };
        };

        let report = self.run_registered(&request, &key, token).await;
        self.controller.unregister(&key).await;
        report
    }

    async fn run_registered(
        &self,
        request: &ReviewRequest,
        key: &ReviewKey,
        token: CancellationToken,
    ) -> RunReport {
        // Queue for a concurrency permit; a cancel while queued wins.
        let permit = tokio::select! {
            _ = token.cancelled() => None,
            permit = self.semaphore.acquire() => permit.ok(),
        };

        let mut state = self.load_or_create(request).await;

        let Some(_permit) = permit else {
            let by = self
                .controller
                .cancelled_by(key)
                .await
                .unwrap_or_else(|| "unknown".to_string());
            info!(cancelled_by = %by, "review cancelled while queued");
            state.request_cancellation(by);
            state.transition(ReviewStatus::Cancelled);
            self.save_best_effort(&state).await;
            return self.report(RunResult::Cancelled, &state, false);
        };

        self.controller.mark_admitted(key).await;
        info!(iteration = state.current_iteration, "review run admitted");

        if let Err(e) = self.store.save(&state).await {
            return self.fail_on_persistence(&mut state, e).await;
        }

        // Outstanding findings from the most recent engine report. `None`
        // until the engine has run once this process lifetime, so a resumed
        // review always re-reviews before promoting to ready-to-merge.
        let mut outstanding: Option<u32> = None;
        let mut ci_all_passed = false;
        let mut result: Option<RunResult> = None;

        while state.should_continue() {
            state.start_iteration();
            if let Err(e) = self.store.save(&state).await {
                state.abandon_iteration();
                return self.fail_on_persistence(&mut state, e).await;
            }

            let expected_head = state.last_known_head_sha.clone();
            let mut waiter = CheckWaiter::with_token(self.config.waiter_config(), token.clone())
                .with_expected_bots(self.config.expected_bots.iter().cloned());
            let wait = waiter
                .wait_for_all_checks(
                    &self.fetcher,
                    &state.repo,
                    state.pr_number,
                    expected_head.as_ref(),
                )
                .await;
            ci_all_passed = wait.all_passed;

            match wait.result {
                WaitOutcome::PrClosed => {
                    info!("PR closed; ending review");
                    state.abandon_iteration();
                    state.transition(ReviewStatus::Cancelled);
                    result = Some(RunResult::PrClosed);
                    break;
                }

                WaitOutcome::PrMerged => {
                    info!("PR merged; review complete");
                    state.abandon_iteration();
                    state.transition(ReviewStatus::Completed);
                    ci_all_passed = true;
                    result = Some(RunResult::PrMerged);
                    break;
                }

                WaitOutcome::Cancelled => {
                    let by = self
                        .controller
                        .cancelled_by(key)
                        .await
                        .unwrap_or_else(|| "unknown".to_string());
                    info!(cancelled_by = %by, "review cancelled");
                    state.abandon_iteration();
                    state.request_cancellation(by);
                    state.transition(ReviewStatus::Cancelled);
                    result = Some(RunResult::Cancelled);
                    break;
                }

                WaitOutcome::ForcePush => {
                    // The iteration restarts against the new head without
                    // consuming budget and without an audit record.
                    if let Some(sha) = wait.final_head_sha.clone() {
                        info!(new_head = %sha.short(), "force-push observed; restarting iteration");
                        state.observe_head(sha);
                    }
                    state.abandon_iteration();
                    if let Err(e) = self.store.save(&state).await {
                        return self.fail_on_persistence(&mut state, e).await;
                    }
                    continue;
                }

                WaitOutcome::Timeout | WaitOutcome::Error => {
                    let message = wait
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "wait for checks failed".to_string());
                    warn!(outcome = ?wait.result, %message, "wait did not resolve");
                    state.record_error(message);
                    if state.consecutive_failures >= self.config.consecutive_failure_threshold {
                        state.abandon_iteration();
                        state.transition(ReviewStatus::Failed);
                        result = Some(RunResult::Failed);
                        break;
                    }
                    // Below the threshold: attempt a remediation pass anyway.
                    // It completes without the success signal, so the failure
                    // streak stays intact.
                    if let Some(run_result) = self
                        .review_step(&mut state, &wait, &mut outstanding, CheckStatus::Pending, false)
                        .await
                    {
                        result = Some(run_result);
                        break;
                    }
                }

                WaitOutcome::Success => {
                    if let Some(sha) = wait.final_head_sha.clone() {
                        state.observe_head(sha);
                    }
                    let ci_status = if wait.all_passed {
                        CheckStatus::Passed
                    } else {
                        CheckStatus::Failed
                    };

                    // Nothing outstanding from the last report and CI green:
                    // nothing left for the engine to do.
                    if wait.all_passed && outstanding == Some(0) {
                        state.complete_iteration(0, 0, ci_status, true);
                        state.transition(ReviewStatus::ReadyToMerge);
                        result = Some(RunResult::ReadyToMerge);
                        break;
                    }

                    if let Some(run_result) = self
                        .review_step(&mut state, &wait, &mut outstanding, ci_status, true)
                        .await
                    {
                        result = Some(run_result);
                        break;
                    }
                }
            }

            if let Err(e) = self.store.save(&state).await {
                return self.fail_on_persistence(&mut state, e).await;
            }
        }

        let result = result.unwrap_or_else(|| {
            if state.cancellation_requested {
                state.transition(ReviewStatus::Cancelled);
                RunResult::Cancelled
            } else {
                info!(
                    iterations = state.current_iteration,
                    "iteration budget exhausted with work remaining"
                );
                state.transition(ReviewStatus::MaxIterationsReached);
                RunResult::MaxIterationsReached
            }
        });

        self.save_best_effort(&state).await;
        info!(result = ?result, status = state.status.name(), "review run finished");
        self.report(result, &state, ci_all_passed)
    }

    /// Runs the engine for the current iteration and completes it.
    ///
    /// Returns `Some(result)` when the step ends the whole run (promotion to
    /// ready-to-merge, or failure threshold reached), `None` to continue
    /// looping.
    async fn review_step(
        &self,
        state: &mut ReviewState,
        wait: &WaitForChecksResult,
        outstanding: &mut Option<u32>,
        ci_status: CheckStatus,
        wait_succeeded: bool,
    ) -> Option<RunResult> {
        state.transition(ReviewStatus::Reviewing);
        match self
            .engine
            .review_and_fix(&state.repo, state.pr_number, &state.branch_name)
            .await
        {
            Ok(report) => {
                state.transition(ReviewStatus::Fixing);
                for fix in &report.fixes {
                    state.add_applied_fix(fix.clone());
                }
                *outstanding = Some(report.outstanding_findings);
                info!(
                    findings = report.findings_count,
                    outstanding = report.outstanding_findings,
                    fixes = report.fixes_applied(),
                    "review pass finished"
                );
                state.complete_iteration(
                    report.findings_count,
                    report.fixes_applied(),
                    ci_status,
                    wait_succeeded,
                );
                if wait_succeeded && wait.all_passed && report.outstanding_findings == 0 {
                    state.transition(ReviewStatus::ReadyToMerge);
                    return Some(RunResult::ReadyToMerge);
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "review engine failed");
                state.record_error(format!("review engine: {e}"));
                if state.consecutive_failures >= self.config.consecutive_failure_threshold {
                    state.abandon_iteration();
                    state.transition(ReviewStatus::Failed);
                    return Some(RunResult::Failed);
                }
                state.complete_iteration(0, 0, ci_status, false);
                None
            }
        }
    }

    /// Loads a resumable record for the PR, or starts a fresh one.
    ///
    /// A terminal record means the previous review cycle is over; a new
    /// trigger starts a new cycle with a fresh record.
    async fn load_or_create(&self, request: &ReviewRequest) -> ReviewState {
        match self.store.load(&request.repo, request.pr_number).await {
            Ok(Some(mut existing)) if existing.status.is_active() => {
                // A record interrupted mid-iteration has an open iteration
                // with no audit record; roll it back so it is retried
                // without consuming extra budget.
                if (existing.iteration_history.len() as u32) < existing.current_iteration {
                    existing.abandon_iteration();
                }
                info!(
                    iteration = existing.current_iteration,
                    status = existing.status.name(),
                    "resuming persisted review"
                );
                existing
            }
            Ok(_) => self.fresh_state(request),
            Err(e) => {
                warn!(error = %e, "could not load persisted review; starting fresh");
                self.fresh_state(request)
            }
        }
    }

    fn fresh_state(&self, request: &ReviewRequest) -> ReviewState {
        ReviewState::new(
            request.pr_number,
            request.repo.clone(),
            request.pr_url.clone(),
            request.branch_name.clone(),
            self.config.max_iterations,
        )
    }

    async fn fail_on_persistence(&self, state: &mut ReviewState, e: StoreError) -> RunReport {
        error!(error = %e, "failed to persist review state");
        state.record_error(format!("persistence failure: {e}"));
        state.transition(ReviewStatus::Failed);
        self.save_best_effort(state).await;
        self.report(RunResult::Failed, state, false)
    }

    async fn save_best_effort(&self, state: &ReviewState) {
        if let Err(e) = self.store.save(state).await {
            error!(error = %e, "failed to persist final review state");
        }
    }

    fn report(&self, result: RunResult, state: &ReviewState, ci_all_passed: bool) -> RunReport {
        RunReport {
            result,
            pr_number: state.pr_number,
            iterations_completed: state.current_iteration,
            ci_all_passed,
            error: match result {
                RunResult::Failed => state.last_error.clone(),
                _ => None,
            },
        }
    }

    /// Cancels the run for a PR, if one is registered.
    ///
    /// Returns true iff a run (queued or admitted) existed; its token is
    /// fired and the run honors it at the next checkpoint.
    pub async fn cancel(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        requested_by: impl Into<String>,
    ) -> bool {
        let key = (repo.clone(), pr);
        let cancelled = self.controller.cancel(&key, requested_by).await;
        if cancelled {
            info!(repo = %repo, pr = %pr, "cancellation requested");
        }
        cancelled
    }

    /// Read-only view of the persisted record for a PR.
    pub async fn get_review_state(
        &self,
        repo: &RepoId,
        pr: PrNumber,
    ) -> Result<Option<ReviewState>, StoreError> {
        self.store.load(repo, pr).await
    }

    /// Keys of runs currently holding a concurrency permit.
    pub async fn get_active_reviews(&self) -> Vec<ReviewKey> {
        self.controller.active_reviews().await
    }

    /// Number of runs queued for a permit.
    pub async fn get_queue_size(&self) -> usize {
        self.controller.queue_size().await
    }
}

impl<S, F, E> Orchestrator<S, F, E>
where
    S: ReviewStore + 'static,
    F: StatusFetcher + 'static,
    E: ReviewEngine + 'static,
{
    /// Resumes every persisted non-terminal review as a background run.
    ///
    /// Called once at process startup; returns the number of runs spawned.
    pub async fn resume_persisted(self: &Arc<Self>) -> Result<usize, StoreError> {
        let records = self.store.load_all_active().await?;
        let count = records.len();
        for state in records {
            info!(
                repo = %state.repo,
                pr = %state.pr_number,
                iteration = state.current_iteration,
                "resuming review after restart"
            );
            let request = ReviewRequest {
                pr_number: state.pr_number,
                repo: state.repo.clone(),
                pr_url: state.pr_url.clone(),
                branch_name: state.branch_name.clone(),
                triggered_by: RECOVERY_TRIGGER.to_string(),
            };
            let orchestrator = Arc::clone(self);
            tokio::spawn(async move { orchestrator.run(request).await });
        }
        Ok(count)
    }
}

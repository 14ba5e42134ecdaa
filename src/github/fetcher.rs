//! CI/status fetching against the GitHub API.
//!
//! `StatusFetcher` is the contract the check waiter polls: one idempotent
//! read returning the PR's checks, head SHA, and open/closed/merged state.
//! `OctocrabFetcher` implements it with octocrab, categorizing errors and
//! retrying transient ones with backoff.

use std::future::Future;

use octocrab::Octocrab;
use octocrab::params::repos::Commitish;
use tracing::debug;

use crate::types::{CheckStatus, CiCheckResult, CiSnapshot, PrLifecycle, PrNumber, RepoId, Sha};

use super::error::FetchError;
use super::retry::{retry_with_backoff, RetryConfig};

/// Fetches the current CI/PR status for a pull request.
///
/// Implementations must be safe to call repeatedly (idempotent read). The
/// waiter polls this on every tick; failures feed its error-counting path.
pub trait StatusFetcher: Send + Sync {
    /// Returns a snapshot of the PR's checks, head SHA, and lifecycle state.
    fn fetch_ci_status(
        &self,
        repo: &RepoId,
        pr: PrNumber,
    ) -> impl Future<Output = Result<CiSnapshot, FetchError>> + Send;
}

/// A `StatusFetcher` backed by the GitHub REST API via octocrab.
#[derive(Clone)]
pub struct OctocrabFetcher {
    client: Octocrab,
    retry_config: RetryConfig,
}

impl OctocrabFetcher {
    /// Creates a fetcher from a pre-configured octocrab instance.
    pub fn new(client: Octocrab) -> Self {
        Self {
            client,
            retry_config: RetryConfig::DEFAULT,
        }
    }

    /// Creates a fetcher from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Overrides the retry configuration.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    async fn fetch_once(&self, repo: &RepoId, pr: PrNumber) -> Result<CiSnapshot, FetchError> {
        let pull = self
            .client
            .pulls(&repo.owner, &repo.repo)
            .get(pr.0)
            .await
            .map_err(FetchError::from_octocrab)?;

        let head_sha = Sha::new(pull.head.sha.clone());

        let pr_state = if pull.merged_at.is_some() {
            PrLifecycle::Merged
        } else {
            match pull.state {
                Some(octocrab::models::IssueState::Closed) => PrLifecycle::Closed,
                _ => PrLifecycle::Open,
            }
        };

        // Closed/merged PRs short-circuit in the waiter; their check list is
        // not consulted, so skip the extra API call.
        if pr_state != PrLifecycle::Open {
            return Ok(CiSnapshot {
                checks: Vec::new(),
                head_sha,
                pr_state,
            });
        }

        let check_runs = self
            .client
            .checks(&repo.owner, &repo.repo)
            .list_check_runs_for_git_ref(Commitish(head_sha.0.clone()))
            .send()
            .await
            .map_err(FetchError::from_octocrab)?;

        let checks: Vec<CiCheckResult> = check_runs
            .check_runs
            .into_iter()
            .map(|run| CiCheckResult {
                status: classify_check_run(run.conclusion.as_deref()),
                detail: run.details_url,
                name: run.name,
            })
            .collect();

        debug!(
            repo = %repo,
            pr = %pr,
            checks = checks.len(),
            head = %head_sha.short(),
            "fetched CI status"
        );

        Ok(CiSnapshot {
            checks,
            head_sha,
            pr_state,
        })
    }
}

impl StatusFetcher for OctocrabFetcher {
    async fn fetch_ci_status(
        &self,
        repo: &RepoId,
        pr: PrNumber,
    ) -> Result<CiSnapshot, FetchError> {
        retry_with_backoff(self.retry_config, || self.fetch_once(repo, pr)).await
    }
}

/// Maps a check run's conclusion string to a `CheckStatus`.
///
/// A run without a conclusion (queued, in progress) is `Pending`. Neutral and
/// skipped conclusions count as passed: they never block a merge.
fn classify_check_run(conclusion: Option<&str>) -> CheckStatus {
    match conclusion {
        Some("success") | Some("neutral") | Some("skipped") => CheckStatus::Passed,
        Some("failure") | Some("timed_out") | Some("cancelled") | Some("action_required")
        | Some("startup_failure") | Some("stale") => CheckStatus::Failed,
        Some(_) => CheckStatus::Failed, // Unknown conclusions are treated as blocking
        None => CheckStatus::Pending,
    }
}

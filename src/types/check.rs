//! CI check snapshots and wait outcomes.
//!
//! These types represent what the status fetcher reports about a PR on each
//! poll tick, and how a single wait call resolved.

use serde::{Deserialize, Serialize};

use super::ids::Sha;

/// The resolution state of one named CI check.
///
/// Queued/in-progress checks map to `Pending` at the fetcher boundary;
/// errored/timed-out checks map to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The check has not reported a conclusion yet.
    Pending,

    /// The check concluded successfully.
    Passed,

    /// The check concluded unsuccessfully (failure, error, timeout).
    Failed,
}

impl CheckStatus {
    /// Returns true if the check has reached a terminal conclusion.
    pub fn is_resolved(&self) -> bool {
        matches!(self, CheckStatus::Passed | CheckStatus::Failed)
    }
}

/// An immutable snapshot of one CI check, owned by one poll result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCheckResult {
    /// The check's name as reported by CI (e.g., "build", "clippy").
    pub name: String,

    /// The check's resolution state.
    pub status: CheckStatus,

    /// Optional detail text (failure summary, target URL, etc.).
    pub detail: Option<String>,
}

impl CiCheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus) -> Self {
        CiCheckResult {
            name: name.into(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// The open/closed/merged state of a PR as reported by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrLifecycle {
    /// The PR is open; the review loop can proceed.
    Open,

    /// The PR was closed without merging.
    Closed,

    /// The PR was merged.
    Merged,
}

/// One poll result from the status fetcher: checks, head SHA, and PR state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiSnapshot {
    /// All checks reported for the PR's current head commit.
    pub checks: Vec<CiCheckResult>,

    /// The commit currently at the tip of the PR branch.
    pub head_sha: Sha,

    /// Whether the PR is open, closed, or merged.
    pub pr_state: PrLifecycle,
}

/// How a single `wait_for_all_checks` invocation resolved.
///
/// Exactly one outcome per wait call. Callers branch on this with an
/// exhaustive match so the compiler flags any newly added outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// All required checks (CI + expected bots) resolved.
    Success,

    /// The PR was closed by a human while waiting.
    PrClosed,

    /// The PR was merged while waiting.
    PrMerged,

    /// The PR's head moved away from the expected SHA (non-fast-forward push).
    ForcePush,

    /// Cancellation was requested and observed on a poll tick.
    Cancelled,

    /// The wait exceeded its timeout before checks resolved.
    Timeout,

    /// Consecutive fetch failures exceeded the tolerated threshold.
    Error,
}

/// The full result of one wait call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitForChecksResult {
    /// How the wait resolved.
    pub result: WaitOutcome,

    /// True only if every observed check passed. Meaningful for `Success`;
    /// false for every other outcome.
    pub all_passed: bool,

    /// The checks from the last successful fetch (empty if none succeeded).
    pub ci_checks: Vec<CiCheckResult>,

    /// The PR lifecycle from the last successful fetch.
    pub pr_state: PrLifecycle,

    /// The head SHA from the last successful fetch. For `ForcePush` this is
    /// the new head.
    pub final_head_sha: Option<Sha>,

    /// Human-readable detail for non-success outcomes.
    pub error_message: Option<String>,
}

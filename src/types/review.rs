//! Review lifecycle state: the persisted aggregate for one PR's review loop.
//!
//! `ReviewState` is the single source of truth for one `(repo, pr_number)`
//! review. It is mutated only by the orchestrator and the wait-outcome
//! handlers, persisted after every mutation, and reloadable after a crash.
//! `should_continue` is derivable purely from persisted fields, so a
//! reloaded state behaves identically to a live one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::check::CheckStatus;
use super::ids::{PrNumber, RepoId, Sha};

/// Schema version for persisted review records. Increment on breaking changes.
pub const REVIEW_SCHEMA_VERSION: u32 = 1;

/// The lifecycle status of a review.
///
/// Active statuses may transition; terminal statuses are absorbing — once a
/// review is terminal, no transition method changes it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Created but no iteration started yet.
    Pending,

    /// Waiting for CI checks and bot reviews to resolve.
    AwaitingChecks,

    /// The review engine is examining the PR.
    Reviewing,

    /// Fixes for review findings are being applied.
    Fixing,

    /// All checks green and no outstanding findings.
    ReadyToMerge,

    /// The PR was merged; nothing left to do.
    Completed,

    /// The review was cancelled (explicitly, or because the PR closed).
    Cancelled,

    /// Repeated failures exhausted the tolerance threshold.
    Failed,

    /// The iteration budget ran out with work remaining.
    MaxIterationsReached,
}

impl ReviewStatus {
    /// Returns true if the review can still make progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Pending
                | ReviewStatus::AwaitingChecks
                | ReviewStatus::Reviewing
                | ReviewStatus::Fixing
        )
    }

    /// Returns true if the status is absorbing.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Stable name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::AwaitingChecks => "awaiting_checks",
            ReviewStatus::Reviewing => "reviewing",
            ReviewStatus::Fixing => "fixing",
            ReviewStatus::ReadyToMerge => "ready_to_merge",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Cancelled => "cancelled",
            ReviewStatus::Failed => "failed",
            ReviewStatus::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

/// One fix attempt, appended by the review step. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFix {
    /// Unique ID for this fix attempt.
    pub fix_id: String,

    /// The review finding this fix addresses.
    pub finding_id: String,

    /// The file the fix touched.
    pub file_path: String,

    /// Short human-readable description of the fix.
    pub description: String,

    /// The commit that applied the fix, if one was created.
    pub commit_sha: Option<Sha>,

    /// Whether the fix was applied successfully.
    pub success: bool,
}

/// Audit record for one completed loop iteration. Append-only.
///
/// An iteration restarted by a force-push appends no record; records exist
/// only for started-and-finished iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration_number: u32,

    /// Findings reported by the review engine this iteration.
    pub findings_count: u32,

    /// Fixes applied this iteration.
    pub fixes_applied: u32,

    /// Aggregate CI status observed for this iteration.
    pub ci_status: CheckStatus,

    /// When the iteration completed.
    pub timestamp: DateTime<Utc>,
}

/// The persisted aggregate root for one PR's review lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    // Identity (immutable after creation).
    pub pr_number: PrNumber,
    pub repo: RepoId,
    pub pr_url: String,
    pub branch_name: String,

    // Lifecycle.
    pub status: ReviewStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,

    // History.
    #[serde(default)]
    pub iteration_history: Vec<IterationRecord>,
    #[serde(default)]
    pub applied_fixes: Vec<AppliedFix>,

    /// The head SHA the current iteration is reviewing. A mid-wait mismatch
    /// against this value is a force-push.
    #[serde(default)]
    pub last_known_head_sha: Option<Sha>,

    // Failure tracking. `error_count` never decreases;
    // `consecutive_failures` resets only on an explicit success signal.
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,

    // Cancellation.
    #[serde(default)]
    pub cancellation_requested: bool,
    #[serde(default)]
    pub cancelled_by: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewState {
    /// Creates a fresh record for a PR with no iterations run.
    pub fn new(
        pr_number: PrNumber,
        repo: RepoId,
        pr_url: impl Into<String>,
        branch_name: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        ReviewState {
            schema_version: REVIEW_SCHEMA_VERSION,
            pr_number,
            repo,
            pr_url: pr_url.into(),
            branch_name: branch_name.into(),
            status: ReviewStatus::Pending,
            current_iteration: 0,
            max_iterations,
            iteration_history: Vec::new(),
            applied_fixes: Vec::new(),
            last_known_head_sha: None,
            error_count: 0,
            consecutive_failures: 0,
            last_error: None,
            cancellation_requested: false,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The single predicate gating loop re-entry.
    ///
    /// Derived purely from persisted fields so a reloaded record behaves
    /// identically to a live one.
    pub fn should_continue(&self) -> bool {
        self.status.is_active()
            && self.current_iteration < self.max_iterations
            && !self.cancellation_requested
    }

    /// Applies a status transition. Terminal statuses are absorbing: the
    /// transition is a no-op once the review is terminal.
    ///
    /// Returns the effective status after the call.
    pub fn transition(&mut self, next: ReviewStatus) -> ReviewStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.status = next;
        self.touch();
        self.status
    }

    /// Begins a new iteration: status to `AwaitingChecks`, counter advanced.
    ///
    /// Callers must check `should_continue()` first; starting an iteration
    /// past the budget would break `current_iteration <= max_iterations`.
    pub fn start_iteration(&mut self) {
        debug_assert!(self.should_continue(), "start_iteration past the budget");
        self.current_iteration += 1;
        self.transition(ReviewStatus::AwaitingChecks);
    }

    /// Rolls back a started iteration that will not complete.
    ///
    /// Used when a force-push restarts the iteration (the retry must not
    /// consume budget) and when a terminal event interrupts an in-flight
    /// iteration. Never touches `iteration_history`, so
    /// `iteration_history.len() == current_iteration` is preserved.
    pub fn abandon_iteration(&mut self) {
        self.current_iteration = self.current_iteration.saturating_sub(1);
        self.touch();
    }

    /// Completes the current iteration: appends one audit record.
    ///
    /// `success` is the explicit success signal — only then does
    /// `consecutive_failures` reset. A remediation iteration run after a
    /// timeout or fetch error completes with `success = false` and leaves
    /// the failure streak intact.
    pub fn complete_iteration(
        &mut self,
        findings_count: u32,
        fixes_applied: u32,
        ci_status: CheckStatus,
        success: bool,
    ) {
        self.iteration_history.push(IterationRecord {
            iteration_number: self.current_iteration,
            findings_count,
            fixes_applied,
            ci_status,
            timestamp: Utc::now(),
        });
        if success {
            self.consecutive_failures = 0;
        }
        self.touch();
    }

    /// Records a transient failure (fetch error, wait timeout, engine error).
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(message.into());
        self.touch();
    }

    /// Marks cancellation as requested, recording the requester once.
    pub fn request_cancellation(&mut self, requested_by: impl Into<String>) {
        if !self.cancellation_requested {
            self.cancellation_requested = true;
            self.cancelled_by = Some(requested_by.into());
            self.cancelled_at = Some(Utc::now());
            self.touch();
        }
    }

    /// Appends one fix attempt to the audit trail.
    pub fn add_applied_fix(&mut self, fix: AppliedFix) {
        self.applied_fixes.push(fix);
        self.touch();
    }

    /// Updates the head SHA the loop is reviewing (after a force-push).
    pub fn observe_head(&mut self, sha: Sha) {
        self.last_known_head_sha = Some(sha);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

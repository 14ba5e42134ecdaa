//! The review engine: the pluggable review-and-fix step.
//!
//! The orchestrator treats the engine as a black box behind `ReviewEngine`:
//! given a PR whose checks have resolved, examine it, apply fixes, push
//! commits, and report what happened. `CommandEngine` is the production
//! implementation, shelling out to an external reviewer process that prints
//! a JSON report on stdout.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{AppliedFix, PrNumber, RepoId};

/// What one review-and-fix pass reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Findings surfaced by this pass.
    pub findings_count: u32,

    /// Findings still unresolved after fixes were applied. Zero means the
    /// PR has nothing left to address.
    pub outstanding_findings: u32,

    /// Fix attempts made during this pass, successful or not.
    #[serde(default)]
    pub fixes: Vec<AppliedFix>,
}

impl ReviewReport {
    /// The number of fixes that were applied successfully.
    pub fn fixes_applied(&self) -> u32 {
        self.fixes.iter().filter(|f| f.success).count() as u32
    }
}

/// Errors from a review engine invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be spawned or its IO failed.
    #[error("engine process error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine exited non-zero.
    #[error("engine exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    /// The engine's stdout was not a valid report.
    #[error("unparseable engine report: {0}")]
    BadReport(#[from] serde_json::Error),

    /// The engine exceeded its run-time budget and was killed.
    #[error("engine timed out after {0:?}")]
    TimedOut(Duration),
}

/// The review-and-fix step.
///
/// One call per iteration, only after the PR's checks have resolved. The
/// engine is expected to push any fix commits itself; the orchestrator only
/// records what the report says.
pub trait ReviewEngine: Send + Sync {
    /// Reviews the PR and applies fixes, returning a report of what was done.
    fn review_and_fix(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        branch: &str,
    ) -> impl Future<Output = Result<ReviewReport, EngineError>> + Send;
}

/// A `ReviewEngine` that runs an external command.
///
/// The command is invoked as `<program> <args..> <owner/repo> <pr> <branch>`
/// and must print a JSON `ReviewReport` on stdout. Stderr is captured for
/// diagnostics on failure.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

/// Default run-time budget for one engine invocation (20 minutes).
const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(1200);

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandEngine {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_once(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        branch: &str,
    ) -> Result<ReviewReport, EngineError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(repo.to_string())
            .arg(pr.0.to_string())
            .arg(branch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                // kill_on_drop reaps the abandoned child
                warn!(repo = %repo, pr = %pr, "review engine timed out, killing");
                return Err(EngineError::TimedOut(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(EngineError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let report: ReviewReport = serde_json::from_slice(&output.stdout)?;
        debug!(
            repo = %repo,
            pr = %pr,
            findings = report.findings_count,
            outstanding = report.outstanding_findings,
            fixes = report.fixes.len(),
            "review engine completed"
        );
        Ok(report)
    }
}

impl ReviewEngine for CommandEngine {
    async fn review_and_fix(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        branch: &str,
    ) -> Result<ReviewReport, EngineError> {
        self.run_once(repo, pr, branch).await
    }
}

//! The check waiter: polls CI until every required check resolves.
//!
//! One `wait_for_all_checks` call covers one iteration's wait phase. Each
//! poll tick runs a fixed decision sequence; the first condition that holds
//! resolves the wait:
//!
//! 1. cancellation (checked before the fetch, and again after it so a
//!    cancel that lands mid-fetch discards the in-flight result)
//! 2. PR closed / merged
//! 3. force-push (head SHA moved away from the expected commit)
//! 4. all required checks resolved
//! 5. timeout
//!
//! Fetch failures don't resolve the wait until they accumulate: the waiter
//! counts consecutive failures and only resolves to `Error` when the count
//! reaches the configured threshold. A successful fetch resets the count.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WaiterConfig;
use crate::github::StatusFetcher;
use crate::types::{
    CiSnapshot, PrLifecycle, PrNumber, RepoId, Sha, WaitForChecksResult, WaitOutcome,
};

/// Polls a `StatusFetcher` until the wait resolves.
///
/// One waiter per review run. The cancellation token is shared with the
/// orchestrator's controller so an external cancel request interrupts the
/// sleep between polls rather than waiting for the next tick.
pub struct CheckWaiter {
    config: WaiterConfig,
    token: CancellationToken,

    /// Bot checks that must report before a wait can resolve to `Success`.
    /// Matched case-insensitively as a substring of the check name.
    expected_bots: Vec<String>,

    /// Total fetch failures observed across the waiter's lifetime.
    error_count: u32,

    /// Consecutive fetch failures; resets on any successful fetch.
    consecutive_failures: u32,
}

impl CheckWaiter {
    pub fn new(config: WaiterConfig) -> Self {
        Self::with_token(config, CancellationToken::new())
    }

    /// Creates a waiter sharing an externally owned cancellation token.
    pub fn with_token(config: WaiterConfig, token: CancellationToken) -> Self {
        CheckWaiter {
            config,
            token,
            expected_bots: Vec::new(),
            error_count: 0,
            consecutive_failures: 0,
        }
    }

    pub fn with_expected_bots(mut self, bots: impl IntoIterator<Item = String>) -> Self {
        self.expected_bots = bots.into_iter().collect();
        self
    }

    /// Requests cancellation of an in-flight wait.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Clears the failure counters for a fresh wait.
    pub fn reset(&mut self) {
        self.error_count = 0;
        self.consecutive_failures = 0;
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Waits until the PR's checks resolve or the wait is interrupted.
    ///
    /// `expected_head` is the commit the caller believes is at the branch
    /// tip; a fetched head that differs resolves to `ForcePush`. Pass `None`
    /// on the first wait for a PR, when no expectation exists yet.
    pub async fn wait_for_all_checks<F: StatusFetcher>(
        &mut self,
        fetcher: &F,
        repo: &RepoId,
        pr: PrNumber,
        expected_head: Option<&Sha>,
    ) -> WaitForChecksResult {
        let deadline = tokio::time::Instant::now() + self.config.check_timeout;
        let mut last_snapshot: Option<CiSnapshot> = None;

        loop {
            if self.token.is_cancelled() {
                return resolve(WaitOutcome::Cancelled, last_snapshot.as_ref(), None);
            }

            match fetcher.fetch_ci_status(repo, pr).await {
                Err(e) => {
                    self.error_count += 1;
                    self.consecutive_failures += 1;
                    warn!(
                        repo = %repo,
                        pr = %pr,
                        consecutive = self.consecutive_failures,
                        error = %e,
                        "status fetch failed"
                    );
                    if self.consecutive_failures >= self.config.fetch_failure_threshold {
                        return resolve(
                            WaitOutcome::Error,
                            last_snapshot.as_ref(),
                            Some(format!(
                                "{} consecutive fetch failures: {}",
                                self.consecutive_failures, e
                            )),
                        );
                    }
                }
                Ok(snapshot) => {
                    self.consecutive_failures = 0;

                    // A cancel that raced the fetch wins over whatever the
                    // fetch reported.
                    if self.token.is_cancelled() {
                        return resolve(WaitOutcome::Cancelled, Some(&snapshot), None);
                    }

                    match snapshot.pr_state {
                        PrLifecycle::Closed => {
                            info!(repo = %repo, pr = %pr, "PR closed while waiting");
                            return resolve(WaitOutcome::PrClosed, Some(&snapshot), None);
                        }
                        PrLifecycle::Merged => {
                            info!(repo = %repo, pr = %pr, "PR merged while waiting");
                            return resolve(WaitOutcome::PrMerged, Some(&snapshot), None);
                        }
                        PrLifecycle::Open => {}
                    }

                    if let Some(expected) = expected_head {
                        if snapshot.head_sha != *expected {
                            info!(
                                repo = %repo,
                                pr = %pr,
                                expected = %expected.short(),
                                observed = %snapshot.head_sha.short(),
                                "head moved while waiting (force-push)"
                            );
                            return resolve(
                                WaitOutcome::ForcePush,
                                Some(&snapshot),
                                Some(format!(
                                    "head moved from {} to {}",
                                    expected, snapshot.head_sha
                                )),
                            );
                        }
                    }

                    if self.all_required_resolved(&snapshot) {
                        let all_passed = snapshot
                            .checks
                            .iter()
                            .all(|c| c.status == crate::types::CheckStatus::Passed);
                        debug!(
                            repo = %repo,
                            pr = %pr,
                            checks = snapshot.checks.len(),
                            all_passed,
                            "all required checks resolved"
                        );
                        let mut result = resolve(WaitOutcome::Success, Some(&snapshot), None);
                        result.all_passed = all_passed;
                        return result;
                    }

                    last_snapshot = Some(snapshot);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return resolve(
                    WaitOutcome::Timeout,
                    last_snapshot.as_ref(),
                    Some(format!(
                        "checks did not resolve within {:?}",
                        self.config.check_timeout
                    )),
                );
            }

            tokio::select! {
                _ = self.token.cancelled() => {
                    return resolve(WaitOutcome::Cancelled, last_snapshot.as_ref(), None);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// True once every CI check has a conclusion and every expected bot has
    /// reported. An expected bot with no matching check counts as unresolved.
    fn all_required_resolved(&self, snapshot: &CiSnapshot) -> bool {
        let checks_resolved = snapshot.checks.iter().all(|c| c.status.is_resolved());
        let bots_reported = self.expected_bots.iter().all(|bot| {
            let bot = bot.to_lowercase();
            snapshot
                .checks
                .iter()
                .any(|c| c.name.to_lowercase().contains(&bot) && c.status.is_resolved())
        });
        checks_resolved && bots_reported
    }
}

fn resolve(
    outcome: WaitOutcome,
    snapshot: Option<&CiSnapshot>,
    error_message: Option<String>,
) -> WaitForChecksResult {
    WaitForChecksResult {
        result: outcome,
        all_passed: false,
        ci_checks: snapshot.map(|s| s.checks.clone()).unwrap_or_default(),
        pr_state: snapshot.map(|s| s.pr_state).unwrap_or(PrLifecycle::Open),
        final_head_sha: snapshot.map(|s| s.head_sha.clone()),
        error_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_utils::MockFetcher;
    use crate::types::{CheckStatus, CiCheckResult};

    fn waiter_config() -> WaiterConfig {
        WaiterConfig {
            poll_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(1800),
            fetch_failure_threshold: 3,
        }
    }

    fn repo() -> RepoId {
        RepoId::new("octocat", "hello-world")
    }

    fn sha(c: char) -> Sha {
        Sha::new(c.to_string().repeat(40))
    }

    fn snapshot(checks: Vec<CiCheckResult>, head: char, pr_state: PrLifecycle) -> CiSnapshot {
        CiSnapshot {
            checks,
            head_sha: sha(head),
            pr_state,
        }
    }

    fn open_snapshot(checks: Vec<CiCheckResult>) -> CiSnapshot {
        snapshot(checks, 'a', PrLifecycle::Open)
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_success_when_all_checks_pass() {
        let fetcher = MockFetcher::ok_sequence([open_snapshot(vec![
            CiCheckResult::new("build", CheckStatus::Passed),
            CiCheckResult::new("clippy", CheckStatus::Passed),
        ])]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert!(result.all_passed);
        assert_eq!(result.ci_checks.len(), 2);
        assert_eq!(result.final_head_sha, Some(sha('a')));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_check_still_resolves_but_not_all_passed() {
        let fetcher = MockFetcher::ok_sequence([open_snapshot(vec![
            CiCheckResult::new("build", CheckStatus::Passed),
            CiCheckResult::new("tests", CheckStatus::Failed),
        ])]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert!(!result.all_passed);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_pending_checks_resolve() {
        let fetcher = MockFetcher::ok_sequence([
            open_snapshot(vec![CiCheckResult::new("build", CheckStatus::Pending)]),
            open_snapshot(vec![CiCheckResult::new("build", CheckStatus::Pending)]),
            open_snapshot(vec![CiCheckResult::new("build", CheckStatus::Passed)]),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_pr_resolves_immediately() {
        let fetcher = MockFetcher::ok_sequence([snapshot(vec![], 'a', PrLifecycle::Closed)]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::PrClosed);
        assert!(!result.all_passed);
    }

    #[tokio::test(start_paused = true)]
    async fn merged_pr_resolves_immediately() {
        let fetcher = MockFetcher::ok_sequence([snapshot(vec![], 'a', PrLifecycle::Merged)]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::PrMerged);
    }

    #[tokio::test(start_paused = true)]
    async fn head_mismatch_is_a_force_push() {
        // Checks all pass but against the wrong commit: force-push wins.
        let fetcher = MockFetcher::ok_sequence([snapshot(
            vec![CiCheckResult::new("build", CheckStatus::Passed)],
            'b',
            PrLifecycle::Open,
        )]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let expected = sha('a');
        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), Some(&expected))
            .await;

        assert_eq!(result.result, WaitOutcome::ForcePush);
        assert_eq!(result.final_head_sha, Some(sha('b')));
        assert!(!result.all_passed);
        // The message names both commits so the record shows what moved.
        let message = result.error_message.unwrap();
        assert!(message.contains(&sha('a').0), "{}", message);
        assert!(message.contains(&sha('b').0), "{}", message);
    }

    #[tokio::test(start_paused = true)]
    async fn matching_head_is_not_a_force_push() {
        let fetcher = MockFetcher::ok_sequence([open_snapshot(vec![CiCheckResult::new(
            "build",
            CheckStatus::Passed,
        )])]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let expected = sha('a');
        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), Some(&expected))
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_fetch() {
        let fetcher = MockFetcher::ok_sequence([open_snapshot(vec![])]);
        let mut waiter = CheckWaiter::new(waiter_config());
        waiter.cancel();

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Cancelled);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_sleep_interrupts_the_wait() {
        let fetcher = MockFetcher::always(open_snapshot(vec![CiCheckResult::new(
            "build",
            CheckStatus::Pending,
        )]));
        let token = CancellationToken::new();
        let mut waiter = CheckWaiter::with_token(waiter_config(), token.clone());

        let handle = tokio::spawn({
            let fetcher = fetcher.clone();
            async move {
                waiter
                    .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
                    .await
            }
        });

        // Let one poll happen, then cancel mid-sleep.
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result.result, WaitOutcome::Cancelled);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_checks_never_resolve() {
        let fetcher = MockFetcher::always(open_snapshot(vec![CiCheckResult::new(
            "build",
            CheckStatus::Pending,
        )]));
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Timeout);
        assert!(result.error_message.is_some());
        // 1800s budget / 30s interval
        assert_eq!(fetcher.calls(), 61);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failures_below_threshold_keep_polling() {
        let fetcher = MockFetcher::sequence([
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
            Ok(open_snapshot(vec![CiCheckResult::new(
                "build",
                CheckStatus::Passed,
            )])),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert_eq!(waiter.error_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_consecutive_failures_resolve_to_error() {
        let fetcher = MockFetcher::sequence([
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Error);
        assert!(result.error_message.as_deref().unwrap().contains("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_fetch_resets_the_consecutive_count() {
        // Two failures, one success, two more failures: never hits three in
        // a row, so the wait resolves on the snapshot, not on Error.
        let fetcher = MockFetcher::sequence([
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
            Ok(open_snapshot(vec![CiCheckResult::new(
                "build",
                CheckStatus::Pending,
            )])),
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
            Ok(open_snapshot(vec![CiCheckResult::new(
                "build",
                CheckStatus::Passed,
            )])),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert_eq!(waiter.error_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_failure_counters_between_waits() {
        // A waiter reused across waits starts each one with a clean slate:
        // reset() drops the lifetime error count accumulated so far.
        let fetcher = MockFetcher::sequence([
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
            Ok(open_snapshot(vec![CiCheckResult::new(
                "build",
                CheckStatus::Passed,
            )])),
            Err(crate::github::FetchError::transient("503")),
            Err(crate::github::FetchError::transient("503")),
            Ok(open_snapshot(vec![CiCheckResult::new(
                "build",
                CheckStatus::Passed,
            )])),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let first = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;
        assert_eq!(first.result, WaitOutcome::Success);
        assert_eq!(waiter.error_count(), 2);

        waiter.reset();
        assert_eq!(waiter.error_count(), 0);

        let second = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;
        assert_eq!(second.result, WaitOutcome::Success);
        assert_eq!(waiter.error_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_expected_bot_keeps_the_wait_open() {
        let fetcher = MockFetcher::ok_sequence([
            open_snapshot(vec![CiCheckResult::new("build", CheckStatus::Passed)]),
            open_snapshot(vec![
                CiCheckResult::new("build", CheckStatus::Passed),
                CiCheckResult::new("CodeRabbit Review", CheckStatus::Passed),
            ]),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config())
            .with_expected_bots(["coderabbit".to_string()]);

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_bot_check_keeps_the_wait_open() {
        let fetcher = MockFetcher::ok_sequence([
            open_snapshot(vec![
                CiCheckResult::new("build", CheckStatus::Passed),
                CiCheckResult::new("sonarcloud", CheckStatus::Pending),
            ]),
            open_snapshot(vec![
                CiCheckResult::new("build", CheckStatus::Passed),
                CiCheckResult::new("sonarcloud", CheckStatus::Passed),
            ]),
        ]);
        let mut waiter = CheckWaiter::new(waiter_config())
            .with_expected_bots(["SonarCloud".to_string()]);

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_checks_and_no_expected_bots_resolves_trivially() {
        let fetcher = MockFetcher::ok_sequence([open_snapshot(vec![])]);
        let mut waiter = CheckWaiter::new(waiter_config());

        let result = waiter
            .wait_for_all_checks(&fetcher, &repo(), PrNumber(1), None)
            .await;

        assert_eq!(result.result, WaitOutcome::Success);
        assert!(result.all_passed);
    }
}

//! Environment-driven configuration.
//!
//! All knobs are read from `REVIEW_LOOP_*` environment variables with
//! conservative defaults. Values that fail to parse fall back to the default
//! rather than aborting startup.

use std::time::Duration;

/// Default interval between CI status polls (30 seconds).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default timeout for one wait-for-checks call (30 minutes).
const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 1800;

/// Default iteration budget per review.
const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Default system-wide concurrent review limit.
const DEFAULT_MAX_CONCURRENT_REVIEWS: usize = 2;

/// Default consecutive-failure tolerance before a review fails.
const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Default listen port for the HTTP surface.
const DEFAULT_PORT: u16 = 3000;

/// Trigger name used when resuming persisted reviews at startup.
/// Always authorized: the original trigger passed the gate when the record
/// was created.
pub const RECOVERY_TRIGGER: &str = "__recovery__";

/// Configuration for the check waiter.
#[derive(Debug, Clone, Copy)]
pub struct WaiterConfig {
    /// Interval between status polls.
    pub poll_interval: Duration,

    /// Elapsed-time budget for one wait call.
    pub check_timeout: Duration,

    /// Consecutive fetch failures tolerated before the wait resolves to
    /// `WaitOutcome::Error`.
    pub fetch_failure_threshold: u32,
}

/// Top-level configuration for the orchestrator and server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between CI status polls.
    pub poll_interval: Duration,

    /// Timeout for one wait-for-checks call.
    pub check_timeout: Duration,

    /// Iteration budget per review.
    pub max_iterations: u32,

    /// System-wide cap on concurrently running reviews.
    pub max_concurrent_reviews: usize,

    /// Consecutive failures (wait timeouts, fetch errors, engine errors)
    /// tolerated before a review transitions to `Failed`.
    pub consecutive_failure_threshold: u32,

    /// Third-party bot checks that must report before a wait succeeds
    /// (e.g., "coderabbit", "sonarcloud").
    pub expected_bots: Vec<String>,

    /// Callers allowed to trigger reviews. `"*"` allows everyone.
    pub allowed_triggers: Vec<String>,

    /// Directory where review records are persisted.
    pub state_dir: std::path::PathBuf,

    /// Listen port for the HTTP surface.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            check_timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_concurrent_reviews: DEFAULT_MAX_CONCURRENT_REVIEWS,
            consecutive_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            expected_bots: Vec::new(),
            allowed_triggers: vec!["*".to_string()],
            state_dir: std::path::PathBuf::from("./state"),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Creates a `Config` from environment variables.
    ///
    /// Reads `REVIEW_LOOP_POLL_INTERVAL_SECS`, `REVIEW_LOOP_CHECK_TIMEOUT_SECS`,
    /// `REVIEW_LOOP_MAX_ITERATIONS`, `REVIEW_LOOP_MAX_CONCURRENT_REVIEWS`,
    /// `REVIEW_LOOP_FAILURE_THRESHOLD`, `REVIEW_LOOP_EXPECTED_BOTS` (comma
    /// separated), `REVIEW_LOOP_ALLOWED_TRIGGERS` (comma separated),
    /// `REVIEW_LOOP_STATE_DIR`, and `REVIEW_LOOP_PORT`. Unset or unparseable
    /// values use defaults.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            poll_interval: env_secs("REVIEW_LOOP_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.poll_interval),
            check_timeout: env_secs("REVIEW_LOOP_CHECK_TIMEOUT_SECS")
                .unwrap_or(defaults.check_timeout),
            max_iterations: env_parse("REVIEW_LOOP_MAX_ITERATIONS")
                .unwrap_or(defaults.max_iterations),
            max_concurrent_reviews: env_parse("REVIEW_LOOP_MAX_CONCURRENT_REVIEWS")
                .unwrap_or(defaults.max_concurrent_reviews),
            consecutive_failure_threshold: env_parse("REVIEW_LOOP_FAILURE_THRESHOLD")
                .unwrap_or(defaults.consecutive_failure_threshold),
            expected_bots: env_list("REVIEW_LOOP_EXPECTED_BOTS"),
            allowed_triggers: {
                let list = env_list("REVIEW_LOOP_ALLOWED_TRIGGERS");
                if list.is_empty() {
                    defaults.allowed_triggers
                } else {
                    list
                }
            },
            state_dir: std::env::var("REVIEW_LOOP_STATE_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or(defaults.state_dir),
            port: env_parse("REVIEW_LOOP_PORT").unwrap_or(defaults.port),
        }
    }

    /// The waiter-facing slice of this configuration.
    pub fn waiter_config(&self) -> WaiterConfig {
        WaiterConfig {
            poll_interval: self.poll_interval,
            check_timeout: self.check_timeout,
            fetch_failure_threshold: self.consecutive_failure_threshold,
        }
    }

    /// Authorization gate for review triggers.
    pub fn is_trigger_allowed(&self, triggered_by: &str) -> bool {
        triggered_by == RECOVERY_TRIGGER
            || self.allowed_triggers.iter().any(|t| t == "*" || t == triggered_by)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.check_timeout, Duration::from_secs(1800));
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.max_concurrent_reviews, 2);
        assert_eq!(config.consecutive_failure_threshold, 2);
        assert!(config.expected_bots.is_empty());
    }

    #[test]
    fn wildcard_allows_everyone() {
        let config = Config::default();
        assert!(config.is_trigger_allowed("anyone"));
    }

    #[test]
    fn explicit_allow_list_rejects_unknown_callers() {
        let config = Config {
            allowed_triggers: vec!["alice".to_string(), "release-bot".to_string()],
            ..Config::default()
        };
        assert!(config.is_trigger_allowed("alice"));
        assert!(config.is_trigger_allowed("release-bot"));
        assert!(!config.is_trigger_allowed("mallory"));
    }

    #[test]
    fn recovery_trigger_is_always_allowed() {
        let config = Config {
            allowed_triggers: vec!["alice".to_string()],
            ..Config::default()
        };
        assert!(config.is_trigger_allowed(RECOVERY_TRIGGER));
    }

    #[test]
    fn waiter_config_mirrors_top_level() {
        let config = Config::default();
        let waiter = config.waiter_config();
        assert_eq!(waiter.poll_interval, config.poll_interval);
        assert_eq!(waiter.check_timeout, config.check_timeout);
        assert_eq!(
            waiter.fetch_failure_threshold,
            config.consecutive_failure_threshold
        );
    }
}

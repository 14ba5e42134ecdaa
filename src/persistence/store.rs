//! Durable storage for review records.
//!
//! One JSON file per PR, written atomically using a write-to-temp-then-rename
//! pattern:
//! 1. Write to `review.<pr>.json.tmp`
//! 2. fsync the file
//! 3. Rename to `review.<pr>.json`
//! 4. fsync the directory
//!
//! Readers always see either the old or new record, never a partial write.
//! A record left mid-iteration by a crash is safe to resume: state is
//! persisted before any side-effecting external action is retried.
//!
//! # Layout
//!
//! `<state_dir>/<owner>/<repo>/review.<pr>.json`

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::types::{PrNumber, RepoId, ReviewState, REVIEW_SCHEMA_VERSION};

use super::fsync::{fsync_dir, fsync_file};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// A repo identifier contained a path separator or dot-dot component.
    #[error("invalid repo identifier: {0}")]
    InvalidRepoId(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable storage for `ReviewState` records.
///
/// The store is the long-lived owner of review state between runs; the
/// orchestrator owns a record exclusively for the duration of one `run()`.
pub trait ReviewStore: Send + Sync {
    /// Persists one record, replacing any previous version atomically.
    fn save(&self, state: &ReviewState) -> impl Future<Output = Result<()>> + Send;

    /// Loads the record for a PR, or `None` if none was ever saved.
    fn load(
        &self,
        repo: &RepoId,
        pr: PrNumber,
    ) -> impl Future<Output = Result<Option<ReviewState>>> + Send;

    /// Loads every record left in a non-terminal status.
    ///
    /// Used at process startup to resume reviews interrupted by a crash.
    fn load_all_active(&self) -> impl Future<Output = Result<Vec<ReviewState>>> + Send;
}

/// File-backed review store.
#[derive(Debug, Clone)]
pub struct FileReviewStore {
    state_dir: PathBuf,
}

impl FileReviewStore {
    /// Creates a store rooted at the given state directory.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        FileReviewStore {
            state_dir: state_dir.into(),
        }
    }

    fn record_path(&self, repo: &RepoId, pr: PrNumber) -> Result<PathBuf> {
        validate_component(&repo.owner)?;
        validate_component(&repo.repo)?;
        Ok(self
            .state_dir
            .join(&repo.owner)
            .join(&repo.repo)
            .join(format!("review.{}.json", pr.0)))
    }
}

/// Rejects identifiers that would escape the state directory.
fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
    {
        return Err(StoreError::InvalidRepoId(component.to_string()));
    }
    Ok(())
}

/// Saves a record atomically to the given path.
fn save_record_atomic(path: &Path, state: &ReviewState) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    // fsync directory to ensure rename is durable
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Loads a record, returning `None` if the file doesn't exist.
///
/// Malformed JSON and schema mismatches are propagated, not defaulted away:
/// silent drift between the persisted format and the in-memory model is
/// exactly what the schema version exists to catch.
fn try_load_record(path: &Path) -> Result<Option<ReviewState>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let state: ReviewState = serde_json::from_slice(&bytes)?;

    if state.schema_version != REVIEW_SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            expected: REVIEW_SCHEMA_VERSION,
            got: state.schema_version,
        });
    }

    Ok(Some(state))
}

impl ReviewStore for FileReviewStore {
    async fn save(&self, state: &ReviewState) -> Result<()> {
        let path = self.record_path(&state.repo, state.pr_number)?;
        save_record_atomic(&path, state)
    }

    async fn load(&self, repo: &RepoId, pr: PrNumber) -> Result<Option<ReviewState>> {
        let path = self.record_path(repo, pr)?;
        try_load_record(&path)
    }

    async fn load_all_active(&self) -> Result<Vec<ReviewState>> {
        let mut active = Vec::new();

        let owners = match std::fs::read_dir(&self.state_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(active),
            Err(e) => return Err(e.into()),
        };

        for owner_entry in owners {
            let owner_dir = owner_entry?.path();
            if !owner_dir.is_dir() {
                continue;
            }
            for repo_entry in std::fs::read_dir(&owner_dir)? {
                let repo_dir = repo_entry?.path();
                if !repo_dir.is_dir() {
                    continue;
                }
                for record_entry in std::fs::read_dir(&repo_dir)? {
                    let path = record_entry?.path();
                    if !is_record_file(&path) {
                        continue;
                    }
                    // A corrupt record must not block recovery of the rest.
                    match try_load_record(&path) {
                        Ok(Some(state)) if state.status.is_active() => active.push(state),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping unreadable review record");
                        }
                    }
                }
            }
        }

        Ok(active)
    }
}

/// Matches `review.<pr>.json` (and not temp files).
fn is_record_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(middle) = name
        .strip_prefix("review.")
        .and_then(|rest| rest.strip_suffix(".json"))
    else {
        return false;
    };
    middle.parse::<u64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReviewStatus;
    use tempfile::tempdir;

    fn make_state(pr: u64) -> ReviewState {
        ReviewState::new(
            PrNumber(pr),
            RepoId::new("octocat", "hello-world"),
            format!("https://github.com/octocat/hello-world/pull/{}", pr),
            "feature-branch",
            3,
        )
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        let mut state = make_state(42);
        state.start_iteration();
        state.record_error("checks timed out");
        state.complete_iteration(2, 1, crate::types::CheckStatus::Failed, false);
        store.save(&state).await.unwrap();

        let loaded = store
            .load(&state.repo, state.pr_number)
            .await
            .unwrap()
            .expect("record should exist");
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        let loaded = store
            .load(&RepoId::new("octocat", "hello-world"), PrNumber(7))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_overwrites_previous_record() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        let mut state = make_state(42);
        store.save(&state).await.unwrap();

        state.start_iteration();
        store.save(&state).await.unwrap();

        let loaded = store.load(&state.repo, state.pr_number).await.unwrap().unwrap();
        assert_eq!(loaded.current_iteration, 1);
    }

    #[tokio::test]
    async fn load_all_active_skips_terminal_records() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        let active = make_state(1);
        store.save(&active).await.unwrap();

        let mut done = make_state(2);
        done.transition(ReviewStatus::Completed);
        store.save(&done).await.unwrap();

        let mut failed = make_state(3);
        failed.transition(ReviewStatus::Failed);
        store.save(&failed).await.unwrap();

        let resumable = store.load_all_active().await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].pr_number, PrNumber(1));
    }

    #[tokio::test]
    async fn load_all_active_on_empty_dir() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path().join("does-not-exist"));

        let resumable = store.load_all_active().await.unwrap();
        assert!(resumable.is_empty());
    }

    #[tokio::test]
    async fn load_all_active_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        store.save(&make_state(1)).await.unwrap();

        let corrupt = dir.path().join("octocat").join("hello-world").join("review.2.json");
        std::fs::write(&corrupt, b"not json").unwrap();

        let resumable = store.load_all_active().await.unwrap();
        assert_eq!(resumable.len(), 1);
    }

    #[tokio::test]
    async fn schema_mismatch_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        let mut state = make_state(5);
        state.schema_version = REVIEW_SCHEMA_VERSION + 1;
        store.save(&state).await.unwrap();

        let result = store.load(&state.repo, state.pr_number).await;
        assert!(matches!(result, Err(StoreError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());

        let state = ReviewState::new(
            PrNumber(1),
            RepoId::new("..", "escape"),
            "url",
            "branch",
            3,
        );
        assert!(matches!(
            store.save(&state).await,
            Err(StoreError::InvalidRepoId(_))
        ));
    }

    #[test]
    fn record_file_matching() {
        assert!(is_record_file(Path::new("/x/review.42.json")));
        assert!(!is_record_file(Path::new("/x/review.42.json.tmp")));
        assert!(!is_record_file(Path::new("/x/review.abc.json")));
        assert!(!is_record_file(Path::new("/x/other.42.json")));
    }
}

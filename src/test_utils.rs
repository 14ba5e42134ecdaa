//! Shared test doubles: scripted fetcher, scripted engine, in-memory store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::github::{FetchError, StatusFetcher};
use crate::persistence::{ReviewStore, StoreError};
use crate::reviewer::{EngineError, ReviewEngine, ReviewReport};
use crate::types::{CiSnapshot, PrNumber, RepoId, ReviewState};

/// A `StatusFetcher` that replays a scripted sequence of responses.
///
/// When the script runs out, the fallback snapshot (if any) repeats forever;
/// exhausting a script with no fallback is a test bug and panics.
#[derive(Clone)]
pub struct MockFetcher {
    script: Arc<Mutex<VecDeque<Result<CiSnapshot, FetchError>>>>,
    fallback: Option<CiSnapshot>,
    call_count: Arc<AtomicU32>,
}

impl MockFetcher {
    pub fn sequence(
        responses: impl IntoIterator<Item = Result<CiSnapshot, FetchError>>,
    ) -> Self {
        MockFetcher {
            script: Arc::new(Mutex::new(responses.into_iter().collect())),
            fallback: None,
            call_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn ok_sequence(snapshots: impl IntoIterator<Item = CiSnapshot>) -> Self {
        Self::sequence(snapshots.into_iter().map(Ok))
    }

    /// Returns the same snapshot on every poll.
    pub fn always(snapshot: CiSnapshot) -> Self {
        let mut fetcher = Self::sequence([]);
        fetcher.fallback = snapshot.into();
        fetcher
    }

    /// Replays the script, then repeats `snapshot` forever.
    pub fn sequence_then(
        responses: impl IntoIterator<Item = Result<CiSnapshot, FetchError>>,
        snapshot: CiSnapshot,
    ) -> Self {
        let mut fetcher = Self::sequence(responses);
        fetcher.fallback = snapshot.into();
        fetcher
    }

    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl StatusFetcher for MockFetcher {
    async fn fetch_ci_status(
        &self,
        _repo: &RepoId,
        _pr: PrNumber,
    ) -> Result<CiSnapshot, FetchError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self
                .fallback
                .clone()
                .expect("MockFetcher script exhausted with no fallback")),
        }
    }
}

/// A `ReviewEngine` that replays scripted reports.
///
/// When the script runs out the last default report (no findings) repeats.
#[derive(Clone)]
pub struct MockEngine {
    script: Arc<Mutex<VecDeque<Result<ReviewReport, EngineError>>>>,
    call_count: Arc<AtomicU32>,
}

impl MockEngine {
    pub fn sequence(
        reports: impl IntoIterator<Item = Result<ReviewReport, EngineError>>,
    ) -> Self {
        MockEngine {
            script: Arc::new(Mutex::new(reports.into_iter().collect())),
            call_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn reports(reports: impl IntoIterator<Item = ReviewReport>) -> Self {
        Self::sequence(reports.into_iter().map(Ok))
    }

    /// An engine that always reports a clean PR.
    pub fn clean() -> Self {
        Self::sequence([])
    }

    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl ReviewEngine for MockEngine {
    async fn review_and_fix(
        &self,
        _repo: &RepoId,
        _pr: PrNumber,
        _branch: &str,
    ) -> Result<ReviewReport, EngineError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(ReviewReport::default()))
    }
}

/// An in-memory `ReviewStore` for orchestrator tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<(RepoId, PrNumber), ReviewState>>>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent save fail, for persistence-failure paths.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Direct read of a stored record, bypassing the trait.
    pub fn get(&self, repo: &RepoId, pr: PrNumber) -> Option<ReviewState> {
        self.records
            .lock()
            .unwrap()
            .get(&(repo.clone(), pr))
            .cloned()
    }

    /// Seeds a record, bypassing the trait.
    pub fn insert(&self, state: ReviewState) {
        self.records
            .lock()
            .unwrap()
            .insert((state.repo.clone(), state.pr_number), state);
    }
}

impl ReviewStore for MemoryStore {
    async fn save(&self, state: &ReviewState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("simulated save failure")));
        }
        self.records
            .lock()
            .unwrap()
            .insert((state.repo.clone(), state.pr_number), state.clone());
        Ok(())
    }

    async fn load(&self, repo: &RepoId, pr: PrNumber) -> Result<Option<ReviewState>, StoreError> {
        Ok(self.get(repo, pr))
    }

    async fn load_all_active(&self) -> Result<Vec<ReviewState>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status.is_active())
            .cloned()
            .collect())
    }
}

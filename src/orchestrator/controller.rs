//! Registry of in-flight reviews and their cancellation tokens.
//!
//! The controller is the orchestrator's shared view of what is running: one
//! entry per `(repo, pr)` from registration until the run finishes. An entry
//! is "queued" until the run acquires a concurrency permit, then "admitted".
//! Cancelling an entry fires its token, which interrupts both a queued run
//! (still waiting on the semaphore) and an admitted one (mid-wait or
//! mid-review).

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::types::{PrNumber, RepoId};

/// Identity of one review run.
pub type ReviewKey = (RepoId, PrNumber);

struct ActiveReview {
    token: CancellationToken,
    admitted: bool,
    cancelled_by: Option<String>,
}

/// Tracks every registered review run and its cancellation token.
#[derive(Default)]
pub struct ReviewController {
    reviews: RwLock<HashMap<ReviewKey, ActiveReview>>,
}

impl ReviewController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run and returns its fresh cancellation token, or `None`
    /// if a run for this key is already registered.
    pub async fn register(&self, key: ReviewKey) -> Option<CancellationToken> {
        let mut reviews = self.reviews.write().await;
        if reviews.contains_key(&key) {
            return None;
        }
        let token = CancellationToken::new();
        reviews.insert(
            key,
            ActiveReview {
                token: token.clone(),
                admitted: false,
                cancelled_by: None,
            },
        );
        Some(token)
    }

    /// Marks a queued run as admitted (it holds a concurrency permit).
    pub async fn mark_admitted(&self, key: &ReviewKey) {
        if let Some(review) = self.reviews.write().await.get_mut(key) {
            review.admitted = true;
        }
    }

    /// Removes a finished run's entry.
    pub async fn unregister(&self, key: &ReviewKey) {
        self.reviews.write().await.remove(key);
    }

    /// Fires the cancellation token for a registered run.
    ///
    /// Returns true if a run was registered for the key (queued or admitted);
    /// false means there was nothing to cancel.
    pub async fn cancel(&self, key: &ReviewKey, requested_by: impl Into<String>) -> bool {
        let mut reviews = self.reviews.write().await;
        match reviews.get_mut(key) {
            Some(review) => {
                if review.cancelled_by.is_none() {
                    review.cancelled_by = Some(requested_by.into());
                }
                review.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Who requested cancellation, if anyone did.
    pub async fn cancelled_by(&self, key: &ReviewKey) -> Option<String> {
        self.reviews
            .read()
            .await
            .get(key)
            .and_then(|r| r.cancelled_by.clone())
    }

    /// Keys of runs that hold a concurrency permit.
    pub async fn active_reviews(&self) -> Vec<ReviewKey> {
        self.reviews
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.admitted)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of registered runs still waiting for a permit.
    pub async fn queue_size(&self) -> usize {
        self.reviews
            .read()
            .await
            .values()
            .filter(|r| !r.admitted)
            .count()
    }
}

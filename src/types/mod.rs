//! Core domain types for the review loop.

pub mod check;
pub mod ids;
pub mod review;

pub use check::{
    CheckStatus, CiCheckResult, CiSnapshot, PrLifecycle, WaitForChecksResult, WaitOutcome,
};
pub use ids::{InvalidSha, PrNumber, RepoId, Sha};
pub use review::{
    AppliedFix, IterationRecord, ReviewState, ReviewStatus, REVIEW_SCHEMA_VERSION,
};

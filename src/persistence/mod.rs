//! Crash-safe persistence for review records.

pub mod fsync;
pub mod store;

pub use store::{FileReviewStore, ReviewStore, StoreError};

//! GitHub integration: the status fetcher and its error/retry machinery.

pub mod error;
pub mod fetcher;
pub mod retry;

pub use error::{FetchError, FetchErrorKind};
pub use fetcher::{OctocrabFetcher, StatusFetcher};
pub use retry::{retry_with_backoff, RetryConfig};

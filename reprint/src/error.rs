//! Engine error types.

use reprint_store::StoreError;
use thiserror::Error;

/// Errors surfaced by [`OutputCache`](crate::OutputCache) operations.
///
/// Store failures on the read path never reach the caller; lookups degrade
/// to a miss and log instead. What remains are write-path failures, observed
/// after the response has already been sent, and explicit removals.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// #![warn(missing_docs)]
//! Store contract for the Reprint output cache.
//!
//! If you want to implement your own store, you are in the right place.
pub mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{
    Added, DependencyToken, Expiry, InsertOptions, RemovalCause, RemovalListener, Store,
    StoreResult, StoredValue,
};
use thiserror::Error;

/// General groups of errors in the store interaction process.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal store error, state or computation error.
    ///
    /// Any error not bounded with network interaction.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send>),
    /// Network interaction error.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send>),
}

/// Status of a delete operation.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}

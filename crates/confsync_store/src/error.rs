//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store connection has been closed.
    #[error("store connection is closed")]
    Closed,

    /// A transaction carries more operations than the store accepts.
    #[error("too many operations in txn request: {count} (limit {limit})")]
    TooManyOperations {
        /// Number of operations in the request.
        count: usize,
        /// Store limit.
        limit: usize,
    },

    /// A request exceeds the store's payload size limit.
    #[error("request is too large: {size} bytes (limit {limit})")]
    RequestTooLarge {
        /// Encoded request size.
        size: usize,
        /// Store limit.
        limit: usize,
    },

    /// An empty or otherwise unusable key was given.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a request.
    #[error("request failed: {0}")]
    Request(String),

    /// The client configuration is unusable.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns true if the error means the connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, StoreError::Closed)
    }
}

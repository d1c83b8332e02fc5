//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding file content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The content could not be compressed.
    #[error("compression failed: {message}")]
    Compress {
        /// Description of the failure.
        message: String,
    },

    /// A stored payload is not a valid compressed stream.
    #[error("decompression failed: {message}")]
    Decompress {
        /// Description of the failure.
        message: String,
    },
}


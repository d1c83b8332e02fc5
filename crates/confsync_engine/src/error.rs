//! Error types for the sync engine.

use confsync_codec::CodecError;
use confsync_store::StoreError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while synchronizing trees.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store request failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Content could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Filesystem operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path the operation was applied to.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed.
    #[error("error walking {}: {message}", path.display())]
    Walk {
        /// Path where traversal failed.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A file would replace a directory.
    #[error("{} is a directory", .0.display())]
    IsADirectory(PathBuf),

    /// A path component that must be a directory is something else.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Reload command could not be found on `PATH`.
    #[error("error finding command {0}")]
    CommandNotFound(String),

    /// Watch definition is malformed.
    #[error("invalid watch definition: {0}")]
    InvalidDefinition(String),

    /// Root specification is malformed.
    #[error("invalid root string (must be root[:owner[:group[:mode]]]): {0}")]
    InvalidRoot(String),

    /// Unknown user name or id.
    #[error("no user {0} found")]
    UnknownUser(String),

    /// Unknown group name or id.
    #[error("no group {0} found")]
    UnknownGroup(String),

    /// File mode is not an octal permission mask.
    #[error("invalid file mode: {0}")]
    InvalidMode(String),

    /// State operation arguments are malformed.
    #[error("invalid state operation: {0}")]
    InvalidStateOp(String),

    /// A blocking filesystem task panicked or was cancelled.
    #[error("filesystem task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Signal handlers could not be installed.
    #[error("cannot install signal handler: {0}")]
    Signal(#[source] io::Error),

    /// An external event line could not be parsed.
    #[error("error parsing event string {line:?}: {message}")]
    InvalidEvent {
        /// The raw line.
        line: String,
        /// Description of the failure.
        message: String,
    },
}

impl EngineError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<walkdir::Error> for EngineError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        EngineError::Walk {
            path,
            message: err.to_string(),
        }
    }
}

//! # confsync engine
//!
//! Tree synchronization between local directories and a key-value
//! cluster.
//!
//! This crate provides:
//! - Push: walk a directory, diff it against the stored tree by content
//!   fingerprint, commit the changes in one transaction
//! - Pull: mirror a key prefix into a directory with atomic file
//!   replacement and run a reload command per changed batch
//! - Gitignore-style filtering with per-directory `.gitignore` and
//!   `.confignore` files
//! - A supervisor running many watch sessions with clean shutdown
//! - keepalived state forwarding
//!
//! ## Key Invariants
//!
//! - A file occupies two keys, `<prefix>/<rel>` and `<prefix>/<rel>/.hash`,
//!   always written and deleted together
//! - A push is one transaction: all of it applies or none of it
//! - A materialized file is observed either in its old or its new state
//! - One watch response triggers at most one reload
//!
//! ## Example
//!
//! ```rust
//! use confsync_engine::{push_tree, GlobalIgnore, PushOptions};
//! use confsync_store::MemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
//!
//! let store = MemoryStore::new();
//! let options = PushOptions::new("/svc/app")
//!     .with_root(dir.path())
//!     .with_global_ignore(GlobalIgnore::Disabled);
//! let report = push_tree(&store, &options).await.unwrap();
//! assert_eq!(report.updated, vec!["/svc/app/a.txt"]);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod command;
mod config;
mod definition;
mod error;
mod events;
mod fs;
mod ignore;
pub mod keys;
mod paths;
mod push;
mod state;
mod supervisor;
mod watcher;

pub use crate::command::ReloadCommand;
pub use crate::config::{PushOptions, SessionConfig};
pub use crate::definition::{parse_root_spec, parse_watch_definitions, DEFINITION_SEPARATOR};
pub use crate::error::{EngineError, EngineResult};
pub use crate::events::{
    forward_lines, tokenize, FifoEventSource, KeepalivedPublisher, StateEvent, MASTER_STATE,
    REOPEN_DELAY,
};
pub use crate::fs::{
    ensure_dir, materialize, remove_file_and_prune, stage, FilePolicy, Materialized, StagedWrite,
    DEFAULT_FILE_MODE, TEMP_PREFIX,
};
pub use crate::ignore::{
    GlobalIgnore, IgnoreModel, CONF_IGNORE_FILE, GIT_IGNORE_FILE, GLOBAL_IGNORE_FILE, VCS_DIR,
};
pub use crate::push::{push_tree, PushReport};
pub use crate::state::{parse_state_ops, publish, StateOp, OP_DELETE_IF_SAME, OP_SET};
pub use crate::supervisor::{shutdown_signal, EventForwarding, ShutdownSignals, Supervisor};
pub use crate::watcher::{SessionState, SessionStats, WatchSession};

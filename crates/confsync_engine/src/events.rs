//! keepalived state events.
//!
//! keepalived writes one line per VRRP transition to a named pipe:
//!
//! ```text
//! "INSTANCE" "VI_1" "MASTER" 100
//! ```
//!
//! A [`FifoEventSource`] reads and tokenizes those lines and a
//! [`KeepalivedPublisher`] turns them into state writes.

use confsync_store::KvStore;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::keys::clean_key;
use crate::state::{publish, StateOp};

/// State that makes an instance the current holder.
pub const MASTER_STATE: &str = "MASTER";

/// Delay before reopening an unavailable pipe.
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// One tokenized state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    /// Object kind, e.g. `INSTANCE` or `GROUP`.
    pub kind: String,
    /// Object name.
    pub instance: String,
    /// New state, e.g. `MASTER` or `BACKUP`.
    pub state: String,
}

/// Splits an event line with shell quoting rules.
///
/// The first three words are kind, instance and state; the rest is
/// ignored.
pub fn tokenize(line: &str) -> EngineResult<StateEvent> {
    let words = shell_words::split(line).map_err(|e| EngineError::InvalidEvent {
        line: line.to_string(),
        message: e.to_string(),
    })?;
    let mut words = words.into_iter();
    match (words.next(), words.next(), words.next()) {
        (Some(kind), Some(instance), Some(state)) => Ok(StateEvent {
            kind,
            instance,
            state,
        }),
        _ => Err(EngineError::InvalidEvent {
            line: line.to_string(),
            message: "not enough parameters".to_string(),
        }),
    }
}

/// Reads events from a named pipe, reopening it when unavailable.
#[derive(Debug, Clone)]
pub struct FifoEventSource {
    path: PathBuf,
    reopen_delay: Duration,
}

impl FifoEventSource {
    /// Creates a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reopen_delay: REOPEN_DELAY,
        }
    }

    /// Sets the reopen delay.
    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// Path of the pipe.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forwards events into `events` until cancelled or the receiver is
    /// dropped.
    pub async fn run(&self, events: mpsc::Sender<StateEvent>, cancel: CancellationToken) {
        info!(path = %self.path.display(), "reading state events");
        loop {
            match self.open() {
                Ok(receiver) => {
                    if forward_lines(BufReader::new(receiver), &events, &cancel).await {
                        break;
                    }
                    debug!(path = %self.path.display(), "event pipe closed");
                }
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "event pipe unavailable");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reopen_delay) => {}
            }
        }
        debug!(path = %self.path.display(), "event source stopped");
    }

    fn open(&self) -> io::Result<pipe::Receiver> {
        let mut options = pipe::OpenOptions::new();
        // Holding a write end open keeps the pipe from reporting EOF each
        // time keepalived closes its end.
        #[cfg(target_os = "linux")]
        options.read_write(true);
        options.open_receiver(&self.path)
    }
}

/// Tokenizes lines from `reader` into `events`.
///
/// Returns true when forwarding should stop for good (cancellation, or
/// the receiver is gone), false at end of input.
pub async fn forward_lines<R>(
    reader: R,
    events: &mpsc::Sender<StateEvent>,
    cancel: &CancellationToken,
) -> bool
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return true,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match tokenize(&line) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        return true;
                    }
                }
                Err(e) => warn!(error = %e, "dropping event"),
            },
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "error reading events");
                return false;
            }
        }
    }
}

/// Publishes keepalived transitions of one node.
///
/// For an event `(kind, name, state)` it writes:
///
/// - `<key_prefix>/<instance>/<kind>/<name>` = state
/// - `<key_prefix>/current/<kind>/<name>` = instance when state is
///   `MASTER`, otherwise that key is deleted if it still names this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepalivedPublisher {
    key_prefix: String,
    instance: String,
}

impl KeepalivedPublisher {
    /// Creates a publisher for node `instance` under `key_prefix`.
    pub fn new(key_prefix: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            instance: instance.into(),
        }
    }

    /// Node name.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// State writes for `event`.
    pub fn ops_for(&self, event: &StateEvent) -> Vec<StateOp> {
        let (kind, name) = (event.kind.as_str(), event.instance.as_str());
        let state_key = self.key(&[self.instance.as_str(), kind, name]);
        let current_key = self.key(&["current", kind, name]);
        let current = if event.state == MASTER_STATE {
            StateOp::Set {
                key: current_key,
                value: self.instance.clone(),
            }
        } else {
            StateOp::DeleteIfSame {
                key: current_key,
                value: self.instance.clone(),
            }
        };
        vec![
            StateOp::Set {
                key: state_key,
                value: event.state.clone(),
            },
            current,
        ]
    }

    /// Joins `parts` under the key prefix, skipping empty elements. An
    /// empty prefix yields a relative key.
    fn key(&self, parts: &[&str]) -> String {
        let joined = std::iter::once(self.key_prefix.as_str())
            .chain(parts.iter().copied())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        clean_key(&joined)
    }

    /// Publishes events until cancelled or the channel closes.
    ///
    /// Publish failures are logged and the event is dropped.
    pub async fn run(
        &self,
        store: &dyn KvStore,
        mut events: mpsc::Receiver<StateEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            debug!(
                kind = %event.kind,
                instance = %event.instance,
                state = %event.state,
                "state event"
            );
            if let Err(e) = publish(store, self.ops_for(&event)).await {
                error!(error = %e, "error updating keepalived status");
            }
        }
    }
}

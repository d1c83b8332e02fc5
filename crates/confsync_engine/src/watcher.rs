//! Pull: store prefix to directory tree.
//!
//! A [`WatchSession`] subscribes to its prefix before reading the current
//! tree, so nothing committed between the read and the subscription is
//! lost. It then applies every watch response as one batch and runs its
//! reload command once per batch that changed file content.

use confsync_codec::decompress;
use confsync_store::{EventKind, GetOptions, KvStore, WatchEvent, WatchOptions};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::EngineResult;
use crate::fs::{materialize, remove_file_and_prune, Materialized};
use crate::keys::relative_key;

/// Lifecycle of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the subscription.
    Subscribing,
    /// Materializing the current tree.
    InitialSync,
    /// Applying watch responses.
    Steady,
    /// Finished.
    Closed,
}

impl SessionState {
    /// Returns true while the session is still running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// Counters of a watch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Files created or replaced.
    pub files_written: u64,
    /// Files removed.
    pub files_removed: u64,
    /// Empty directories removed after a file removal.
    pub dirs_pruned: u64,
    /// Reload command runs.
    pub reloads: u64,
    /// Per-file and reload failures.
    pub errors: u64,
    /// Subscriptions canceled by the store.
    pub canceled_subscriptions: u64,
}

/// One prefix mirrored into one directory.
#[derive(Debug)]
pub struct WatchSession {
    config: SessionConfig,
    state: RwLock<SessionState>,
    stats: RwLock<SessionStats>,
}

impl WatchSession {
    /// Creates a session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: RwLock::new(SessionState::Subscribing),
            stats: RwLock::new(SessionStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Runs the session until the store closes the subscription or
    /// `cancel` fires.
    ///
    /// Only a failure to subscribe, or a subscription error, is returned.
    /// Per-file and reload failures are logged and counted.
    pub async fn run(&self, store: &dyn KvStore, cancel: &CancellationToken) -> EngineResult<()> {
        let prefix = &self.config.prefix;
        let root = self.config.root.display();

        self.set_state(SessionState::Subscribing);
        let options = WatchOptions::prefix().with_require_leader();
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => None,
            stream = store.watch(prefix, options) => Some(stream),
        };
        let mut stream = match subscribed {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                self.set_state(SessionState::Closed);
                return Err(e.into());
            }
            None => {
                self.set_state(SessionState::Closed);
                return Ok(());
            }
        };
        info!(prefix = %prefix, root = %root, "watching");

        self.set_state(SessionState::InitialSync);
        let changed = tokio::select! {
            _ = cancel.cancelled() => {
                self.set_state(SessionState::Closed);
                return Ok(());
            }
            changed = self.initial_sync(store) => changed,
        };
        if changed > 0 {
            self.reload().await;
        }

        self.set_state(SessionState::Steady);
        let result = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = stream.next() => next,
            };
            let response = match next {
                None => break Ok(()),
                Some(Err(e)) => {
                    error!(prefix = %prefix, error = %e, "watch failed");
                    break Err(e.into());
                }
                Some(Ok(response)) => response,
            };
            if response.canceled {
                self.stats.write().canceled_subscriptions += 1;
                error!(
                    prefix = %prefix,
                    reason = %response.cancel_reason,
                    "watch was canceled by the store; no further updates will arrive for this prefix"
                );
                continue;
            }
            if self.apply_batch(response.events).await > 0 {
                self.reload().await;
            }
        };

        self.set_state(SessionState::Closed);
        info!(prefix = %prefix, root = %root, "watch stopped");
        result
    }

    /// Materializes every file under the prefix.
    ///
    /// Returns the number of files whose content changed. A failed read is
    /// logged and counts as no change.
    pub async fn initial_sync(&self, store: &dyn KvStore) -> usize {
        let prefix = &self.config.prefix;
        let kvs = match store.get(prefix, GetOptions::prefix()).await {
            Ok(kvs) => kvs,
            Err(e) => {
                self.stats.write().errors += 1;
                error!(
                    prefix = %prefix,
                    root = %self.config.root.display(),
                    error = %e,
                    "initial sync failed"
                );
                return 0;
            }
        };
        let keys = kvs.len();
        let events = kvs
            .into_iter()
            .map(|kv| WatchEvent {
                kind: EventKind::Put,
                kv,
            })
            .collect();
        let changed = self.apply_batch(events).await;
        debug!(prefix = %prefix, keys, changed, "initial sync complete");
        changed
    }

    /// Applies one batch of events in order.
    ///
    /// Returns the number of files whose content changed. Removals are
    /// applied but do not count.
    pub fn apply_events(&self, events: &[WatchEvent]) -> usize {
        let outcome = BatchApplier::new(&self.config).apply(events);
        self.record(&outcome.stats);
        outcome.changed
    }

    /// [`apply_events`](Self::apply_events) on the blocking thread pool.
    async fn apply_batch(&self, events: Vec<WatchEvent>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let config = self.config.clone();
        let task =
            tokio::task::spawn_blocking(move || BatchApplier::new(&config).apply(&events));
        match task.await {
            Ok(outcome) => {
                self.record(&outcome.stats);
                outcome.changed
            }
            Err(e) => {
                self.stats.write().errors += 1;
                error!(prefix = %self.config.prefix, error = %e, "applying batch failed");
                0
            }
        }
    }

    fn record(&self, delta: &SessionStats) {
        let mut stats = self.stats.write();
        stats.files_written += delta.files_written;
        stats.files_removed += delta.files_removed;
        stats.dirs_pruned += delta.dirs_pruned;
        stats.errors += delta.errors;
    }

    async fn reload(&self) {
        let command = &self.config.command;
        self.stats.write().reloads += 1;
        match command.run(&self.config.root).await {
            Ok(status) if status.success() => {
                debug!(command = %command.name(), "reload command finished");
            }
            Ok(status) => {
                self.stats.write().errors += 1;
                error!(command = %command.name(), status = %status, "reload command failed");
            }
            Err(e) => {
                self.stats.write().errors += 1;
                error!(command = %command.name(), error = %e, "error running command");
            }
        }
    }
}

/// Result of applying one batch.
#[derive(Debug, Default)]
struct BatchOutcome {
    changed: usize,
    stats: SessionStats,
}

/// Filesystem side of a session, run off the async workers.
struct BatchApplier<'a> {
    config: &'a SessionConfig,
    outcome: BatchOutcome,
}

impl<'a> BatchApplier<'a> {
    fn new(config: &'a SessionConfig) -> Self {
        Self {
            config,
            outcome: BatchOutcome::default(),
        }
    }

    fn apply(mut self, events: &[WatchEvent]) -> BatchOutcome {
        for event in events {
            match event.kind {
                EventKind::Put => {
                    if self.put(&event.kv.key, &event.kv.value) {
                        self.outcome.changed += 1;
                    }
                }
                EventKind::Delete => self.delete(&event.kv.key),
            }
        }
        self.outcome
    }

    fn put(&mut self, key: &str, value: &[u8]) -> bool {
        let Some(rel) = relative_key(&self.config.prefix, key) else {
            return false;
        };
        let path = self.config.root.join(rel);

        let content = match decompress(value) {
            Ok(content) => content,
            Err(e) => {
                self.outcome.stats.errors += 1;
                error!(key = %key, path = %path.display(), error = %e, "cannot decode content, skipping");
                return false;
            }
        };
        match materialize(&path, &content, &self.config.policy) {
            Ok(Materialized::Written) => {
                self.outcome.stats.files_written += 1;
                info!(path = %path.display(), "updated");
                true
            }
            Ok(Materialized::Unchanged) => false,
            Err(e) => {
                self.outcome.stats.errors += 1;
                error!(key = %key, error = %e, "failed to synchronize file");
                false
            }
        }
    }

    fn delete(&mut self, key: &str) {
        let Some(rel) = relative_key(&self.config.prefix, key) else {
            return;
        };
        let path = self.config.root.join(rel);

        match remove_file_and_prune(&self.config.root, &path) {
            Ok(pruned) => {
                self.outcome.stats.files_removed += 1;
                self.outcome.stats.dirs_pruned += pruned.len() as u64;
                info!(path = %path.display(), pruned = pruned.len(), "removed");
            }
            Err(e) => {
                self.outcome.stats.errors += 1;
                warn!(key = %key, error = %e, "error removing file");
            }
        }
    }
}

//! Process lifetime of the watch command.
//!
//! The [`Supervisor`] runs one task per watch session plus, optionally, one
//! event forwarding task. On shutdown it cancels every task, closes the
//! shared store so blocked subscriptions return, and waits for all tasks.

use confsync_store::KvStore;
use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{FifoEventSource, KeepalivedPublisher};
use crate::watcher::WatchSession;

/// Buffered events between the pipe reader and the publisher.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Source and sink of forwarded state events.
#[derive(Debug, Clone)]
pub struct EventForwarding {
    /// Where events are read.
    pub source: FifoEventSource,
    /// How events are published.
    pub publisher: KeepalivedPublisher,
}

/// Owns the concurrently running watch sessions.
pub struct Supervisor {
    store: Arc<dyn KvStore>,
    sessions: Vec<Arc<WatchSession>>,
    forwarding: Option<EventForwarding>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Supervisor {
    /// Creates a supervisor sharing `store` between all tasks.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            sessions: Vec::new(),
            forwarding: None,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Adds a watch session.
    pub fn add_session(&mut self, config: SessionConfig) -> Arc<WatchSession> {
        let session = Arc::new(WatchSession::new(config));
        self.sessions.push(Arc::clone(&session));
        session
    }

    /// Enables event forwarding.
    pub fn with_event_forwarding(
        mut self,
        source: FifoEventSource,
        publisher: KeepalivedPublisher,
    ) -> Self {
        self.forwarding = Some(EventForwarding { source, publisher });
        self
    }

    /// Returns the sessions added so far.
    pub fn sessions(&self) -> &[Arc<WatchSession>] {
        &self.sessions
    }

    /// Returns the token cancelled at shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts every task and runs until `shutdown` resolves.
    ///
    /// Shutdown happens once: cancel all tasks, close the store, wait for
    /// every task to return. The store close result is returned.
    pub async fn run_until<F>(self, shutdown: F) -> EngineResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            store,
            sessions,
            forwarding,
            cancel,
            tracker,
        } = self;

        for session in &sessions {
            let session = Arc::clone(session);
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            tracker.spawn(async move {
                if let Err(e) = session.run(store.as_ref(), &cancel).await {
                    error!(
                        prefix = %session.config().prefix,
                        error = %e,
                        "watch session ended with error"
                    );
                }
            });
        }

        if let Some(EventForwarding { source, publisher }) = forwarding {
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            tracker.spawn(async move {
                let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
                tokio::join!(
                    source.run(tx, cancel.clone()),
                    publisher.run(store.as_ref(), rx, cancel.clone()),
                );
            });
        }
        info!(sessions = sessions.len(), "supervisor started");

        shutdown.await;

        info!("shutting down");
        tracker.close();
        cancel.cancel();
        let closed = store.close().await;
        tracker.wait().await;
        info!("all tasks finished");
        closed.map_err(EngineError::from)
    }
}

/// Termination signals: SIGHUP, SIGINT, SIGQUIT and SIGTERM.
///
/// Install the handlers before starting work so an early signal is not
/// lost.
#[derive(Debug)]
pub struct ShutdownSignals {
    hangup: Signal,
    interrupt: Signal,
    quit: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    /// Installs the handlers.
    pub fn install() -> EngineResult<Self> {
        let install = |kind| signal(kind).map_err(EngineError::Signal);
        Ok(Self {
            hangup: install(SignalKind::hangup())?,
            interrupt: install(SignalKind::interrupt())?,
            quit: install(SignalKind::quit())?,
            terminate: install(SignalKind::terminate())?,
        })
    }

    /// Waits for the first signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Resolves on the first termination signal.
pub async fn shutdown_signal() -> EngineResult<&'static str> {
    let mut signals = ShutdownSignals::install()?;
    let name = signals.recv().await;
    info!(signal = name, "received signal");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ReloadCommand;
    use crate::watcher::SessionState;
    use confsync_store::MemoryStore;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn shutdown_closes_store_and_joins_sessions() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut supervisor = Supervisor::new(store.clone());
        let command = ReloadCommand::resolve("true", vec![]).unwrap();
        let a = supervisor.add_session(SessionConfig::new(
            "/a",
            dir.path().join("a"),
            command.clone(),
        ));
        let b = supervisor.add_session(SessionConfig::new("/b", dir.path().join("b"), command));
        assert_eq!(supervisor.sessions().len(), 2);
        let token = supervisor.cancellation_token();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(supervisor.run_until(async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(token.is_cancelled());
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn forwarding_task_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let supervisor = Supervisor::new(store).with_event_forwarding(
            FifoEventSource::new(dir.path().join("absent.fifo")),
            KeepalivedPublisher::new("/ka", "lb1"),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run_until(tokio::time::sleep(Duration::from_millis(20))),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }
}

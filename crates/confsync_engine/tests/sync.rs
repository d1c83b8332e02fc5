//! End-to-end push and pull through an in-memory store.

use confsync_codec::compress;
use confsync_engine::{
    push_tree, GlobalIgnore, PushOptions, ReloadCommand, SessionConfig, SessionState,
    Supervisor, WatchSession,
};
use confsync_store::{KvStore, MemoryStore, Txn, TxnOp};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn push_options(prefix: &str, root: &Path) -> PushOptions {
    PushOptions::new(prefix)
        .with_root(root)
        .with_global_ignore(GlobalIgnore::Disabled)
}

/// A reload command appending one line to `counter` per run.
fn counting_command(counter: &Path) -> ReloadCommand {
    ReloadCommand::resolve(
        "sh",
        vec![
            "-c".to_string(),
            format!("echo reload >> '{}'", counter.display()),
        ],
    )
    .unwrap()
}

fn reload_count(counter: &Path) -> usize {
    fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct Running {
    session: Arc<WatchSession>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap();
    }
}

async fn start_session(store: &Arc<MemoryStore>, config: SessionConfig) -> Running {
    let session = Arc::new(WatchSession::new(config));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let session = Arc::clone(&session);
        let store = Arc::clone(store);
        let cancel = cancel.clone();
        async move {
            session.run(store.as_ref(), &cancel).await.unwrap();
        }
    });
    wait_for(|| session.state() == SessionState::Steady).await;
    Running {
        session,
        cancel,
        task,
    }
}

#[tokio::test]
async fn push_reports_removed_file_only() {
    let local = TempDir::new().unwrap();
    fs::write(local.path().join("a.txt"), "hello").unwrap();
    fs::create_dir(local.path().join("sub")).unwrap();
    fs::write(local.path().join("sub/b.txt"), "world").unwrap();
    let store = MemoryStore::new();

    let first = push_tree(&store, &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    assert_eq!(first.updated, vec!["/svc/app/a.txt", "/svc/app/sub/b.txt"]);
    assert_eq!(
        store.keys(),
        vec![
            "/svc/app/a.txt",
            "/svc/app/a.txt/.hash",
            "/svc/app/sub/b.txt",
            "/svc/app/sub/b.txt/.hash",
        ]
    );

    fs::remove_file(local.path().join("sub/b.txt")).unwrap();
    let second = push_tree(&store, &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    let lines: Vec<String> = second.lines().collect();
    assert_eq!(lines, ["removed /svc/app/sub/b.txt"]);
    assert_eq!(store.keys(), vec!["/svc/app/a.txt", "/svc/app/a.txt/.hash"]);
}

#[tokio::test]
async fn second_push_of_unchanged_tree_is_silent() {
    let local = TempDir::new().unwrap();
    fs::create_dir_all(local.path().join("conf.d")).unwrap();
    fs::write(local.path().join("main.conf"), "include conf.d/*;").unwrap();
    fs::write(local.path().join("conf.d/site.conf"), "listen 80;").unwrap();
    let store = MemoryStore::new();

    push_tree(&store, &push_options("/svc/web", local.path()))
        .await
        .unwrap();
    let revision = store.revision();
    let second = push_tree(&store, &push_options("/svc/web", local.path()))
        .await
        .unwrap();
    assert!(second.is_empty());
    // The guarded sub-transactions all take the empty branch.
    assert_eq!(store.revision(), revision);
}

#[tokio::test]
async fn local_rules_do_not_leak_into_siblings() {
    let local = TempDir::new().unwrap();
    for dir in ["a", "b"] {
        fs::create_dir(local.path().join(dir)).unwrap();
        fs::write(local.path().join(dir).join("secret.conf"), dir).unwrap();
    }
    fs::write(local.path().join("a/.confignore"), "secret.conf\n").unwrap();
    let store = MemoryStore::new();

    let report = push_tree(&store, &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    assert_eq!(report.updated, vec!["/svc/app/b/secret.conf"]);
}

#[tokio::test]
async fn push_stores_only_regular_files() {
    let local = TempDir::new().unwrap();
    fs::create_dir(local.path().join("run")).unwrap();
    fs::write(local.path().join("a.conf"), "a").unwrap();
    let _listener =
        std::os::unix::net::UnixListener::bind(local.path().join("run/control.sock")).unwrap();
    nix::unistd::mkfifo(
        local.path().join("run/notify.fifo").as_path(),
        nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR,
    )
    .unwrap();
    let store = MemoryStore::new();

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        push_tree(&store, &push_options("/svc/app", local.path())),
    )
    .await
    .expect("push must not block on a pipe")
    .unwrap();
    assert_eq!(report.updated, vec!["/svc/app/a.conf"]);

    let again = push_tree(&store, &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn ignored_files_are_not_deleted_from_store() {
    let local = TempDir::new().unwrap();
    fs::write(local.path().join("app.conf"), "a").unwrap();
    fs::write(local.path().join("local.conf"), "l").unwrap();
    let store = MemoryStore::new();
    push_tree(&store, &push_options("/svc/app", local.path()))
        .await
        .unwrap();

    fs::write(local.path().join(".confignore"), "local.conf\n").unwrap();
    let report = push_tree(&store, &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    assert!(report.is_empty());
    assert!(store.value("/svc/app/local.conf").is_some());
}

#[tokio::test]
async fn initial_sync_writes_file_and_reloads_once() {
    let etc = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let counter = scratch.path().join("reloads");
    let root = etc.path().join("app");
    let store = Arc::new(MemoryStore::new());
    store
        .txn(Txn::new().and_then(vec![TxnOp::put(
            "/svc/app/a.txt",
            compress(b"hello").unwrap(),
        )]))
        .await
        .unwrap();

    let running = start_session(
        &store,
        SessionConfig::new("/svc/app", &root, counting_command(&counter)),
    )
    .await;

    assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"hello");
    assert_eq!(reload_count(&counter), 1);
    assert_eq!(running.session.stats().reloads, 1);
    running.stop().await;
}

#[tokio::test]
async fn one_reload_per_pushed_batch() {
    let local = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let counter = scratch.path().join("reloads");
    let store = Arc::new(MemoryStore::new());

    let running = start_session(
        &store,
        SessionConfig::new("/svc/app", mirror.path(), counting_command(&counter)),
    )
    .await;
    assert_eq!(reload_count(&counter), 0);

    for name in ["a.conf", "b.conf", "c.conf", "d.conf"] {
        fs::write(local.path().join(name), name).unwrap();
    }
    push_tree(store.as_ref(), &push_options("/svc/app", local.path()))
        .await
        .unwrap();

    let session = Arc::clone(&running.session);
    wait_for(|| session.stats().reloads == 1).await;
    for name in ["a.conf", "b.conf", "c.conf", "d.conf"] {
        assert_eq!(fs::read(mirror.path().join(name)).unwrap(), name.as_bytes());
    }
    assert_eq!(session.stats().files_written, 4);
    assert_eq!(reload_count(&counter), 1);
    running.stop().await;
}

#[tokio::test]
async fn removed_files_prune_emptied_directories() {
    let local = TempDir::new().unwrap();
    let mirror = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    fs::create_dir_all(local.path().join("x/y")).unwrap();
    fs::write(local.path().join("top.conf"), "t").unwrap();
    fs::write(local.path().join("x/y/deep.conf"), "d").unwrap();

    let running = start_session(
        &store,
        SessionConfig::new(
            "/svc/app",
            mirror.path(),
            counting_command(&scratch.path().join("reloads")),
        ),
    )
    .await;
    let session = Arc::clone(&running.session);

    push_tree(store.as_ref(), &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    wait_for(|| session.stats().files_written == 2).await;
    assert!(mirror.path().join("x/y/deep.conf").is_file());

    fs::remove_dir_all(local.path().join("x")).unwrap();
    push_tree(store.as_ref(), &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    wait_for(|| session.stats().files_removed == 1).await;

    assert!(!mirror.path().join("x").exists());
    assert!(mirror.path().join("top.conf").is_file());
    assert_eq!(session.stats().dirs_pruned, 2);
    running.stop().await;
}

#[tokio::test]
async fn canceled_subscription_is_counted_not_fatal() {
    let mirror = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(WatchSession::new(SessionConfig::new(
        "/svc/app",
        mirror.path(),
        counting_command(&scratch.path().join("reloads")),
    )));
    let task = tokio::spawn({
        let session = Arc::clone(&session);
        let store = Arc::clone(&store);
        async move { session.run(store.as_ref(), &CancellationToken::new()).await }
    });
    wait_for(|| session.state() == SessionState::Steady).await;

    store.cancel_watches("required revision has been compacted");
    wait_for(|| session.stats().canceled_subscriptions == 1).await;
    assert_eq!(session.state(), SessionState::Steady);

    store.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn supervisor_mirrors_until_shutdown() {
    let local = TempDir::new().unwrap();
    let mirrors = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    fs::write(local.path().join("app.conf"), "v1").unwrap();

    let mut supervisor = Supervisor::new(store.clone());
    let roots: Vec<PathBuf> = ["one", "two"]
        .iter()
        .map(|name| mirrors.path().join(name))
        .collect();
    let sessions: Vec<_> = roots
        .iter()
        .map(|root| {
            supervisor.add_session(SessionConfig::new(
                "/svc/app",
                root,
                counting_command(&scratch.path().join("reloads")),
            ))
        })
        .collect();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let run = tokio::spawn(supervisor.run_until(async move {
        let _ = stop_rx.await;
    }));
    for session in &sessions {
        let session = Arc::clone(session);
        wait_for(move || session.state() == SessionState::Steady).await;
    }

    push_tree(store.as_ref(), &push_options("/svc/app", local.path()))
        .await
        .unwrap();
    for root in &roots {
        let file = root.join("app.conf");
        wait_for(move || fs::read(&file).map(|c| c == b"v1").unwrap_or(false)).await;
    }

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    for session in &sessions {
        assert_eq!(session.state(), SessionState::Closed);
    }
    assert!(store.get("/svc", Default::default()).await.is_err());
}

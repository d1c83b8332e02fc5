//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::{KvStore, WatchStream};
use crate::types::{
    EventKind, GetOptions, KeyValue, Txn, TxnOp, TxnOpResponse, TxnResponse, WatchEvent,
    WatchOptions, WatchResponse,
};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Default cap on operations per transaction level (etcd `--max-txn-ops`).
pub const DEFAULT_MAX_TXN_OPS: usize = 128;

/// Default cap on request size in bytes (etcd `--max-request-bytes`).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1536 * 1024;

/// An in-process store with etcd compatible transaction and watch
/// semantics.
///
/// This store is suitable for:
/// - Unit and integration tests of push and pull
/// - Simulating store-side failures (limits, watch cancellation)
///
/// # Thread Safety
///
/// All state sits behind one mutex; the store can be shared across tasks.
///
/// # Example
///
/// ```rust
/// use confsync_store::{Compare, CompareOp, KvStore, MemoryStore, Txn, TxnOp};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// let txn = Txn::new()
///     .when(vec![Compare::create_revision("/k", CompareOp::Equal, 0)])
///     .and_then(vec![TxnOp::put("/k", b"first".to_vec())]);
/// assert!(store.txn(txn.clone()).await.unwrap().succeeded);
/// assert!(!store.txn(txn).await.unwrap().succeeded);
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_txn_ops: usize,
    max_request_bytes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<String, KeyValue>,
    revision: i64,
    watchers: Vec<Watcher>,
    closed: bool,
}

#[derive(Debug)]
struct Watcher {
    key: String,
    prefix: bool,
    // A canceled watcher keeps its channel open but receives nothing more,
    // the way an etcd watch channel goes quiet after compaction.
    canceled: bool,
    tx: UnboundedSender<StoreResult<WatchResponse>>,
}

impl Watcher {
    fn matches(&self, key: &str) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

/// Branch decisions for a transaction, computed before anything applies.
struct Decision {
    succeeded: bool,
    nested: Vec<Decision>,
}

impl MemoryStore {
    /// Creates an empty store with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_txn_ops: DEFAULT_MAX_TXN_OPS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    /// Sets the per-level operation limit.
    #[must_use]
    pub fn with_max_txn_ops(mut self, limit: usize) -> Self {
        self.max_txn_ops = limit;
        self
    }

    /// Sets the request size limit.
    #[must_use]
    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = limit;
        self
    }

    /// Returns the current store revision.
    pub fn revision(&self) -> i64 {
        self.inner.lock().revision
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Returns all keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().data.keys().cloned().collect()
    }

    /// Returns the value stored under `key`.
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().data.get(key).map(|kv| kv.value.clone())
    }

    /// Returns the number of live watch subscriptions.
    pub fn watcher_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|w| !w.tx.is_closed());
        inner.watchers.len()
    }

    /// Cancels every open subscription from the store side.
    ///
    /// Each subscriber receives one canceled response carrying `reason`
    /// and no further events, while its stream stays open until the store
    /// is closed. This is what a history compaction looks like to a client.
    pub fn cancel_watches(&self, reason: &str) {
        let mut inner = self.inner.lock();
        for watcher in inner.watchers.iter_mut().filter(|w| !w.canceled) {
            watcher.canceled = true;
            let _ = watcher.tx.unbounded_send(Ok(WatchResponse {
                canceled: true,
                cancel_reason: reason.to_string(),
                events: Vec::new(),
            }));
        }
    }

    fn check_limits(&self, txn: &Txn) -> StoreResult<()> {
        for count in [txn.compare.len(), txn.success.len(), txn.failure.len()] {
            if count > self.max_txn_ops {
                return Err(StoreError::TooManyOperations {
                    count,
                    limit: self.max_txn_ops,
                });
            }
        }
        for op in txn.success.iter().chain(txn.failure.iter()) {
            match op {
                TxnOp::Put { key, .. } | TxnOp::Delete { key } if key.is_empty() => {
                    return Err(StoreError::InvalidKey(key.clone()));
                }
                TxnOp::Txn(nested) => self.check_limits(nested)?,
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn decide(&self, txn: &Txn) -> Decision {
        let succeeded = txn
            .compare
            .iter()
            .all(|cmp| cmp.evaluate(self.data.get(&cmp.key)));
        let branch = if succeeded { &txn.success } else { &txn.failure };
        let nested = branch
            .iter()
            .filter_map(|op| match op {
                TxnOp::Txn(inner) => Some(self.decide(inner)),
                _ => None,
            })
            .collect();
        Decision { succeeded, nested }
    }

    fn apply(
        &mut self,
        txn: &Txn,
        decision: &Decision,
        revision: i64,
        events: &mut Vec<WatchEvent>,
    ) -> TxnResponse {
        let branch = if decision.succeeded {
            &txn.success
        } else {
            &txn.failure
        };
        let mut nested = decision.nested.iter();
        let mut responses = Vec::with_capacity(branch.len());
        for op in branch {
            let response = match op {
                TxnOp::Put { key, value } => {
                    let create_revision = self
                        .data
                        .get(key)
                        .map_or(revision, |existing| existing.create_revision);
                    let kv = KeyValue {
                        key: key.clone(),
                        value: value.clone(),
                        create_revision,
                        mod_revision: revision,
                    };
                    self.data.insert(key.clone(), kv.clone());
                    events.push(WatchEvent {
                        kind: EventKind::Put,
                        kv,
                    });
                    TxnOpResponse::Put
                }
                TxnOp::Delete { key } => match self.data.remove(key) {
                    Some(_) => {
                        events.push(WatchEvent {
                            kind: EventKind::Delete,
                            kv: KeyValue {
                                key: key.clone(),
                                value: Vec::new(),
                                create_revision: 0,
                                mod_revision: revision,
                            },
                        });
                        TxnOpResponse::Delete { deleted: 1 }
                    }
                    None => TxnOpResponse::Delete { deleted: 0 },
                },
                TxnOp::Txn(inner) => match nested.next() {
                    Some(inner_decision) => {
                        TxnOpResponse::Txn(self.apply(inner, inner_decision, revision, events))
                    }
                    None => TxnOpResponse::Txn(TxnResponse::default()),
                },
            };
            responses.push(response);
        }
        TxnResponse {
            succeeded: decision.succeeded,
            responses,
        }
    }

    fn notify(&mut self, events: &[WatchEvent]) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| !w.canceled) {
            let matching: Vec<WatchEvent> = events
                .iter()
                .filter(|ev| watcher.matches(&ev.kv.key))
                .cloned()
                .collect();
            if !matching.is_empty() {
                let _ = watcher.tx.unbounded_send(Ok(WatchResponse {
                    canceled: false,
                    cancel_reason: String::new(),
                    events: matching,
                }));
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str, options: GetOptions) -> StoreResult<Vec<KeyValue>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        let strip = |kv: &KeyValue| {
            let mut kv = kv.clone();
            if options.keys_only {
                kv.value.clear();
            }
            kv
        };
        if options.prefix {
            Ok(inner
                .data
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(_, kv)| strip(kv))
                .collect())
        } else {
            Ok(inner.data.get(key).map(strip).into_iter().collect())
        }
    }

    async fn txn(&self, txn: Txn) -> StoreResult<TxnResponse> {
        self.check_limits(&txn)?;
        let size = txn.encoded_len();
        if size > self.max_request_bytes {
            return Err(StoreError::RequestTooLarge {
                size,
                limit: self.max_request_bytes,
            });
        }

        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let decision = inner.decide(&txn);
        let revision = inner.revision + 1;
        let mut events = Vec::new();
        let response = inner.apply(&txn, &decision, revision, &mut events);
        if !events.is_empty() {
            inner.revision = revision;
            inner.notify(&events);
        }
        Ok(response)
    }

    async fn watch(&self, key: &str, options: WatchOptions) -> StoreResult<WatchStream> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let (tx, rx) = mpsc::unbounded();
        inner.watchers.push(Watcher {
            key: key.to_string(),
            prefix: options.prefix,
            canceled: false,
            tx,
        });
        Ok(rx.boxed())
    }

    async fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.watchers.clear();
        Ok(())
    }
}

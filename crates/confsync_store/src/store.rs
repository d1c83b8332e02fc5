//! Store trait definition.

use crate::error::StoreResult;
use crate::types::{GetOptions, KeyValue, Txn, TxnResponse, WatchOptions, WatchResponse};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A lazy, non-restartable sequence of watch responses.
///
/// The stream ends when the store connection is closed.
pub type WatchStream = BoxStream<'static, StoreResult<WatchResponse>>;

/// A transactional key-value store with prefix watches.
///
/// # Invariants
///
/// - `txn` is atomic: either every operation of every branch taken is
///   applied, or the call fails and nothing is applied
/// - all compares of a transaction, nested ones included, see the state
///   before the transaction
/// - watch responses for a key range arrive in revision order
/// - implementations must be `Send + Sync`; a single store is shared by
///   every push, watch and publish task of the process
/// - after [`KvStore::close`] every open watch stream ends and further
///   calls fail with [`crate::StoreError::Closed`]
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - in-process
/// - `EtcdStore` - etcd v3 cluster (feature `etcd`)
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads `key`, or every key under it when `options.prefix` is set.
    ///
    /// Keys are returned in lexical order.
    async fn get(&self, key: &str, options: GetOptions) -> StoreResult<Vec<KeyValue>>;

    /// Executes a transaction atomically.
    async fn txn(&self, txn: Txn) -> StoreResult<TxnResponse>;

    /// Subscribes to changes of `key`, or of every key under it when
    /// `options.prefix` is set.
    async fn watch(&self, key: &str, options: WatchOptions) -> StoreResult<WatchStream>;

    /// Closes the connection, unblocking every open watch stream.
    ///
    /// Closing an already closed store is a no-op.
    async fn close(&self) -> StoreResult<()>;
}

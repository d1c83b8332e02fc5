//! # confsync store
//!
//! The key-value cluster seam used by every confsync component.
//!
//! confsync never talks to the cluster directly. Push and pull both go
//! through the [`KvStore`] trait, which models the three primitives the
//! tool needs from an etcd v3 style cluster:
//!
//! - prefix-scoped range reads, optionally keys-only
//! - multi-key transactions with compare / success / failure branches,
//!   including nested transactions
//! - prefix-scoped watch subscriptions yielding ordered event batches
//!
//! ## Available stores
//!
//! - [`MemoryStore`] - in-process store with etcd compatible semantics,
//!   used by tests and local experiments
//! - `EtcdStore` - the real cluster client (cargo feature `etcd`)
//!
//! ## Example
//!
//! ```rust
//! use confsync_store::{GetOptions, KvStore, MemoryStore, Txn, TxnOp};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryStore::new();
//! store
//!     .txn(Txn::new().and_then(vec![TxnOp::put("/app/a.txt", b"hello".to_vec())]))
//!     .await
//!     .unwrap();
//! let kvs = store.get("/app", GetOptions::prefix()).await.unwrap();
//! assert_eq!(kvs[0].value, b"hello");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
#[cfg(feature = "etcd")]
mod etcd;
mod memory;
mod store;
mod types;

pub use config::{ClientConfig, Credentials, TlsFiles, DEFAULT_ENDPOINT};
pub use error::{StoreError, StoreResult};
#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use memory::{MemoryStore, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_MAX_TXN_OPS};
pub use store::{KvStore, WatchStream};
pub use types::{
    Compare, CompareOp, CompareTarget, EventKind, GetOptions, KeyValue, Txn, TxnOp,
    TxnOpResponse, TxnResponse, WatchEvent, WatchOptions, WatchResponse,
};

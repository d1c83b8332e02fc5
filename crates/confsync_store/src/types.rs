//! Protocol types shared by every store implementation.
//!
//! These mirror the etcd v3 data model closely enough that the etcd
//! backend is a thin translation layer.

/// A stored key with its value and revision metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key.
    pub key: String,
    /// The value. Empty for keys-only reads.
    pub value: Vec<u8>,
    /// Revision at which the key was created. Zero means absent.
    pub create_revision: i64,
    /// Revision of the last modification.
    pub mod_revision: i64,
}

/// Options for range reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Treat the key as a prefix.
    pub prefix: bool,
    /// Return keys without values.
    pub keys_only: bool,
}

impl GetOptions {
    /// Options for a prefix read including values.
    pub fn prefix() -> Self {
        Self {
            prefix: true,
            keys_only: false,
        }
    }

    /// Restricts the read to keys only.
    pub fn with_keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

/// Options for watch subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Treat the key as a prefix.
    pub prefix: bool,
    /// Only accept service from a member that is part of the current
    /// leadership, so updates are not missed across membership changes.
    pub require_leader: bool,
}

impl WatchOptions {
    /// Options for a prefix watch.
    pub fn prefix() -> Self {
        Self {
            prefix: true,
            require_leader: false,
        }
    }

    /// Requires the subscription to be served by the leader side.
    pub fn with_require_leader(mut self) -> Self {
        self.require_leader = true;
        self
    }
}

/// Comparison operator for transaction conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    Greater,
    /// `<`
    Less,
}

impl CompareOp {
    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering;
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::Less => ordering == Ordering::Less,
        }
    }
}

/// What a comparison looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    /// The key's creation revision (0 when the key does not exist).
    CreateRevision(i64),
    /// The key's value.
    Value(Vec<u8>),
}

/// A single transaction condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    /// Key the condition applies to.
    pub key: String,
    /// Comparison operator.
    pub op: CompareOp,
    /// Target and operand.
    pub target: CompareTarget,
}

impl Compare {
    /// Compares the creation revision of `key`.
    pub fn create_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::CreateRevision(revision),
        }
    }

    /// Compares the value of `key`.
    pub fn value(key: impl Into<String>, op: CompareOp, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::Value(value.into()),
        }
    }

    /// Evaluates the condition against the current entry for the key.
    ///
    /// A missing key has creation revision 0. A value comparison against a
    /// missing key is always false.
    pub fn evaluate(&self, current: Option<&KeyValue>) -> bool {
        match (&self.target, current) {
            (CompareTarget::CreateRevision(rev), kv) => {
                let actual = kv.map_or(0, |kv| kv.create_revision);
                self.op.holds(actual.cmp(rev))
            }
            (CompareTarget::Value(_), None) => false,
            (CompareTarget::Value(expected), Some(kv)) => {
                self.op.holds(kv.value.as_slice().cmp(expected.as_slice()))
            }
        }
    }
}

/// An operation inside a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    /// Store `value` under `key`.
    Put {
        /// Key.
        key: String,
        /// Value.
        value: Vec<u8>,
    },
    /// Delete `key`.
    Delete {
        /// Key.
        key: String,
    },
    /// A nested, independently evaluated transaction.
    Txn(Txn),
}

impl TxnOp {
    /// Creates a put operation.
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete operation.
    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }

    /// Wraps a nested transaction.
    pub fn txn(txn: Txn) -> Self {
        TxnOp::Txn(txn)
    }

    /// Number of leaf operations, counting nested branches.
    pub fn op_count(&self) -> usize {
        match self {
            TxnOp::Put { .. } | TxnOp::Delete { .. } => 1,
            TxnOp::Txn(txn) => txn.op_count(),
        }
    }

    /// Approximate encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            TxnOp::Put { key, value } => key.len() + value.len(),
            TxnOp::Delete { key } => key.len(),
            TxnOp::Txn(txn) => txn.encoded_len(),
        }
    }
}

/// A transaction: if every compare holds run `success`, else `failure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    /// Conditions, ANDed together.
    pub compare: Vec<Compare>,
    /// Operations run when all conditions hold.
    pub success: Vec<TxnOp>,
    /// Operations run otherwise.
    pub failure: Vec<TxnOp>,
}

impl Txn {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the conditions.
    pub fn when(mut self, compare: Vec<Compare>) -> Self {
        self.compare = compare;
        self
    }

    /// Sets the success branch.
    pub fn and_then(mut self, ops: Vec<TxnOp>) -> Self {
        self.success = ops;
        self
    }

    /// Sets the failure branch.
    pub fn or_else(mut self, ops: Vec<TxnOp>) -> Self {
        self.failure = ops;
        self
    }

    /// Number of leaf operations across both branches, recursively.
    pub fn op_count(&self) -> usize {
        self.success
            .iter()
            .chain(self.failure.iter())
            .map(TxnOp::op_count)
            .sum()
    }

    /// Approximate encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let compares: usize = self
            .compare
            .iter()
            .map(|c| {
                c.key.len()
                    + match &c.target {
                        CompareTarget::CreateRevision(_) => 8,
                        CompareTarget::Value(v) => v.len(),
                    }
            })
            .sum();
        let ops: usize = self
            .success
            .iter()
            .chain(self.failure.iter())
            .map(TxnOp::encoded_len)
            .sum();
        compares + ops
    }
}

/// Result of one operation inside a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOpResponse {
    /// A put was applied.
    Put,
    /// A delete was applied.
    Delete {
        /// Number of keys removed.
        deleted: i64,
    },
    /// A nested transaction ran.
    Txn(TxnResponse),
}

impl TxnOpResponse {
    /// Returns the nested transaction response, if any.
    pub fn as_txn(&self) -> Option<&TxnResponse> {
        match self {
            TxnOpResponse::Txn(resp) => Some(resp),
            _ => None,
        }
    }
}

/// Result of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnResponse {
    /// Whether the compare list held (success branch executed).
    pub succeeded: bool,
    /// One response per executed operation, in order.
    pub responses: Vec<TxnOpResponse>,
}

/// Kind of a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Key was created or updated.
    Put,
    /// Key was deleted.
    Delete,
}

/// A single change delivered by a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Event kind.
    pub kind: EventKind,
    /// The key after the change. Value is empty for deletes.
    pub kv: KeyValue,
}

/// A batch of watch events, one per committed store revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchResponse {
    /// The store tore the subscription down (e.g. history compaction).
    pub canceled: bool,
    /// Reason given by the store for the cancellation.
    pub cancel_reason: String,
    /// Events in revision order.
    pub events: Vec<WatchEvent>,
}

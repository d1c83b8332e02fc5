//! State publishing: plain single-key writes outside any tree.

use confsync_store::{Compare, CompareOp, KvStore, Txn, TxnOp};
use std::fmt;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::keys::clean_key;

/// Operation name of [`StateOp::Set`].
pub const OP_SET: &str = "set";

/// Operation name of [`StateOp::DeleteIfSame`].
pub const OP_DELETE_IF_SAME: &str = "del-if-same";

/// One state write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOp {
    /// Unconditional put.
    Set {
        /// Key written.
        key: String,
        /// Value written.
        value: String,
    },
    /// Delete `key` if it still holds `value`.
    DeleteIfSame {
        /// Key deleted.
        key: String,
        /// Value the key must hold.
        value: String,
    },
}

impl StateOp {
    /// Builds an operation from its name.
    pub fn new(op: &str, key: String, value: String) -> EngineResult<Self> {
        match op {
            OP_SET => Ok(StateOp::Set { key, value }),
            OP_DELETE_IF_SAME => Ok(StateOp::DeleteIfSame { key, value }),
            other => Err(EngineError::InvalidStateOp(format!(
                "unknown operation {other:?}"
            ))),
        }
    }

    /// Key the operation applies to.
    pub fn key(&self) -> &str {
        match self {
            StateOp::Set { key, .. } | StateOp::DeleteIfSame { key, .. } => key,
        }
    }

    fn into_txn_op(self) -> TxnOp {
        match self {
            StateOp::Set { key, value } => TxnOp::put(key, value.into_bytes()),
            StateOp::DeleteIfSame { key, value } => TxnOp::txn(
                Txn::new()
                    .when(vec![Compare::value(&key, CompareOp::Equal, value.into_bytes())])
                    .and_then(vec![TxnOp::delete(key)]),
            ),
        }
    }
}

impl fmt::Display for StateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateOp::Set { key, value } => write!(f, "{OP_SET} {key} {value}"),
            StateOp::DeleteIfSame { key, value } => write!(f, "{OP_DELETE_IF_SAME} {key} {value}"),
        }
    }
}

/// Parses `op key value [-- op key value ...]`.
///
/// Keys are joined under `base_prefix` when one is given.
pub fn parse_state_ops(args: &[String], base_prefix: Option<&str>) -> EngineResult<Vec<StateOp>> {
    let args = match args.first() {
        Some(first) if first == "--" => &args[1..],
        _ => args,
    };
    if args.is_empty() {
        return Err(EngineError::InvalidStateOp(
            "no operations given".to_string(),
        ));
    }
    args.split(|arg| arg == "--")
        .map(|group| match group {
            [] => Err(EngineError::InvalidStateOp(
                "no command (trailing --?)".to_string(),
            )),
            [_] => Err(EngineError::InvalidStateOp("key missing".to_string())),
            [_, _] => Err(EngineError::InvalidStateOp("value missing".to_string())),
            [op, key, value] => {
                let key = match base_prefix {
                    Some(base) if !base.is_empty() => clean_key(&format!("{base}/{key}")),
                    _ => key.clone(),
                };
                StateOp::new(op, key, value.clone())
            }
            [_, _, _, extra, ..] => Err(EngineError::InvalidStateOp(format!(
                "unexpected argument {extra:?} (missing --?)"
            ))),
        })
        .collect()
}

/// Applies `ops` in one transaction.
pub async fn publish(store: &dyn KvStore, ops: Vec<StateOp>) -> EngineResult<()> {
    if ops.is_empty() {
        return Ok(());
    }
    for op in &ops {
        debug!(op = %op, "publishing state");
    }
    let ops = ops.into_iter().map(StateOp::into_txn_op).collect();
    store.txn(Txn::new().and_then(ops)).await?;
    Ok(())
}

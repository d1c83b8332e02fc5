//! Update-state command implementation.

use clap::Args;
use confsync_engine::{parse_state_ops, publish, EngineResult, StateOp};
use confsync_store::KvStore;

/// Arguments of `update-state`.
#[derive(Args, Debug)]
pub struct UpdateStateArgs {
    /// Key prefix for all the operations
    #[arg(long, value_name = "KEY")]
    pub prefix: Option<String>,

    /// `<op> <key> <value>` groups separated by `--`
    #[arg(
        required = true,
        num_args = 1..,
        allow_hyphen_values = true,
        trailing_var_arg = true,
        value_name = "OPERATION"
    )]
    pub operations: Vec<String>,
}

/// Parses the operations before any connection is made.
pub fn parse(args: &UpdateStateArgs) -> EngineResult<Vec<StateOp>> {
    let prefix = args.prefix.as_deref().filter(|p| !p.is_empty());
    parse_state_ops(&args.operations, prefix)
}

/// Commits `ops` in one transaction.
pub async fn run(store: &dyn KvStore, ops: Vec<StateOp>) -> Result<(), Box<dyn std::error::Error>> {
    publish(store, ops).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_store::MemoryStore;

    fn args(prefix: Option<&str>, operations: &[&str]) -> UpdateStateArgs {
        UpdateStateArgs {
            prefix: prefix.map(str::to_string),
            operations: operations.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn failover_sequence() {
        let store = MemoryStore::new();
        let master = args(
            Some("/etc/router/state"),
            &["set", "backup", "MASTER", "--", "set", "current", "backup"],
        );
        run(&store, parse(&master).unwrap()).await.unwrap();
        assert_eq!(
            store.value("/etc/router/state/current").as_deref(),
            Some(&b"backup"[..])
        );

        let demoted = args(
            Some("/etc/router/state"),
            &["set", "backup", "BACKUP", "--", "del-if-same", "current", "backup"],
        );
        run(&store, parse(&demoted).unwrap()).await.unwrap();
        assert_eq!(
            store.value("/etc/router/state/backup").as_deref(),
            Some(&b"BACKUP"[..])
        );
        assert!(store.value("/etc/router/state/current").is_none());
    }

    #[test]
    fn incomplete_operation_is_rejected_before_connecting() {
        let err = parse(&args(None, &["set", "key"])).unwrap_err();
        assert!(err.to_string().contains("value missing"));
    }

    #[test]
    fn empty_prefix_means_none() {
        let ops = parse(&args(Some(""), &["set", "k", "v"])).unwrap();
        assert_eq!(ops[0].key(), "k");
    }
}

//! Watch command implementation.

use clap::Args;
use confsync_engine::keys::clean_key;
use confsync_engine::{
    parse_watch_definitions, FifoEventSource, KeepalivedPublisher, SessionConfig, ShutdownSignals,
    Supervisor,
};
use confsync_store::KvStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Arguments of `watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Common key prefix for all watches and keepalived status
    #[arg(long, default_value = "", value_name = "KEY")]
    pub prefix: String,

    /// Path to keepalived events FIFO
    #[arg(long = "ka-fifo", value_name = "PATH")]
    pub ka_fifo: Option<PathBuf>,

    /// keepalived instance name
    #[arg(long = "ka-instance", value_name = "NAME")]
    pub ka_instance: Option<String>,

    /// Key prefix to store keepalived status (joined with --prefix, if set)
    #[arg(long = "ka-key", default_value = "", value_name = "KEY")]
    pub ka_key: String,

    /// `<prefix> <root[:owner[:group[:mode]]]> <command> [<arg> ...]`
    /// groups separated by `--`
    #[arg(
        required = true,
        num_args = 1..,
        allow_hyphen_values = true,
        trailing_var_arg = true,
        value_name = "DEFINITION"
    )]
    pub definitions: Vec<String>,
}

/// Validated watch configuration.
#[derive(Debug)]
pub struct WatchPlan {
    /// One entry per definition.
    pub sessions: Vec<SessionConfig>,
    /// keepalived forwarding, when requested.
    pub forwarding: Option<(FifoEventSource, KeepalivedPublisher)>,
}

/// Validates the arguments before any connection is made.
pub fn plan(args: &WatchArgs) -> Result<WatchPlan, Box<dyn std::error::Error>> {
    let sessions = parse_watch_definitions(&args.definitions, &args.prefix)?;

    let fifo = args.ka_fifo.as_ref().filter(|p| !p.as_os_str().is_empty());
    let instance = args.ka_instance.as_deref().filter(|i| !i.is_empty());
    let forwarding = match (fifo, instance) {
        (None, None) => None,
        (Some(_), None) => {
            return Err("--ka-instance name must be set for processing keepalived events".into())
        }
        (None, Some(instance)) => {
            return Err(format!(
                "--ka-fifo name must be set for processing keepalived instance {instance} events"
            )
            .into())
        }
        (Some(fifo), Some(instance)) => {
            let key_prefix = if args.prefix.is_empty() {
                args.ka_key.clone()
            } else {
                clean_key(&format!("/{}/{}", args.prefix, args.ka_key))
            };
            Some((
                FifoEventSource::new(fifo),
                KeepalivedPublisher::new(key_prefix, instance),
            ))
        }
    };

    Ok(WatchPlan {
        sessions,
        forwarding,
    })
}

/// Runs every session until a termination signal arrives.
pub async fn run(
    store: Arc<dyn KvStore>,
    plan: WatchPlan,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut signals = ShutdownSignals::install()?;

    let mut supervisor = Supervisor::new(store);
    for config in plan.sessions {
        supervisor.add_session(config);
    }
    if let Some((source, publisher)) = plan.forwarding {
        supervisor = supervisor.with_event_forwarding(source, publisher);
    }

    supervisor
        .run_until(async move {
            let name = signals.recv().await;
            info!(signal = name, "received signal");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(prefix: &str, fifo: Option<&str>, instance: Option<&str>, ka_key: &str) -> WatchArgs {
        WatchArgs {
            prefix: prefix.to_string(),
            ka_fifo: fifo.map(PathBuf::from),
            ka_instance: instance.map(str::to_string),
            ka_key: ka_key.to_string(),
            definitions: ["app", "/srv/app", "true"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    #[test]
    fn sessions_are_joined_under_common_prefix() {
        let plan = plan(&args("/etc", None, None, "")).unwrap();
        assert_eq!(plan.sessions.len(), 1);
        assert_eq!(plan.sessions[0].prefix, "/etc/app");
        assert!(plan.forwarding.is_none());
    }

    #[test]
    fn fifo_without_instance_is_rejected() {
        let err = plan(&args("", Some("/run/ka"), None, "")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "--ka-instance name must be set for processing keepalived events"
        );
    }

    #[test]
    fn instance_without_fifo_is_rejected() {
        let err = plan(&args("", None, Some("lb1"), "")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "--ka-fifo name must be set for processing keepalived instance lb1 events"
        );
    }

    #[test]
    fn keepalived_key_is_joined_with_prefix() {
        let plan = plan(&args("/etc/firewall", Some("/run/ka"), Some("master"), "state")).unwrap();
        let (source, publisher) = plan.forwarding.unwrap();
        assert_eq!(source.path(), std::path::Path::new("/run/ka"));
        assert_eq!(publisher.key_prefix(), "/etc/firewall/state");
        assert_eq!(publisher.instance(), "master");
    }

    #[test]
    fn keepalived_key_without_prefix_is_used_as_is() {
        let plan = plan(&args("", Some("/run/ka"), Some("master"), "/ka")).unwrap();
        let (_, publisher) = plan.forwarding.unwrap();
        assert_eq!(publisher.key_prefix(), "/ka");
    }

    #[test]
    fn missing_command_fails_before_connecting() {
        let mut bad = args("", None, None, "");
        bad.definitions.truncate(2);
        assert!(plan(&bad).is_err());
    }
}

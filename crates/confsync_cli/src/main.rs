//! confsync CLI
//!
//! Synchronizes on-disk configuration files through an etcd v3 cluster.
//!
//! # Commands
//!
//! - `put` - Push a directory tree under a key prefix
//! - `watch` - Mirror key prefixes into directories and run reload commands
//! - `update-state` - Update service state keys in one transaction

mod commands;
mod connect;

use clap::{Parser, Subcommand};
use connect::ClusterArgs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// A simple tool to synchronize on-disk configuration files from an etcd v3
/// cluster.
#[derive(Parser, Debug)]
#[command(name = "confsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize the content of a directory to the store
    ///
    /// Files are compared by content fingerprint and only changed files are
    /// written. Stored files missing locally are removed. Everything is
    /// committed in a single transaction.
    #[command(after_help = "Example:\n  confsync put /etc/firewall/keepalived .")]
    Put {
        /// Key prefix to store the tree under
        prefix: String,

        /// Directory to push (current directory if omitted)
        directory: Option<PathBuf>,
    },

    /// Watch prefixes, mirror them to local directories and run commands
    #[command(after_help = "Example:\n  confsync watch --prefix /etc/firewall --ka-fifo /run/ka \\\n      --ka-instance master --ka-key state \\\n      -- keepalived /services/keepalived/config sv reload keepalived")]
    Watch(commands::watch::WatchArgs),

    /// Update service state keys in a single transaction
    ///
    /// Operations: `set <key> <value>` and `del-if-same <key> <value>`,
    /// separated by `--`.
    #[command(after_help = "Example:\n  confsync update-state --prefix /etc/router/state set backup MASTER -- set current backup")]
    UpdateState(commands::update_state::UpdateStateArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.cluster.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Put { prefix, directory } => {
            let store = connect::connect(&cli.cluster).await?;
            let result = commands::put::run(store.as_ref(), &prefix, directory).await;
            store.close().await?;
            result
        }
        Commands::Watch(args) => {
            let plan = commands::watch::plan(&args)?;
            let store = connect::connect(&cli.cluster).await?;
            commands::watch::run(store, plan).await
        }
        Commands::UpdateState(args) => {
            let ops = commands::update_state::parse(&args)?;
            let store = connect::connect(&cli.cluster).await?;
            let result = commands::update_state::run(store.as_ref(), ops).await;
            store.close().await?;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_defaults() {
        let cli = parse(&["confsync", "put", "/svc/app"]);
        assert!(cli.cluster.endpoints.is_empty());
        assert_eq!(cli.cluster.dial_timeout, Duration::from_secs(2));
        assert_eq!(cli.cluster.keepalive_time, Duration::from_secs(2));
        assert_eq!(cli.cluster.keepalive_timeout, Duration::from_secs(6));
        assert!(cli.cluster.insecure_transport);
        assert!(!cli.cluster.debug);
        match cli.command {
            Commands::Put { prefix, directory } => {
                assert_eq!(prefix, "/svc/app");
                assert!(directory.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&[
            "confsync",
            "put",
            "/svc/app",
            "conf",
            "--endpoints",
            "10.0.0.1:2379,10.0.0.2:2379",
            "--dial-timeout",
            "500ms",
            "--insecure-transport=false",
            "--debug",
        ]);
        assert_eq!(cli.cluster.endpoints, ["10.0.0.1:2379", "10.0.0.2:2379"]);
        assert_eq!(cli.cluster.dial_timeout, Duration::from_millis(500));
        assert!(!cli.cluster.insecure_transport);
        assert!(cli.cluster.debug);
    }

    #[test]
    fn discovery_srv_is_an_alias_of_domain() {
        let cli = parse(&["confsync", "--discovery-srv", "example.com", "put", "/p"]);
        assert_eq!(cli.cluster.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn watch_keeps_definition_separators() {
        let cli = parse(&[
            "confsync",
            "watch",
            "--prefix",
            "/etc",
            "--",
            "app",
            "/srv/app",
            "sh",
            "-c",
            "true",
            "--",
            "web",
            "/srv/web",
            "true",
        ]);
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.prefix, "/etc");
        assert_eq!(
            args.definitions,
            ["app", "/srv/app", "sh", "-c", "true", "--", "web", "/srv/web", "true"]
        );
    }

    #[test]
    fn update_state_keeps_operation_separators() {
        let cli = parse(&[
            "confsync",
            "update-state",
            "--prefix",
            "/etc/router/state",
            "set",
            "backup",
            "MASTER",
            "--",
            "set",
            "current",
            "backup",
        ]);
        let Commands::UpdateState(args) = cli.command else {
            panic!("expected update-state");
        };
        assert_eq!(args.prefix.as_deref(), Some("/etc/router/state"));
        assert_eq!(
            args.operations,
            ["set", "backup", "MASTER", "--", "set", "current", "backup"]
        );
    }

    #[test]
    fn put_requires_prefix() {
        assert!(Cli::try_parse_from(["confsync", "put"]).is_err());
    }
}

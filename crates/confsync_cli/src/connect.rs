//! Cluster connection flags.

use clap::{ArgAction, Args};
use confsync_store::{ClientConfig, Credentials, KvStore, StoreResult, TlsFiles, DEFAULT_ENDPOINT};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Connection flags shared by every command, named after `etcdctl`'s.
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// List of gRPC endpoints
    #[arg(
        global = true,
        short = 'e',
        long,
        env = "ETCDCTL_ENDPOINTS",
        value_delimiter = ',',
        value_name = "ENDPOINTS"
    )]
    pub endpoints: Vec<String>,

    /// Dial timeout for client connections
    #[arg(global = true, long, env = "ETCDCTL_DIAL_TIMEOUT", default_value = "2s", value_parser = humantime::parse_duration)]
    pub dial_timeout: Duration,

    /// Keepalive time for client connections
    #[arg(global = true, long, env = "ETCDCTL_KEEPALIVE_TIME", default_value = "2s", value_parser = humantime::parse_duration)]
    pub keepalive_time: Duration,

    /// Keepalive timeout for client connections
    #[arg(global = true, long, env = "ETCDCTL_KEEPALIVE_TIMEOUT", default_value = "6s", value_parser = humantime::parse_duration)]
    pub keepalive_timeout: Duration,

    /// Disable transport security for client connections
    #[arg(
        global = true,
        long,
        env = "ETCDCTL_INSECURE_TRANSPORT",
        action = ArgAction::Set,
        default_value_t = true,
        default_missing_value = "true",
        num_args = 0..=1
    )]
    pub insecure_transport: bool,

    /// Skip server certificate verification
    #[arg(global = true, long, env = "ETCDCTL_INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// Identify secure client using this TLS certificate file
    #[arg(global = true, long, env = "ETCDCTL_CERT", value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// Identify secure client using this TLS key file
    #[arg(global = true, long, env = "ETCDCTL_KEY", value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Verify certificates of TLS-enabled secure servers using this CA bundle
    #[arg(global = true, long, env = "ETCDCTL_CACERT", value_name = "FILE")]
    pub cacert: Option<PathBuf>,

    /// Domain name to verify TLS-enabled secure servers against
    #[arg(
        global = true,
        short = 'd',
        long,
        alias = "discovery-srv",
        env = "ETCDCTL_DOMAIN",
        value_name = "NAME"
    )]
    pub domain: Option<String>,

    /// Username[:password] for authentication
    #[arg(global = true, long, env = "ETCDCTL_USER", value_name = "USER")]
    pub user: Option<String>,

    /// Password for authentication, when not part of --user
    #[arg(global = true, long, env = "ETCDCTL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Enable debug logging
    #[arg(global = true, long, env = "ETCDCTL_DEBUG")]
    pub debug: bool,
}

impl ClusterArgs {
    /// Builds and validates the client configuration.
    pub fn client_config(&self) -> StoreResult<ClientConfig> {
        let endpoints = if self.endpoints.is_empty() {
            vec![DEFAULT_ENDPOINT.to_string()]
        } else {
            self.endpoints.clone()
        };
        let mut config = ClientConfig::new(endpoints)
            .with_dial_timeout(self.dial_timeout)
            .with_keep_alive(self.keepalive_time, self.keepalive_timeout)
            .with_insecure_transport(self.insecure_transport)
            .with_insecure_skip_tls_verify(self.insecure_skip_tls_verify)
            .with_tls(TlsFiles {
                cert_file: self.cert.clone(),
                key_file: self.key.clone(),
                ca_file: self.cacert.clone(),
            });
        if let Some(domain) = &self.domain {
            config = config.with_server_name(domain);
        }
        if let Some(user) = &self.user {
            config = config.with_credentials(Credentials::parse(user, self.password.as_deref())?);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Opens the cluster connection.
#[cfg(feature = "etcd")]
pub async fn connect(args: &ClusterArgs) -> Result<Arc<dyn KvStore>, Box<dyn Error>> {
    let config = args.client_config()?;
    let store = confsync_store::EtcdStore::connect(&config).await?;
    Ok(Arc::new(store))
}

/// Opens the cluster connection.
#[cfg(not(feature = "etcd"))]
pub async fn connect(args: &ClusterArgs) -> Result<Arc<dyn KvStore>, Box<dyn Error>> {
    args.client_config()?;
    Err("confsync was built without etcd support (enable the `etcd` feature)".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct ClusterOnly {
        #[command(flatten)]
        cluster: ClusterArgs,
    }

    fn cluster(args: &[&str]) -> ClusterArgs {
        let argv = std::iter::once("confsync").chain(args.iter().copied());
        ClusterOnly::try_parse_from(argv).unwrap().cluster
    }

    #[test]
    fn empty_endpoints_fall_back_to_default() {
        let config = cluster(&[]).client_config().unwrap();
        assert_eq!(config.endpoints, [DEFAULT_ENDPOINT]);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        assert!(cluster(&["--cert", "/etc/ssl/client.pem"])
            .client_config()
            .is_err());
    }

    #[test]
    fn user_needs_a_password() {
        assert!(cluster(&["--user", "root"]).client_config().is_err());
        let config = cluster(&["--user", "root", "--password", "s3cret"])
            .client_config()
            .unwrap();
        assert_eq!(config.credentials.unwrap().password, "s3cret");
    }

    #[cfg(feature = "etcd")]
    #[test]
    fn default_build_links_the_etcd_backend() {
        let _connect = confsync_store::EtcdStore::connect;
    }

    #[cfg(not(feature = "etcd"))]
    #[tokio::test]
    async fn build_without_backend_reports_it() {
        let err = connect(&cluster(&[])).await.err().unwrap();
        assert!(err.to_string().contains("without etcd support"));
    }
}

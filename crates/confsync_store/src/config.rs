//! Cluster client configuration.

use crate::error::{StoreError, StoreResult};
use std::path::PathBuf;
use std::time::Duration;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:2379";

/// TLS material for the client connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// Client certificate (PEM).
    pub cert_file: Option<PathBuf>,
    /// Client private key (PEM).
    pub key_file: Option<PathBuf>,
    /// CA bundle used to verify servers (PEM).
    pub ca_file: Option<PathBuf>,
}

impl TlsFiles {
    /// Returns true if any TLS material was given.
    pub fn is_configured(&self) -> bool {
        self.cert_file.is_some() || self.ca_file.is_some()
    }
}

/// Username and password for cluster authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Parses `user[:password]`, falling back to `password` when the
    /// specification carries none.
    pub fn parse(spec: &str, password: Option<&str>) -> StoreResult<Self> {
        match spec.split_once(':') {
            Some((user, pass)) => Ok(Self {
                user: user.to_string(),
                password: pass.to_string(),
            }),
            None => match password {
                Some(pass) => Ok(Self {
                    user: spec.to_string(),
                    password: pass.to_string(),
                }),
                None => Err(StoreError::Config(format!(
                    "no password supplied for user {spec}"
                ))),
            },
        }
    }
}

/// Configuration for connecting to the cluster.
///
/// Built once at startup and handed to the store constructor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// gRPC endpoints.
    pub endpoints: Vec<String>,
    /// Dial timeout.
    pub dial_timeout: Duration,
    /// Keep-alive ping interval.
    pub keep_alive_time: Duration,
    /// Keep-alive ping timeout.
    pub keep_alive_timeout: Duration,
    /// Disable transport security when no TLS material is given.
    pub insecure_transport: bool,
    /// Skip server certificate verification.
    pub insecure_skip_tls_verify: bool,
    /// TLS files.
    pub tls: TlsFiles,
    /// Domain name used to verify TLS-enabled servers.
    pub server_name: Option<String>,
    /// Authentication.
    pub credentials: Option<Credentials>,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoints.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            dial_timeout: Duration::from_secs(2),
            keep_alive_time: Duration::from_secs(2),
            keep_alive_timeout: Duration::from_secs(6),
            insecure_transport: true,
            insecure_skip_tls_verify: false,
            tls: TlsFiles::default(),
            server_name: None,
            credentials: None,
        }
    }

    /// Sets the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets keep-alive interval and timeout.
    pub fn with_keep_alive(mut self, time: Duration, timeout: Duration) -> Self {
        self.keep_alive_time = time;
        self.keep_alive_timeout = timeout;
        self
    }

    /// Sets the TLS files.
    pub fn with_tls(mut self, tls: TlsFiles) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the server name used for certificate verification.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Sets authentication credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets whether plaintext transport is allowed.
    pub fn with_insecure_transport(mut self, insecure: bool) -> Self {
        self.insecure_transport = insecure;
        self
    }

    /// Sets whether server certificates are verified.
    pub fn with_insecure_skip_tls_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_tls_verify = skip;
        self
    }

    /// Returns true if the connection should use TLS.
    pub fn use_tls(&self) -> bool {
        self.tls.is_configured() || !self.insecure_transport
    }

    /// Checks the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if:
    /// - no endpoint is configured
    /// - a certificate is given without a key, or a key without a certificate
    pub fn validate(&self) -> StoreResult<()> {
        if self.endpoints.is_empty() {
            return Err(StoreError::Config("no endpoints configured".into()));
        }
        match (&self.tls.cert_file, &self.tls.key_file) {
            (None, Some(_)) => Err(StoreError::Config("no TLS cert file specified".into())),
            (Some(_), None) => Err(StoreError::Config("no TLS key file specified".into())),
            _ => Ok(()),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(vec![DEFAULT_ENDPOINT.to_string()])
    }
}

//! etcd v3 backend.

use crate::config::ClientConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{KvStore, WatchStream};
use crate::types::{
    Compare, CompareOp, CompareTarget, EventKind, GetOptions, KeyValue, Txn, TxnOp,
    TxnOpResponse, TxnResponse, WatchEvent, WatchOptions, WatchResponse,
};
use async_trait::async_trait;
use etcd_client::{Certificate, Client, ConnectOptions, EventType, Identity, TlsOptions};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A [`KvStore`] backed by an etcd v3 cluster.
///
/// The underlying client multiplexes every request over one channel and is
/// safe to share between tasks. Closing the store ends all watch streams
/// opened through it.
pub struct EtcdStore {
    client: Client,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl EtcdStore {
    /// Connects to the cluster described by `config`.
    ///
    /// Requests are sent with the require-leader flag so that a watch is
    /// never served by a member cut off from the quorum.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for unusable TLS material and
    /// [`StoreError::Connection`] when no endpoint can be reached.
    pub async fn connect(config: &ClientConfig) -> StoreResult<Self> {
        config.validate()?;

        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout)
            .with_keep_alive(config.keep_alive_time, config.keep_alive_timeout)
            .with_require_leader(true);

        if let Some(creds) = &config.credentials {
            options = options.with_user(creds.user.clone(), creds.password.clone());
        }

        if config.use_tls() {
            options = options.with_tls(tls_options(config)?);
        }

        debug!(endpoints = ?config.endpoints, tls = config.use_tls(), "connecting to etcd");
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn tls_options(config: &ClientConfig) -> StoreResult<TlsOptions> {
    let read = |path: &std::path::Path| {
        std::fs::read(path)
            .map_err(|e| StoreError::Config(format!("reading {}: {}", path.display(), e)))
    };

    let mut tls = TlsOptions::new();
    if let Some(name) = &config.server_name {
        tls = tls.domain_name(name.clone());
    }
    if let Some(ca) = &config.tls.ca_file {
        tls = tls.ca_certificate(Certificate::from_pem(read(ca)?));
    }
    if let (Some(cert), Some(key)) = (&config.tls.cert_file, &config.tls.key_file) {
        tls = tls.identity(Identity::from_pem(read(cert)?, read(key)?));
    }
    if config.insecure_skip_tls_verify {
        warn!("server certificate verification cannot be disabled for the etcd client; ignoring");
    }
    Ok(tls)
}

fn request_error(err: etcd_client::Error) -> StoreError {
    StoreError::Request(err.to_string())
}

fn convert_kv(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
    }
}

fn convert_compare(cmp: Compare) -> etcd_client::Compare {
    let op = match cmp.op {
        CompareOp::Equal => etcd_client::CompareOp::Equal,
        CompareOp::NotEqual => etcd_client::CompareOp::NotEqual,
        CompareOp::Greater => etcd_client::CompareOp::Greater,
        CompareOp::Less => etcd_client::CompareOp::Less,
    };
    match cmp.target {
        CompareTarget::CreateRevision(rev) => {
            etcd_client::Compare::create_revision(cmp.key, op, rev)
        }
        CompareTarget::Value(value) => etcd_client::Compare::value(cmp.key, op, value),
    }
}

fn convert_ops(ops: Vec<TxnOp>) -> Vec<etcd_client::TxnOp> {
    ops.into_iter()
        .map(|op| match op {
            TxnOp::Put { key, value } => etcd_client::TxnOp::put(key, value, None),
            TxnOp::Delete { key } => etcd_client::TxnOp::delete(key, None),
            TxnOp::Txn(txn) => etcd_client::TxnOp::txn(convert_txn(txn)),
        })
        .collect()
}

fn convert_txn(txn: Txn) -> etcd_client::Txn {
    let compare: Vec<etcd_client::Compare> =
        txn.compare.into_iter().map(convert_compare).collect();
    etcd_client::Txn::new()
        .when(compare)
        .and_then(convert_ops(txn.success))
        .or_else(convert_ops(txn.failure))
}

fn convert_txn_response(resp: &etcd_client::TxnResponse) -> TxnResponse {
    let responses = resp
        .op_responses()
        .iter()
        .map(|r| match r {
            etcd_client::TxnOpResponse::Delete(del) => TxnOpResponse::Delete {
                deleted: del.deleted(),
            },
            etcd_client::TxnOpResponse::Txn(nested) => {
                TxnOpResponse::Txn(convert_txn_response(nested))
            }
            _ => TxnOpResponse::Put,
        })
        .collect();
    TxnResponse {
        succeeded: resp.succeeded(),
        responses,
    }
}

fn convert_watch_response(resp: &etcd_client::WatchResponse) -> WatchResponse {
    let events = resp
        .events()
        .iter()
        .filter_map(|ev| {
            let kv = ev.kv()?;
            let kind = match ev.event_type() {
                EventType::Put => EventKind::Put,
                EventType::Delete => EventKind::Delete,
            };
            Some(WatchEvent {
                kind,
                kv: convert_kv(kv),
            })
        })
        .collect();
    WatchResponse {
        canceled: resp.canceled(),
        cancel_reason: resp.cancel_reason().to_string(),
        events,
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str, options: GetOptions) -> StoreResult<Vec<KeyValue>> {
        self.ensure_open()?;
        let mut get = etcd_client::GetOptions::new();
        if options.prefix {
            get = get.with_prefix();
        }
        if options.keys_only {
            get = get.with_keys_only();
        }
        let resp = self
            .client
            .kv_client()
            .get(key, Some(get))
            .await
            .map_err(request_error)?;
        Ok(resp.kvs().iter().map(convert_kv).collect())
    }

    async fn txn(&self, txn: Txn) -> StoreResult<TxnResponse> {
        self.ensure_open()?;
        let resp = self
            .client
            .kv_client()
            .txn(convert_txn(txn))
            .await
            .map_err(request_error)?;
        Ok(convert_txn_response(&resp))
    }

    async fn watch(&self, key: &str, options: WatchOptions) -> StoreResult<WatchStream> {
        self.ensure_open()?;
        let mut watch = etcd_client::WatchOptions::new();
        if options.prefix {
            watch = watch.with_prefix();
        }
        let (watcher, stream) = self
            .client
            .watch_client()
            .watch(key, Some(watch))
            .await
            .map_err(request_error)?;

        let shutdown = self.shutdown.clone();
        let responses = futures::stream::unfold(
            Some((watcher, stream, shutdown)),
            |state| async move {
                let (watcher, mut stream, shutdown) = state?;
                tokio::select! {
                    _ = shutdown.cancelled() => None,
                    message = stream.message() => match message {
                        Ok(Some(resp)) => Some((
                            Ok(convert_watch_response(&resp)),
                            Some((watcher, stream, shutdown)),
                        )),
                        Ok(None) => None,
                        Err(e) => Some((Err(request_error(e)), None)),
                    },
                }
            },
        );
        Ok(responses.boxed())
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("closing etcd connection");
            self.shutdown.cancel();
        }
        Ok(())
    }
}

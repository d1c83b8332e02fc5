//! Push: directory tree to store.
//!
//! A push lists the keys already under the prefix, walks the local tree
//! and submits one transaction holding one sub-transaction per file and
//! per stale key:
//!
//! ```text
//! file:   if exists(key) && exists(key/.hash) && key/.hash == fingerprint
//!         then {} else { put key, put key/.hash }
//! stale:  if {} then { delete key, delete key/.hash }
//! ```
//!
//! The store applies the whole batch or nothing.

use confsync_codec::encode;
use confsync_store::{Compare, CompareOp, GetOptions, KvStore, Txn, TxnOp};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::PushOptions;
use crate::error::{EngineError, EngineResult};
use crate::ignore::IgnoreModel;
use crate::keys::{clean_key, hash_key, is_hash_key, join_key, strip_namespace};
use crate::paths::{clean_path, escapes, to_key_path};

/// Keys changed by a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Content keys written, in walk order.
    pub updated: Vec<String>,
    /// Content keys deleted.
    pub removed: Vec<String>,
}

impl PushReport {
    /// Returns true if the push changed nothing.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }

    /// Report lines in the form printed by the CLI.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.updated
            .iter()
            .map(|key| format!("updated {key}"))
            .chain(self.removed.iter().map(|key| format!("removed {key}")))
    }
}

#[derive(Debug)]
enum Planned {
    Update(String),
    Remove(String),
}

/// Walk root and the ignore model scoped for it.
#[derive(Debug)]
struct Layout {
    walk_root: PathBuf,
    ignore: IgnoreModel,
}

impl Layout {
    fn resolve(options: &PushOptions) -> EngineResult<Self> {
        let cwd = match &options.working_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().map_err(|e| EngineError::io(".", e))?,
        };
        let cwd = clean_path(&cwd);

        let Some(root) = &options.root else {
            return Ok(Self {
                ignore: IgnoreModel::new(&cwd, &options.global_ignore),
                walk_root: cwd,
            });
        };
        if root.is_absolute() {
            let walk_root = clean_path(root);
            return Ok(Self {
                ignore: IgnoreModel::new(&walk_root, &options.global_ignore),
                walk_root,
            });
        }

        let walk_root = clean_path(&cwd.join(root));
        if escapes(root) {
            return Ok(Self {
                ignore: IgnoreModel::new(&walk_root, &options.global_ignore),
                walk_root,
            });
        }
        let mut ignore = IgnoreModel::new(&cwd, &options.global_ignore);
        ignore.add_scope(&cwd);
        Ok(Self { walk_root, ignore })
    }
}

/// Sub-transactions of one push and the key each one reports on.
#[derive(Debug, Default)]
struct PushPlan {
    ops: Vec<TxnOp>,
    planned: Vec<Planned>,
}

/// Pushes a local tree to `options.prefix`.
///
/// Listing, working directory and walk failures abort the run before any
/// mutation is submitted. A rejected transaction is returned as is; the
/// store applies none of it. The walk runs on the blocking thread pool.
pub async fn push_tree(store: &dyn KvStore, options: &PushOptions) -> EngineResult<PushReport> {
    let prefix = clean_key(&options.prefix);

    let listed = store
        .get(&prefix, GetOptions::prefix().with_keys_only())
        .await?;
    let stale: BTreeSet<String> = listed
        .into_iter()
        .map(|kv| kv.key)
        .filter(|key| !is_hash_key(key) && strip_namespace(&prefix, key).is_some())
        .collect();

    let PushPlan { ops, planned } = tokio::task::spawn_blocking({
        let prefix = prefix.clone();
        let options = options.clone();
        move || plan_push(&prefix, &options, stale)
    })
    .await??;

    let mut report = PushReport::default();
    if ops.is_empty() {
        info!(prefix = %prefix, "nothing to push");
        return Ok(report);
    }

    let response = store.txn(Txn::new().and_then(ops)).await?;
    for (plan, result) in planned.into_iter().zip(&response.responses) {
        let Some(result) = result.as_txn() else {
            continue;
        };
        match plan {
            Planned::Update(key) if !result.succeeded => report.updated.push(key),
            Planned::Remove(key) if result.succeeded => report.removed.push(key),
            _ => {}
        }
    }
    info!(
        prefix = %prefix,
        updated = report.updated.len(),
        removed = report.removed.len(),
        "push complete"
    );
    Ok(report)
}

/// Walks the local tree and builds the guarded sub-transactions.
fn plan_push(
    prefix: &str,
    options: &PushOptions,
    mut stale: BTreeSet<String>,
) -> EngineResult<PushPlan> {
    let Layout {
        walk_root,
        mut ignore,
    } = Layout::resolve(options)?;
    debug!(prefix = %prefix, root = %walk_root.display(), "pushing tree");

    let mut plan = PushPlan::default();

    let mut walk = WalkDir::new(&walk_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walk.next() {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if entry.depth() > 0
                && (IgnoreModel::is_vcs_dir(entry.file_name()) || ignore.is_ignored(path, true))
            {
                walk.skip_current_dir();
                continue;
            }
            ignore.add_scope(path);
            continue;
        }
        if !is_regular_file(path, file_type) {
            debug!(path = %path.display(), "skipping non-regular file");
            continue;
        }
        if IgnoreModel::is_rule_file(entry.file_name()) || ignore.is_ignored(path, false) {
            continue;
        }

        let raw = fs::read(path).map_err(|e| EngineError::io(path, e))?;
        let encoded = encode(&raw)?;
        let rel = path.strip_prefix(&walk_root).unwrap_or(Path::new(""));
        let key = join_key(prefix, &to_key_path(rel));
        let fingerprint_key = hash_key(&key);
        stale.remove(&key);

        plan.ops.push(TxnOp::txn(
            Txn::new()
                .when(vec![
                    Compare::create_revision(&key, CompareOp::NotEqual, 0),
                    Compare::create_revision(&fingerprint_key, CompareOp::NotEqual, 0),
                    Compare::value(
                        &fingerprint_key,
                        CompareOp::Equal,
                        encoded.fingerprint.as_bytes(),
                    ),
                ])
                .or_else(vec![
                    TxnOp::put(&key, encoded.payload),
                    TxnOp::put(&fingerprint_key, encoded.fingerprint.as_bytes()),
                ]),
        ));
        plan.planned.push(Planned::Update(key));
    }

    for key in stale {
        let Some(rest) = strip_namespace(prefix, &key) else {
            continue;
        };
        let local = if rest.is_empty() {
            walk_root.clone()
        } else {
            walk_root.join(rest)
        };
        if ignore.is_ignored(&local, false) {
            debug!(key = %key, path = %local.display(), "keeping key of ignored path");
            continue;
        }
        plan.ops.push(TxnOp::txn(Txn::new().and_then(vec![
            TxnOp::delete(&key),
            TxnOp::delete(hash_key(&key)),
        ])));
        plan.planned.push(Planned::Remove(key));
    }
    Ok(plan)
}

/// Regular files, or symlinks resolving to one. Sockets, pipes and
/// devices are never read.
fn is_regular_file(path: &Path, file_type: fs::FileType) -> bool {
    if file_type.is_symlink() {
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    } else {
        file_type.is_file()
    }
}

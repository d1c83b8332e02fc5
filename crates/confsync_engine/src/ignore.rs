//! Hierarchical gitignore-style filter.
//!
//! An [`IgnoreModel`] combines one optional global rule set with rule
//! pairs discovered per directory while walking a tree. A path is
//! ignored if the global set matches it, or if the rules of any enclosing
//! directory match it, checked from the nearest ancestor up to the root.

use ::ignore::gitignore::{Gitignore, GitignoreBuilder};
use nix::unistd::{Uid, User};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::paths::{clean_path, escapes};

/// Version-control ignore file.
pub const GIT_IGNORE_FILE: &str = ".gitignore";

/// Tool-specific ignore file.
pub const CONF_IGNORE_FILE: &str = ".confignore";

/// Global ignore file, relative to the current user's home directory.
pub const GLOBAL_IGNORE_FILE: &str = ".gitignore_global";

/// Version-control metadata directory, never traversed.
pub const VCS_DIR: &str = ".git";

/// Where the global rule set comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GlobalIgnore {
    /// `~/.gitignore_global` of the current user.
    #[default]
    UserDefault,
    /// An explicit file.
    File(PathBuf),
    /// No global rules.
    Disabled,
}

impl GlobalIgnore {
    /// Resolves the file to load, if any.
    pub fn path(&self) -> Option<PathBuf> {
        match self {
            GlobalIgnore::UserDefault => User::from_uid(Uid::current())
                .ok()
                .flatten()
                .map(|user| user.dir.join(GLOBAL_IGNORE_FILE)),
            GlobalIgnore::File(path) => Some(path.clone()),
            GlobalIgnore::Disabled => None,
        }
    }
}

/// Rules declared in one directory.
#[derive(Debug)]
struct Scope {
    git: Option<Gitignore>,
    conf: Option<Gitignore>,
}

impl Scope {
    fn matches(&self, rel: &Path, is_dir: bool) -> bool {
        [&self.git, &self.conf]
            .into_iter()
            .flatten()
            .any(|rules| rules.matched_path_or_any_parents(rel, is_dir).is_ignore())
    }
}

/// Ignore rules for one synchronization root.
#[derive(Debug)]
pub struct IgnoreModel {
    root: PathBuf,
    global: Option<Gitignore>,
    scopes: HashMap<PathBuf, Scope>,
}

impl IgnoreModel {
    /// Creates a model rooted at `root`, loading the global rule set.
    ///
    /// A global file that is missing or unreadable leaves the model
    /// without global rules.
    pub fn new(root: impl AsRef<Path>, global: &GlobalIgnore) -> Self {
        let root = clean_path(root.as_ref());
        let global = global.path().and_then(|path| load_global(&root, &path));
        Self {
            root,
            global,
            scopes: HashMap::new(),
        }
    }

    /// Returns the synchronization root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the number of directories with recorded rules.
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Returns true if a global rule set was loaded.
    pub fn has_global_rules(&self) -> bool {
        self.global.is_some()
    }

    /// Loads the ignore files of `dir`.
    ///
    /// Returns true if a scope was recorded. Directories without rule
    /// files, and directories outside the root, record nothing.
    pub fn add_scope(&mut self, dir: &Path) -> bool {
        let Some(rel) = self.relative(dir) else {
            return false;
        };
        let scope = Scope {
            git: load_scope_file(&dir.join(GIT_IGNORE_FILE)),
            conf: load_scope_file(&dir.join(CONF_IGNORE_FILE)),
        };
        if scope.git.is_none() && scope.conf.is_none() {
            return false;
        }
        debug!(dir = %dir.display(), "loaded ignore scope");
        self.scopes.insert(rel, scope);
        true
    }

    /// Returns true if `path` is excluded from synchronization.
    ///
    /// `path` is absolute, or relative to the current directory. Paths
    /// outside the root are never ignored.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        if let Some(global) = &self.global {
            if global.matched_path_or_any_parents(&rel, is_dir).is_ignore() {
                return true;
            }
        }
        for ancestor in rel.ancestors().skip(1) {
            let Some(scope) = self.scopes.get(ancestor) else {
                continue;
            };
            let Ok(remainder) = rel.strip_prefix(ancestor) else {
                continue;
            };
            if scope.matches(remainder, is_dir) {
                return true;
            }
        }
        false
    }

    /// Returns true if `name` is one of the per-directory rule files.
    pub fn is_rule_file(name: &OsStr) -> bool {
        name == GIT_IGNORE_FILE || name == CONF_IGNORE_FILE
    }

    /// Returns true if `name` is a version-control metadata directory.
    pub fn is_vcs_dir(name: &OsStr) -> bool {
        name == VCS_DIR
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        let path = clean_path(path);
        let rel = if path.is_absolute() == self.root.is_absolute() {
            if self.root == Path::new(".") {
                path
            } else {
                path.strip_prefix(&self.root).ok()?.to_path_buf()
            }
        } else {
            return None;
        };
        if escapes(&rel) {
            return None;
        }
        if rel == Path::new(".") {
            return Some(PathBuf::new());
        }
        Some(rel)
    }
}

fn load_scope_file(path: &Path) -> Option<Gitignore> {
    if !path.is_file() {
        return None;
    }
    let (rules, err) = Gitignore::new(path);
    match err {
        Some(err) if rules.is_empty() => {
            debug!(path = %path.display(), error = %err, "ignore file did not compile");
            None
        }
        Some(err) => {
            debug!(path = %path.display(), error = %err, "ignore file partially compiled");
            Some(rules)
        }
        None => Some(rules),
    }
}

fn load_global(root: &Path, path: &Path) -> Option<Gitignore> {
    if !path.is_file() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(path) {
        debug!(path = %path.display(), error = %err, "global ignore file did not load");
    }
    match builder.build() {
        Ok(rules) if !rules.is_empty() => Some(rules),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "global ignore file did not compile");
            None
        }
    }
}

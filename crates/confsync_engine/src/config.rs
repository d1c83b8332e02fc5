//! Push and watch configuration.

use std::path::{Path, PathBuf};

use crate::command::ReloadCommand;
use crate::fs::FilePolicy;
use crate::ignore::GlobalIgnore;
use crate::keys::clean_key;
use crate::paths::clean_path;

/// Configuration of one push run.
///
/// # Example
///
/// ```rust
/// use confsync_engine::{GlobalIgnore, PushOptions};
///
/// let options = PushOptions::new("/svc/app")
///     .with_root("conf")
///     .with_global_ignore(GlobalIgnore::Disabled);
/// assert_eq!(options.prefix, "/svc/app");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    /// Key prefix the tree is stored under.
    pub prefix: String,

    /// Directory (or single file) to push. Defaults to the working
    /// directory.
    pub root: Option<PathBuf>,

    /// Directory relative roots are resolved against. Defaults to the
    /// process working directory.
    pub working_dir: Option<PathBuf>,

    /// Source of the global ignore rules.
    pub global_ignore: GlobalIgnore,
}

impl PushOptions {
    /// Creates options pushing the working directory to `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            root: None,
            working_dir: None,
            global_ignore: GlobalIgnore::default(),
        }
    }

    /// Sets the root to push.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the global ignore source.
    pub fn with_global_ignore(mut self, global: GlobalIgnore) -> Self {
        self.global_ignore = global;
        self
    }
}

/// Configuration of one watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Key prefix watched.
    pub prefix: String,
    /// Local directory files are materialized under.
    pub root: PathBuf,
    /// Ownership and permissions of materialized files.
    pub policy: FilePolicy,
    /// Command run after a batch changes files.
    pub command: ReloadCommand,
}

impl SessionConfig {
    /// Creates a session with the default file policy.
    pub fn new(prefix: &str, root: impl AsRef<Path>, command: ReloadCommand) -> Self {
        Self {
            prefix: clean_key(prefix),
            root: clean_path(root.as_ref()),
            policy: FilePolicy::default(),
            command,
        }
    }

    /// Sets the file policy.
    pub fn with_policy(mut self, policy: FilePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_defaults() {
        let options = PushOptions::new("/svc/app");
        assert_eq!(options.root, None);
        assert_eq!(options.working_dir, None);
        assert_eq!(options.global_ignore, GlobalIgnore::UserDefault);
    }

    #[test]
    fn session_normalizes_prefix_and_root() {
        let command = ReloadCommand::resolve("sh", vec![]).unwrap();
        let session = SessionConfig::new("/svc//app/", "/etc/app/./", command)
            .with_policy(FilePolicy::default().with_mode(0o600));
        assert_eq!(session.prefix, "/svc/app");
        assert_eq!(session.root, PathBuf::from("/etc/app"));
        assert_eq!(session.policy.mode, 0o600);
    }
}

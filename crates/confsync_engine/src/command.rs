//! Reload commands.

use std::env;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Command;

use crate::error::{EngineError, EngineResult};

/// A command run after a session changes files.
///
/// The program is resolved once, when the session is defined; a command
/// that cannot be found is a setup error rather than a runtime one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadCommand {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ReloadCommand {
    /// Resolves `name` and binds `args` to it.
    ///
    /// A name containing `/` is used as a path; any other name is looked
    /// up on `PATH`.
    pub fn resolve(name: &str, args: Vec<String>) -> EngineResult<Self> {
        let program =
            find_executable(name).ok_or_else(|| EngineError::CommandNotFound(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            program,
            args,
        })
    }

    /// Name the command was given as, passed as `argv[0]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after `argv[0]`.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Runs the command in `dir`, inheriting environment and stdio, and
    /// waits for it to exit.
    pub async fn run(&self, dir: &Path) -> EngineResult<ExitStatus> {
        Command::new(&self.program)
            .arg0(&self.name)
            .args(&self.args)
            .current_dir(dir)
            .status()
            .await
            .map_err(|e| EngineError::io(&self.program, e))
    }
}

fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let search = env::var_os("PATH").unwrap_or_else(|| OsString::from("/usr/bin:/bin"));
    env::split_paths(&search)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                PathBuf::from(".").join(name)
            } else {
                dir.join(name)
            }
        })
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

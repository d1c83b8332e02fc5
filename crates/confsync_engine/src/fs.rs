//! Crash-safe file materialization and directory lifecycle.
//!
//! Content is staged in a temporary file next to its target and renamed
//! over it, so a reader sees either the old content or the new content and
//! never a partial write.

use nix::unistd::{chown, Gid, Uid};
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Default permission mask for materialized files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Prefix of staging files.
pub const TEMP_PREFIX: &str = ".temp";

/// Ownership and permissions applied to materialized files and the
/// directories created for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePolicy {
    /// Owner, or `None` to keep the process owner.
    pub owner: Option<Uid>,
    /// Group, or `None` to keep the process group.
    pub group: Option<Gid>,
    /// Permission bits of files.
    pub mode: u32,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            owner: None,
            group: None,
            mode: DEFAULT_FILE_MODE,
        }
    }
}

impl FilePolicy {
    /// Sets the permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the owner and group.
    pub fn with_ownership(mut self, owner: Option<Uid>, group: Option<Gid>) -> Self {
        self.owner = owner;
        self.group = group;
        self
    }

    /// Permission bits of created directories: the file mode plus the
    /// search bit of every class that can read.
    pub fn dir_mode(&self) -> u32 {
        let mut mode = self.mode;
        for shift in [0, 3, 6] {
            if mode & (0o4 << shift) != 0 {
                mode |= 0o1 << shift;
            }
        }
        mode
    }

    fn apply(&self, path: &Path, mode: u32) -> EngineResult<()> {
        fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|e| EngineError::io(path, e))?;
        if self.owner.is_some() || self.group.is_some() {
            chown(path, self.owner, self.group)
                .map_err(|e| EngineError::io(path, io::Error::from(e)))?;
        }
        Ok(())
    }
}

/// Outcome of [`materialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// The target already held this content.
    Unchanged,
    /// The target was created or replaced.
    Written,
}

/// Content written to a staging file, not yet visible at its target.
///
/// Dropping a staged write removes the staging file and leaves the target
/// untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Path of the staging file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically renames the staging file over the target.
    pub fn commit(self) -> EngineResult<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| EngineError::io(&target, e.error))?;
        Ok(())
    }
}

/// Writes `content` to `path` unless it already holds exactly that.
///
/// Missing parent directories are created with the policy's directory
/// mode and ownership. A directory at `path`, or a non-directory among its
/// ancestors, is an error.
pub fn materialize(path: &Path, content: &[u8], policy: &FilePolicy) -> EngineResult<Materialized> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Err(EngineError::IsADirectory(path.to_path_buf())),
        Ok(_) => {
            if fs::read(path).is_ok_and(|current| current == content) {
                return Ok(Materialized::Unchanged);
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(EngineError::io(path, e)),
    }

    stage(path, content, policy)?.commit()?;
    debug!(path = %path.display(), "materialized file");
    Ok(Materialized::Written)
}

/// Stages `content` for `path` without replacing it.
pub fn stage(path: &Path, content: &[u8], policy: &FilePolicy) -> EngineResult<StagedWrite> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&dir, policy)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(&dir)
        .map_err(|e| EngineError::io(&dir, e))?;
    temp.write_all(content)
        .map_err(|e| EngineError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| EngineError::io(temp.path(), e))?;
    policy.apply(temp.path(), policy.mode)?;

    Ok(StagedWrite {
        temp,
        target: path.to_path_buf(),
    })
}

/// Creates `dir` and any missing ancestors.
pub fn ensure_dir(dir: &Path, policy: &FilePolicy) -> EngineResult<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(candidate) = current {
        match fs::metadata(candidate) {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => return Err(EngineError::NotADirectory(candidate.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(candidate);
                current = candidate.parent().filter(|p| !p.as_os_str().is_empty());
            }
            Err(e) => return Err(EngineError::io(candidate, e)),
        }
    }

    for created in missing.into_iter().rev() {
        match fs::create_dir(created) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && created.is_dir() => continue,
            Err(e) => return Err(EngineError::io(created, e)),
        }
        policy.apply(created, policy.dir_mode())?;
        debug!(path = %created.display(), "created directory");
    }
    Ok(())
}

/// Removes `path`, then every ancestor directory left empty, up to but
/// not including `root`.
///
/// Pruning stops at the first ancestor that is not empty or is already
/// gone. Returns the pruned directories, nearest first.
pub fn remove_file_and_prune(root: &Path, path: &Path) -> EngineResult<Vec<PathBuf>> {
    fs::remove_file(path).map_err(|e| EngineError::io(path, e))?;

    let mut pruned = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let empty = match fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cannot inspect directory");
                break;
            }
        };
        if !empty {
            break;
        }
        if let Err(e) = fs::remove_dir(dir) {
            warn!(path = %dir.display(), error = %e, "cannot remove empty directory");
            break;
        }
        debug!(path = %dir.display(), "pruned empty directory");
        pruned.push(dir.to_path_buf());
        current = dir.parent();
    }
    Ok(pruned)
}

//! Lexical path helpers.

use std::path::{Component, Path, PathBuf};

/// Normalizes a path without touching the filesystem.
///
/// `.` components disappear and `..` pops the previous normal component.
/// Leading `..` components of a relative path are kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Returns true if a relative path climbs above its starting directory.
pub fn escapes(rel: &Path) -> bool {
    matches!(clean_path(rel).components().next(), Some(Component::ParentDir))
}

/// Renders a relative path with `/` separators, the form used in keys.
pub fn to_key_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_is_lexical() {
        assert_eq!(clean_path(Path::new("/etc/./app/../web")), PathBuf::from("/etc/web"));
        assert_eq!(clean_path(Path::new("a/b/../../..")), PathBuf::from(".."));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
        assert_eq!(clean_path(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn escaping_paths() {
        assert!(escapes(Path::new("../conf")));
        assert!(escapes(Path::new("sub/../../conf")));
        assert!(!escapes(Path::new("sub/conf")));
        assert!(!escapes(Path::new(".")));
    }

    #[test]
    fn key_paths_use_slashes() {
        assert_eq!(to_key_path(Path::new("sub/b.txt")), "sub/b.txt");
        assert_eq!(to_key_path(Path::new("")), "");
    }
}

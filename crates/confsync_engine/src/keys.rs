//! Key layout.
//!
//! A file at `<root>/<rel>` lives under two keys:
//!
//! ```text
//! <prefix>/<rel>          compressed content
//! <prefix>/<rel>/.hash    hex fingerprint of the raw content
//! ```
//!
//! The two keys are always written and deleted together.

/// Last path component of a fingerprint companion key.
pub const HASH_SUFFIX: &str = ".hash";

/// Returns the fingerprint companion key of `key`.
pub fn hash_key(key: &str) -> String {
    format!("{}/{}", key.trim_end_matches('/'), HASH_SUFFIX)
}

/// Returns true if `key` is a fingerprint companion key.
pub fn is_hash_key(key: &str) -> bool {
    key.rsplit('/').next() == Some(HASH_SUFFIX)
}

/// Cleans a slash-separated key the way `path.Join` would: repeated and
/// trailing slashes collapse, `.` disappears and `..` pops a component.
/// A leading slash is kept.
pub fn clean_key(key: &str) -> String {
    let absolute = key.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in key.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Joins a prefix and a slash-separated relative path into a key.
///
/// An empty relative path yields the prefix itself.
pub fn join_key(prefix: &str, rel: &str) -> String {
    if rel.is_empty() {
        clean_key(prefix)
    } else {
        clean_key(&format!("{prefix}/{rel}"))
    }
}

/// Strips `prefix` from `key` at a path boundary.
///
/// Returns `""` when `key` equals the prefix and `None` for keys outside
/// the prefix's namespace (`/svc/apple` is not under `/svc/app`).
pub fn strip_namespace<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let base = prefix.trim_end_matches('/');
    if key == base || key == prefix {
        return Some("");
    }
    key.strip_prefix(base)?.strip_prefix('/')
}

/// Maps a store key to a path relative to a watch root.
///
/// - a key equal to the prefix maps to the prefix's last component
/// - fingerprint companion keys and keys outside the prefix map to `None`
/// - keys whose remainder would climb out of the root map to `None`
pub fn relative_key(prefix: &str, key: &str) -> Option<String> {
    let rest = strip_namespace(prefix, key)?;
    if rest.is_empty() {
        let base = prefix.trim_end_matches('/').rsplit('/').next()?;
        return (!base.is_empty() && base != "..").then(|| base.to_string());
    }
    let parts: Vec<&str> = rest
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() || parts.contains(&"..") || parts.last() == Some(&HASH_SUFFIX) {
        return None;
    }
    Some(parts.join("/"))
}

//! Watch session definitions.
//!
//! The `watch` command takes one or more definitions separated by `--`:
//!
//! ```text
//! <prefix> <root>[:owner[:group[:mode]]] <command> [args...] [-- ...]
//! ```

use nix::unistd::{Gid, Group, Uid, User};
use std::path::PathBuf;

use crate::command::ReloadCommand;
use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult};
use crate::fs::FilePolicy;
use crate::keys::clean_key;

/// Separator between definitions.
pub const DEFINITION_SEPARATOR: &str = "--";

/// Parses `root[:owner[:group[:mode]]]`.
///
/// - owner and group are names or numeric ids
/// - an empty owner means the current user
/// - an owner without a group uses the owner's primary group
/// - mode is octal, at most `7777`
pub fn parse_root_spec(spec: &str) -> EngineResult<(PathBuf, FilePolicy)> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() > 4 || parts[0].is_empty() {
        return Err(EngineError::InvalidRoot(spec.to_string()));
    }
    let root = PathBuf::from(parts[0]);
    let mut policy = FilePolicy::default();

    if let Some(mode) = parts.get(3).filter(|m| !m.is_empty()) {
        policy.mode = parse_mode(mode)?;
    }
    if let Some(group) = parts.get(2).filter(|g| !g.is_empty()) {
        policy.group = Some(lookup_group(group)?);
    }
    if let Some(owner) = parts.get(1) {
        let user = if owner.is_empty() {
            User::from_uid(Uid::current())
                .ok()
                .flatten()
                .ok_or_else(|| EngineError::UnknownUser(Uid::current().to_string()))?
        } else {
            lookup_user(owner)?
        };
        policy.owner = Some(user.uid);
        if policy.group.is_none() {
            policy.group = Some(user.gid);
        }
    }
    Ok((root, policy))
}

/// Parses definitions into session configurations.
///
/// Each session prefix is `/<common_prefix>/<prefix>`, normalized. Reload
/// commands are resolved here, so a missing binary fails at startup.
pub fn parse_watch_definitions(
    args: &[String],
    common_prefix: &str,
) -> EngineResult<Vec<SessionConfig>> {
    let args = match args.first() {
        Some(first) if first == DEFINITION_SEPARATOR => &args[1..],
        _ => args,
    };
    if args.is_empty() {
        return Err(EngineError::InvalidDefinition(
            "no watcher definitions given".to_string(),
        ));
    }

    args.split(|arg| arg == DEFINITION_SEPARATOR)
        .map(|group| parse_definition(group, common_prefix))
        .collect()
}

fn parse_definition(group: &[String], common_prefix: &str) -> EngineResult<SessionConfig> {
    let (prefix, root_spec, command, command_args) = match group {
        [] => {
            return Err(EngineError::InvalidDefinition(
                "empty watcher definition".to_string(),
            ))
        }
        [prefix] => {
            return Err(EngineError::InvalidDefinition(format!(
                "watcher root directory missing for prefix {prefix}"
            )))
        }
        [prefix, _] => {
            return Err(EngineError::InvalidDefinition(format!(
                "watcher command missing for prefix {prefix}"
            )))
        }
        [prefix, root, command, rest @ ..] => (prefix, root, command, rest),
    };

    let (root, policy) = parse_root_spec(root_spec)?;
    let command = ReloadCommand::resolve(command, command_args.to_vec())?;
    let prefix = clean_key(&format!("/{common_prefix}/{prefix}"));
    Ok(SessionConfig::new(&prefix, root, command).with_policy(policy))
}

fn parse_mode(mode: &str) -> EngineResult<u32> {
    match u32::from_str_radix(mode, 8) {
        Ok(bits) if bits <= 0o7777 => Ok(bits),
        _ => Err(EngineError::InvalidMode(mode.to_string())),
    }
}

fn lookup_user(spec: &str) -> EngineResult<User> {
    let by_name = User::from_name(spec).ok().flatten();
    let by_id = || {
        spec.parse::<u32>()
            .ok()
            .and_then(|id| User::from_uid(Uid::from_raw(id)).ok().flatten())
    };
    by_name
        .or_else(by_id)
        .ok_or_else(|| EngineError::UnknownUser(spec.to_string()))
}

fn lookup_group(spec: &str) -> EngineResult<Gid> {
    let by_name = Group::from_name(spec).ok().flatten().map(|g| g.gid);
    let by_id = || {
        spec.parse::<u32>()
            .ok()
            .and_then(|id| Group::from_gid(Gid::from_raw(id)).ok().flatten())
            .map(|g| g.gid)
    };
    by_name
        .or_else(by_id)
        .ok_or_else(|| EngineError::UnknownGroup(spec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn bare_root_keeps_defaults() {
        let (root, policy) = parse_root_spec("/etc/app").unwrap();
        assert_eq!(root, Path::new("/etc/app"));
        assert_eq!(policy, FilePolicy::default());
    }

    #[test]
    fn empty_owner_is_current_user() {
        let (_, policy) = parse_root_spec("/etc/app::").unwrap();
        assert_eq!(policy.owner, Some(Uid::current()));
        assert!(policy.group.is_some());
    }

    #[test]
    fn numeric_owner_and_group_and_mode() {
        let (_, policy) = parse_root_spec("/etc/app:0:0:0600").unwrap();
        assert_eq!(policy.owner, Some(Uid::from_raw(0)));
        assert_eq!(policy.group, Some(Gid::from_raw(0)));
        assert_eq!(policy.mode, 0o600);
    }

    #[test]
    fn named_owner_uses_primary_group() {
        let (_, policy) = parse_root_spec("/etc/app:root").unwrap();
        assert_eq!(policy.owner, Some(Uid::from_raw(0)));
        assert_eq!(policy.group, Some(Gid::from_raw(0)));
    }

    #[test]
    fn malformed_roots_are_rejected() {
        assert!(matches!(
            parse_root_spec("/etc/app:a:b:0644:extra"),
            Err(EngineError::InvalidRoot(_))
        ));
        assert!(matches!(parse_root_spec(":root"), Err(EngineError::InvalidRoot(_))));
        assert!(matches!(
            parse_root_spec("/etc/app:::0999"),
            Err(EngineError::InvalidMode(_))
        ));
        assert!(matches!(
            parse_root_spec("/etc/app:::17777"),
            Err(EngineError::InvalidMode(_))
        ));
        assert!(matches!(
            parse_root_spec("/etc/app:confsync-no-such-user"),
            Err(EngineError::UnknownUser(_))
        ));
        assert!(matches!(
            parse_root_spec("/etc/app::confsync-no-such-group"),
            Err(EngineError::UnknownGroup(_))
        ));
    }

    #[test]
    fn splits_definitions_on_separator() {
        let sessions = parse_watch_definitions(
            &args(&[
                "app", "/etc/app", "sh", "-c", "true", "--", "web/", "/etc/web:::0640", "sh",
            ]),
            "cluster",
        )
        .unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].prefix, "/cluster/app");
        assert_eq!(sessions[0].root, Path::new("/etc/app"));
        assert_eq!(sessions[0].command.args(), ["-c", "true"]);
        assert_eq!(sessions[1].prefix, "/cluster/web");
        assert_eq!(sessions[1].policy.mode, 0o640);
        assert!(sessions[1].command.args().is_empty());
    }

    #[test]
    fn leading_separator_is_skipped() {
        let sessions =
            parse_watch_definitions(&args(&["--", "app", "/etc/app", "sh"]), "").unwrap();
        assert_eq!(sessions[0].prefix, "/app");
    }

    #[test]
    fn incomplete_definitions_are_rejected() {
        for words in [
            &[][..],
            &["app"][..],
            &["app", "/etc/app"][..],
            &["app", "/etc/app", "sh", "--"][..],
        ] {
            assert!(matches!(
                parse_watch_definitions(&args(words), ""),
                Err(EngineError::InvalidDefinition(_))
            ));
        }
    }

    #[test]
    fn missing_command_binary_fails_at_parse() {
        let err = parse_watch_definitions(
            &args(&["app", "/etc/app", "confsync-no-such-command"]),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CommandNotFound(_)));
    }
}

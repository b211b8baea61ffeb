//! Best-effort translation of a Function's permission set into sandbox
//! controls around the handler subprocess. This is a cooperative sandbox,
//! not a security boundary: it restricts a well-behaved child, it does not
//! defend against a malicious one.

use edgerun_core::Permissions;

/// Applies the `read`/`write` allow-lists to the child process via Landlock
/// before it execs into the runtime command. Linux only; a no-op elsewhere.
#[cfg(target_os = "linux")]
pub fn restrict_child_filesystem(permissions: &Permissions) {
    use landlock::{path_beneath_rules, Access, AccessFs, RulesetAttr, RulesetCreatedAttr, ABI};

    let abi = ABI::V1;
    let access_read = AccessFs::from_read(abi);
    let access_write = AccessFs::from_write(abi);

    // No early return on empty allow-lists: `restrict_self()` denies anything
    // not covered by a rule once `handle_access` is engaged, so an empty
    // read/write permission set must still install the ruleset to get the
    // deny-by-default behavior the permission model documents.
    let ruleset = landlock::Ruleset::default();
    let result = ruleset
        .handle_access(access_read.union(access_write))
        .and_then(|r| r.create())
        .and_then(|r| r.add_rules(path_beneath_rules(&permissions.read, access_read)))
        .and_then(|r| r.add_rules(path_beneath_rules(&permissions.write, access_write)))
        .and_then(|r| r.restrict_self());

    if let Err(err) = result {
        tracing::warn!(?err, "landlock restriction failed for sandbox child; continuing unsandboxed");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn restrict_child_filesystem(_permissions: &Permissions) {}

/// Strips the child's environment down to the `env` allow-list.
pub fn allowed_env_vars(permissions: &Permissions) -> Vec<(String, String)> {
    permissions
        .env
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
        .collect()
}

/// JSON-encodes the `run` allow-list for the harness to read out of its own
/// environment. Unlike `read`/`write`/`env`, this permission is not
/// enforceable by the host OS around the child process itself: the
/// executor only spawns the Node.js harness, not the subcommands a handler
/// might ask the harness to run on its behalf, so the allow-list has to be
/// handed to the harness and checked there.
pub fn run_allowlist_json(permissions: &Permissions) -> String {
    serde_json::to_string(&permissions.run).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_env_vars_only_passes_listed_names() {
        std::env::set_var("EDGERUN_TEST_ALLOWED", "value");
        std::env::set_var("EDGERUN_TEST_DENIED", "secret");

        let permissions = Permissions {
            env: vec!["EDGERUN_TEST_ALLOWED".to_string()],
            ..Default::default()
        };

        let vars = allowed_env_vars(&permissions);
        assert_eq!(vars, vec![("EDGERUN_TEST_ALLOWED".to_string(), "value".to_string())]);
    }

    #[test]
    fn run_allowlist_json_encodes_subcommands() {
        let permissions = Permissions {
            run: vec!["git".to_string(), "ls".to_string()],
            ..Default::default()
        };
        assert_eq!(run_allowlist_json(&permissions), r#"["git","ls"]"#);
    }

    #[test]
    fn run_allowlist_json_empty_by_default() {
        assert_eq!(run_allowlist_json(&Permissions::default()), "[]");
    }
}

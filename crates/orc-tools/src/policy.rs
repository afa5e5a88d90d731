//! Command whitelist/blacklist and filesystem jail.
//!
//! Grounded exactly in `tool_executor.py`'s `_validate_bash_command` and
//! `_is_path_allowed`: a fixed `dangerous_commands` set is always blocked; a
//! `safe_bash_commands` whitelist is additionally enforced when `safe_mode`
//! is on; and a small set of shell metacharacters is rejected as command
//! chaining, with an exception for piping into a handful of read-only
//! filter commands.

use std::path::{Path, PathBuf};

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "format", "fdisk", "chmod", "chown", "sudo", "su", "kill",
    "killall", "reboot", "shutdown", "halt", "systemctl", "service",
];

const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "pwd", "echo", "grep", "find", "wc", "head", "tail", "mkdir", "touch", "cp",
    "mv", "python", "python3", "pip", "git", "node", "npm", "pytest", "test", "diff", "sort",
    "uniq", "sed", "awk",
];

const DANGEROUS_PATTERNS: &[&str] = &[";", "&&", "||", "|", ">", ">>", "<"];

/// Commands it's safe to pipe *into* — read-only filters that narrow output
/// rather than execute or redirect anything.
const PIPE_SAFE_TARGETS: &[&str] = &["grep", "wc", "sort", "head", "tail"];

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    pub safe_mode: bool,
}

impl CommandPolicy {
    pub fn new(safe_mode: bool) -> Self {
        Self { safe_mode }
    }

    /// Returns `Err(reason)` if the command is blocked.
    pub fn validate(&self, command: &str) -> Result<(), String> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err("empty command".to_string());
        }

        let first_token = trimmed.split_whitespace().next().unwrap_or("");
        let basename = first_token.rsplit('/').next().unwrap_or(first_token);

        if DANGEROUS_COMMANDS.contains(&basename) {
            return Err(format!("'{}' is a blocked command", basename));
        }
        if self.safe_mode && !SAFE_COMMANDS.contains(&basename) {
            return Err(format!("'{}' is not in the safe command whitelist", basename));
        }

        if self.safe_mode {
            for pattern in DANGEROUS_PATTERNS {
                if !trimmed.contains(pattern) {
                    continue;
                }
                if *pattern == "|" && pipe_targets_are_safe(trimmed) {
                    continue;
                }
                return Err(format!("command chaining via '{}' is not allowed", pattern));
            }
        }

        Ok(())
    }
}

fn pipe_targets_are_safe(command: &str) -> bool {
    let mut segments = command.split('|');
    segments.next(); // the command before the first pipe isn't a pipe target
    segments.all(|segment| {
        let token = segment.trim().split_whitespace().next().unwrap_or("");
        let basename = token.rsplit('/').next().unwrap_or(token);
        PIPE_SAFE_TARGETS.contains(&basename)
    })
}

/// Restricts filesystem operations to a configured set of directories. An
/// empty allow-list means no jail is configured and every path is allowed,
/// matching the original's behavior.
#[derive(Debug, Clone, Default)]
pub struct PathJail {
    allowed: Vec<PathBuf>,
}

impl PathJail {
    pub fn new(allowed: Vec<PathBuf>) -> Self {
        Self { allowed }
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        let resolved = resolve_best_effort(path);
        self.allowed.iter().any(|dir| {
            let dir = resolve_best_effort(dir);
            resolved == dir || resolved.starts_with(&dir)
        })
    }
}

/// Canonicalize the path if it exists; otherwise canonicalize its nearest
/// existing ancestor and rejoin the remaining components, so a not-yet-
/// written file can still be checked against the jail.
fn resolve_best_effort(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    let mut ancestor = path;
    let mut tail = Vec::new();
    loop {
        match ancestor.parent() {
            Some(parent) => {
                if let Some(name) = ancestor.file_name() {
                    tail.push(name.to_owned());
                }
                ancestor = parent;
                if let Ok(resolved) = ancestor.canonicalize() {
                    let mut result = resolved;
                    for component in tail.into_iter().rev() {
                        result.push(component);
                    }
                    return result;
                }
            }
            None => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangerous_commands_always_blocked() {
        let policy = CommandPolicy::new(false);
        assert!(policy.validate("rm -rf /tmp/x").is_err());
        assert!(policy.validate("sudo ls").is_err());
    }

    #[test]
    fn safe_mode_enforces_whitelist() {
        let policy = CommandPolicy::new(true);
        assert!(policy.validate("ls -la").is_ok());
        assert!(policy.validate("curl http://evil").is_err());
    }

    #[test]
    fn non_safe_mode_allows_non_whitelisted_non_dangerous_commands() {
        let policy = CommandPolicy::new(false);
        assert!(policy.validate("curl http://example.com").is_ok());
    }

    #[test]
    fn empty_command_is_blocked_regardless_of_safe_mode() {
        let err = CommandPolicy::new(false).validate("").unwrap_err();
        assert!(err.contains("empty"));
        let err = CommandPolicy::new(false).validate("   ").unwrap_err();
        assert!(err.contains("empty"));
        assert!(CommandPolicy::new(true).validate("").is_err());
    }

    #[test]
    fn non_safe_mode_allows_chaining_and_redirection() {
        let policy = CommandPolicy::new(false);
        assert!(policy.validate("echo hi > out.txt").is_ok());
        assert!(policy.validate("find . | grep x | sort").is_ok());
        assert!(policy.validate("ls && echo done").is_ok());
    }

    #[test]
    fn chaining_is_blocked() {
        let policy = CommandPolicy::new(true);
        assert!(policy.validate("ls && rm -rf /").is_err());
        assert!(policy.validate("echo hi > /etc/passwd").is_err());
        assert!(policy.validate("ls; cat /etc/shadow").is_err());
    }

    #[test]
    fn pipe_into_safe_filter_is_allowed() {
        let policy = CommandPolicy::new(true);
        assert!(policy.validate("cat file.txt | grep foo").is_ok());
        assert!(policy.validate("ls | head -n 5 | sort").is_ok());
    }

    #[test]
    fn pipe_into_unsafe_target_is_blocked() {
        let policy = CommandPolicy::new(true);
        assert!(policy.validate("cat file.txt | sh").is_err());
    }

    #[test]
    fn empty_allowlist_permits_everything() {
        let jail = PathJail::default();
        assert!(jail.is_allowed(Path::new("/anything/at/all")));
    }

    #[test]
    fn jail_allows_descendants_of_allowed_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        let jail = PathJail::new(vec![tmp.path().to_path_buf()]);
        assert!(jail.is_allowed(&sub));
        assert!(jail.is_allowed(&sub.join("not_yet_written.txt")));
    }

    #[test]
    fn jail_rejects_paths_outside_allowed_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let jail = PathJail::new(vec![tmp.path().to_path_buf()]);
        assert!(!jail.is_allowed(Path::new("/etc/passwd")));
    }
}

//! ToolExecutor — the five sandboxed operations a workflow step can invoke.
//!
//! One operation per public method, matching `tool_executor.py`'s class
//! shape rather than a pluggable `Tool` trait registry: the set of
//! operations is fixed at compile time, not extensible by an LLM's tool list.

use crate::error::{ToolError, ToolResult};
use crate::policy::{CommandPolicy, PathJail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a command or script execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i32>,
    pub error_message: Option<String>,
    pub execution_time_ms: u128,
}

impl ExecutionResult {
    fn failed(error_message: impl Into<String>, execution_time_ms: u128) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            error_message: Some(error_message.into()),
            execution_time_ms,
        }
    }
}

/// One entry in a `list_files` result.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_file: bool,
    pub is_dir: bool,
    pub size: u64,
}

pub struct ToolExecutor {
    policy: CommandPolicy,
    jail: PathJail,
    timeout_seconds: u64,
    code_execution_timeout: u64,
    max_file_size_kb: u64,
    script_interpreter: String,
    allow_file_read: bool,
    allow_file_write: bool,
}

impl ToolExecutor {
    pub fn new(
        allowed_directories: Vec<PathBuf>,
        safe_mode: bool,
        timeout_seconds: u64,
        code_execution_timeout: u64,
        max_file_size_kb: u64,
        script_interpreter: impl Into<String>,
    ) -> Self {
        Self::with_file_permissions(
            allowed_directories,
            safe_mode,
            timeout_seconds,
            code_execution_timeout,
            max_file_size_kb,
            script_interpreter,
            true,
            true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_file_permissions(
        allowed_directories: Vec<PathBuf>,
        safe_mode: bool,
        timeout_seconds: u64,
        code_execution_timeout: u64,
        max_file_size_kb: u64,
        script_interpreter: impl Into<String>,
        allow_file_read: bool,
        allow_file_write: bool,
    ) -> Self {
        Self {
            policy: CommandPolicy::new(safe_mode),
            jail: PathJail::new(allowed_directories),
            timeout_seconds,
            code_execution_timeout,
            max_file_size_kb,
            script_interpreter: script_interpreter.into(),
            allow_file_read,
            allow_file_write,
        }
    }

    /// Run a shell command, subject to the command policy and a timeout.
    pub async fn execute_bash(
        &self,
        command: &str,
        timeout_override: Option<u64>,
        cancel: Option<CancellationToken>,
    ) -> ExecutionResult {
        if let Err(reason) = self.policy.validate(command) {
            return ExecutionResult::failed(reason, 0);
        }
        let timeout = Duration::from_secs(timeout_override.unwrap_or(self.timeout_seconds));
        self.run_shell(command, timeout, cancel).await
    }

    /// Run a script through the configured interpreter. Unlike `execute_bash`
    /// this does not go through the command whitelist/blacklist — the
    /// script's own path is checked against the filesystem jail instead.
    pub async fn execute_script(
        &self,
        script_path: &Path,
        timeout_override: Option<u64>,
        cancel: Option<CancellationToken>,
    ) -> ExecutionResult {
        if !self.jail.is_allowed(script_path) {
            return ExecutionResult::failed(
                format!("path '{}' is outside the allowed directories", script_path.display()),
                0,
            );
        }
        let timeout = Duration::from_secs(timeout_override.unwrap_or(self.code_execution_timeout));
        let command = format!(
            "{} {}",
            self.script_interpreter,
            script_path.display()
        );
        self.run_shell(&command, timeout, cancel).await
    }

    async fn run_shell(
        &self,
        command: &str,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> ExecutionResult {
        debug!(%command, "executing shell command");
        let start = Instant::now();

        let mut child = match Command::new("bash")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ExecutionResult::failed(format!("failed to spawn: {e}"), start.elapsed().as_millis()),
        };

        let cancel = cancel.unwrap_or_default();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                ExecutionResult::failed("cancelled", start.elapsed().as_millis())
            }
            outcome = tokio::time::timeout(timeout, child.wait_with_output()) => {
                match outcome {
                    Ok(Ok(output)) => ExecutionResult {
                        success: output.status.success(),
                        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                        return_code: output.status.code(),
                        error_message: None,
                        execution_time_ms: start.elapsed().as_millis(),
                    },
                    Ok(Err(e)) => ExecutionResult::failed(format!("wait failed: {e}"), start.elapsed().as_millis()),
                    Err(_) => ExecutionResult::failed(
                        format!("command timed out after {}s", timeout.as_secs()),
                        start.elapsed().as_millis(),
                    ),
                }
            }
        }
    }

    /// Read a file, subject to the jail and the size cap. Invalid UTF-8
    /// bytes are replaced with the standard replacement character rather
    /// than raising — decode errors never abort a read.
    pub async fn read_file(&self, path: &Path) -> ToolResult<String> {
        if !self.allow_file_read {
            return Err(ToolError::ReadDisabled);
        }
        if !self.jail.is_allowed(path) {
            return Err(ToolError::PathNotAllowed(path.display().to_string()));
        }
        let metadata = tokio::fs::metadata(path).await.map_err(|_| {
            ToolError::NotFound(path.display().to_string())
        })?;
        let size_kb = metadata.len() / 1024;
        if size_kb > self.max_file_size_kb {
            return Err(ToolError::FileTooLarge { size_kb, limit_kb: self.max_file_size_kb });
        }
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a file, creating parent directories as needed. Refuses to
    /// overwrite an existing file unless `overwrite` is set and refuses
    /// content over the configured size cap.
    pub async fn write_file(&self, path: &Path, content: &str, overwrite: bool) -> ToolResult<()> {
        if !self.allow_file_write {
            return Err(ToolError::WriteDisabled);
        }
        if !self.jail.is_allowed(path) {
            return Err(ToolError::PathNotAllowed(path.display().to_string()));
        }
        let size_kb = content.len() as u64 / 1024;
        if size_kb > self.max_file_size_kb {
            return Err(ToolError::FileTooLarge { size_kb, limit_kb: self.max_file_size_kb });
        }
        if !overwrite && tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ToolError::FileExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// List entries matching a glob pattern (default `*`), sorted by name
    /// for deterministic output. Mirrors `Path.glob(pattern)`: a plain
    /// pattern lists immediate children only, a pattern containing `**`
    /// walks the whole subtree.
    pub async fn list_files(&self, dir: &Path, pattern: Option<&str>) -> ToolResult<Vec<FileInfo>> {
        if !self.allow_file_read {
            return Err(ToolError::ReadDisabled);
        }
        if !self.jail.is_allowed(dir) {
            return Err(ToolError::PathNotAllowed(dir.display().to_string()));
        }
        let pattern = pattern.unwrap_or("*").to_string();
        let dir = dir.to_path_buf();

        let matcher = globset::GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ToolError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?
            .compile_matcher();
        let recursive = pattern.contains("**");

        let mut walker = walkdir::WalkDir::new(&dir).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut results = Vec::new();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
            if !matcher.is_match(rel) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| ToolError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            results.push(FileInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path().display().to_string(),
                is_file: metadata.is_file(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(root: &Path) -> ToolExecutor {
        ToolExecutor::new(vec![root.to_path_buf()], true, 5, 5, 1024, "python3")
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        let file = tmp.path().join("out.txt");
        exec.write_file(&file, "hello", false).await.unwrap();
        assert_eq!(exec.read_file(&file).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_refuses_overwrite_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        let file = tmp.path().join("out.txt");
        exec.write_file(&file, "a", false).await.unwrap();
        let err = exec.write_file(&file, "b", false).await.unwrap_err();
        assert!(matches!(err, ToolError::FileExists(_)));
    }

    #[tokio::test]
    async fn write_overwrite_true_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        let file = tmp.path().join("out.txt");
        exec.write_file(&file, "a", false).await.unwrap();
        exec.write_file(&file, "b", true).await.unwrap();
        assert_eq!(exec.read_file(&file).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn write_rejects_content_over_size_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ToolExecutor::new(vec![tmp.path().to_path_buf()], true, 5, 5, 1, "python3");
        let file = tmp.path().join("big.txt");
        let content = "x".repeat(2048);
        let err = exec.write_file(&file, &content, false).await.unwrap_err();
        assert!(matches!(err, ToolError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn read_disabled_rejects_regardless_of_jail() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ToolExecutor::with_file_permissions(
            vec![tmp.path().to_path_buf()],
            true,
            5,
            5,
            1024,
            "python3",
            false,
            true,
        );
        let file = tmp.path().join("in_jail.txt");
        tokio::fs::write(&file, "hi").await.unwrap();
        let err = exec.read_file(&file).await.unwrap_err();
        assert!(matches!(err, ToolError::ReadDisabled));
    }

    #[tokio::test]
    async fn write_disabled_rejects_regardless_of_jail() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ToolExecutor::with_file_permissions(
            vec![tmp.path().to_path_buf()],
            true,
            5,
            5,
            1024,
            "python3",
            true,
            false,
        );
        let file = tmp.path().join("out.txt");
        let err = exec.write_file(&file, "hi", true).await.unwrap_err();
        assert!(matches!(err, ToolError::WriteDisabled));
    }

    #[tokio::test]
    async fn read_rejects_path_outside_jail() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        let err = exec.read_file(Path::new("/etc/hostname")).await.unwrap_err();
        assert!(matches!(err, ToolError::PathNotAllowed(_)));
        assert!(err.to_string().contains("allowed directories"));
    }

    #[tokio::test]
    async fn execute_bash_runs_whitelisted_command() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        let result = exec.execute_bash("echo hi", None, None).await;
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn execute_bash_blocks_dangerous_command() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        let result = exec.execute_bash("rm -rf /", None, None).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn execute_bash_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = ToolExecutor::new(vec![tmp.path().to_path_buf()], false, 1, 1, 1024, "python3");
        let result = exec.execute_bash("sleep 5", Some(1), None).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn list_files_is_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        tokio::fs::write(tmp.path().join("b.txt"), "").await.unwrap();
        tokio::fs::write(tmp.path().join("a.txt"), "").await.unwrap();
        tokio::fs::write(tmp.path().join("c.log"), "").await.unwrap();
        let files = exec.list_files(tmp.path(), Some("*.txt")).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn list_files_non_recursive_pattern_skips_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        tokio::fs::create_dir(tmp.path().join("sub")).await.unwrap();
        tokio::fs::write(tmp.path().join("sub/nested.txt"), "").await.unwrap();
        tokio::fs::write(tmp.path().join("top.txt"), "").await.unwrap();
        let files = exec.list_files(tmp.path(), Some("*.txt")).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["top.txt"]);
    }

    #[tokio::test]
    async fn list_files_recursive_pattern_walks_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = executor(tmp.path());
        tokio::fs::create_dir(tmp.path().join("sub")).await.unwrap();
        tokio::fs::write(tmp.path().join("sub/nested.txt"), "").await.unwrap();
        tokio::fs::write(tmp.path().join("top.txt"), "").await.unwrap();
        let files = exec.list_files(tmp.path(), Some("**/*.txt")).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["nested.txt", "top.txt"]);
    }
}

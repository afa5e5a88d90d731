//! WorkflowEngine — executes an approved, validated `Plan` in topological
//! order against a `ToolExecutor`, checkpointing file-tool targets so a
//! failed run can roll back.
//!
//! Grounded exactly in `workflow_engine.py`'s `WorkflowEngine.execute`: the
//! per-step retry/backoff, the checkpoint-then-dispatch ordering, and the
//! reverse-iteration rollback are all taken from its control flow.

use crate::checkpoint::Checkpoint;
use crate::error::WorkflowError;
use crate::plan::{Plan, StepStatus};
use chrono::{DateTime, Utc};
use orc_tools::ToolExecutor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Running,
    Completed,
    Failed,
    RolledBack,
    Paused,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub step_id: String,
    pub status: String,
    pub message: String,
}

/// On-disk shape for `save_state`/`load_state`. Checkpoints are not part of
/// the persisted state — reloading resumes status/log bookkeeping only, it
/// does not restore live rollback capability.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedState {
    plan: Plan,
    status: EngineStatus,
    summary: String,
    log: Vec<LogEntry>,
}

/// Invoked with `(step_id, status_string, human_message)` on every state
/// transition, mirroring the original's progress callback.
pub trait ProgressCallback: Fn(&str, &str, &str) + Send + Sync {}
impl<T: Fn(&str, &str, &str) + Send + Sync> ProgressCallback for T {}

pub struct WorkflowEngine {
    tool_executor: Arc<ToolExecutor>,
    checkpoint_dir: PathBuf,
    status: std::sync::Mutex<EngineStatus>,
    log: std::sync::Mutex<Vec<LogEntry>>,
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
}

impl WorkflowEngine {
    pub fn new(tool_executor: Arc<ToolExecutor>, checkpoint_dir: PathBuf) -> Self {
        Self {
            tool_executor,
            checkpoint_dir,
            status: std::sync::Mutex::new(EngineStatus::Idle),
            log: std::sync::Mutex::new(Vec::new()),
            cancel_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock().unwrap()
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.log.lock().unwrap().clone()
    }

    /// Sets a cooperative flag observed at the next between-step boundary.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Clears the pause flag; callers re-enter `execute` with the same plan
    /// to resume from the next PENDING step.
    pub fn resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
    }

    /// Runs `plan` to completion, failure, or a pause/cancel boundary.
    /// Requires `plan.validate()` to pass and `plan.approved` to be set;
    /// neither precondition failure mutates the plan or any checkpoint.
    pub async fn execute(
        &self,
        plan: &mut Plan,
        auto_rollback: bool,
        stop_on_error: bool,
        progress: &(dyn ProgressCallback),
    ) -> (bool, String) {
        if let Err(e) = plan.validate() {
            return (false, format!("validation failed: {e}"));
        }
        if !plan.approved {
            return (false, "plan not approved".to_string());
        }

        let order = match plan.execution_order() {
            Ok(order) => order,
            Err(e) => return (false, format!("validation failed: {e}")),
        };

        *self.status.lock().unwrap() = EngineStatus::Running;
        self.cancel_requested.store(false, Ordering::SeqCst);

        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut completed = 0usize;
        let started = std::time::Instant::now();
        let total = order.len();

        for step_id in &order {
            if self.pause_requested.load(Ordering::SeqCst) {
                *self.status.lock().unwrap() = EngineStatus::Paused;
                return (false, "paused".to_string());
            }
            if self.cancel_requested.load(Ordering::SeqCst) {
                return self.finish_with_failure(plan, auto_rollback, &checkpoints, "cancelled").await;
            }

            let step_index = plan.steps.iter().position(|s| &s.step_id == step_id).unwrap();
            if plan.steps[step_index].status == StepStatus::Completed {
                // already done from a prior resumed run
                completed += 1;
                continue;
            }

            self.record(progress, step_id, "started", "step starting");
            plan.steps[step_index].status = StepStatus::InProgress;
            plan.steps[step_index].start_time = Some(Utc::now());

            let checkpoint = self.checkpoint_step(&plan.steps[step_index]).await;

            let mut attempt = 0u32;
            let outcome = loop {
                let result = self.dispatch(&plan.steps[step_index]).await;
                if result.0 || attempt >= MAX_RETRIES {
                    break result;
                }
                attempt += 1;
                self.record(
                    progress,
                    step_id,
                    "in_progress",
                    &format!("retrying ({attempt}/{MAX_RETRIES})"),
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
                plan.steps[step_index].status = StepStatus::Pending;
                plan.steps[step_index].status = StepStatus::InProgress;
            };

            if let Some(checkpoint) = checkpoint {
                checkpoints.push(checkpoint);
            }

            let step = &mut plan.steps[step_index];
            step.end_time = Some(Utc::now());
            if outcome.0 {
                step.status = StepStatus::Completed;
                step.result = Some(outcome.1.clone());
                completed += 1;
                self.record(progress, step_id, "completed", &outcome.1);
            } else {
                step.status = StepStatus::Failed;
                step.error = Some(outcome.1.clone());
                self.record(progress, step_id, "failed", &outcome.1);
                if stop_on_error {
                    return self
                        .finish_with_failure(plan, auto_rollback, &checkpoints, &outcome.1)
                        .await;
                }
            }
        }

        *self.status.lock().unwrap() = EngineStatus::Completed;
        let elapsed = started.elapsed().as_secs_f64();
        (true, format!("{completed}/{total} steps in {elapsed:.1}s"))
    }

    async fn finish_with_failure(
        &self,
        plan: &Plan,
        auto_rollback: bool,
        checkpoints: &[Checkpoint],
        reason: &str,
    ) -> (bool, String) {
        if auto_rollback {
            self.rollback_all(checkpoints).await;
            *self.status.lock().unwrap() = EngineStatus::RolledBack;
            self.log.lock().unwrap().push(LogEntry {
                timestamp: Utc::now(),
                step_id: plan.plan_id.clone(),
                status: "rolled_back".to_string(),
                message: reason.to_string(),
            });
            return (false, format!("rolled back: {reason}"));
        }
        *self.status.lock().unwrap() = EngineStatus::Failed;
        (false, reason.to_string())
    }

    /// Restores checkpoints in reverse order; a single restore failure is
    /// logged and does not stop the rest of the rollback.
    async fn rollback_all(&self, checkpoints: &[Checkpoint]) {
        for checkpoint in checkpoints.iter().rev() {
            for (original, backup) in &checkpoint.snapshot {
                let Some(backup) = backup else { continue };
                if let Err(e) = tokio::fs::copy(backup, original).await {
                    warn!(step_id = %checkpoint.step_id, error = %e, "rollback restore failed");
                }
            }
        }
    }

    /// Creates a checkpoint for `write_file_tool` (when the target already
    /// exists) and `execute_bash` steps. Any other tool, or a
    /// `write_file_tool` targeting a new path, gets no checkpoint.
    async fn checkpoint_step(&self, step: &crate::plan::PlanStep) -> Option<Checkpoint> {
        let tool = step.tool.as_deref()?;
        let epoch = Utc::now().timestamp();
        let backup_dir = self.checkpoint_dir.join(format!("checkpoint_{}_{epoch}", step.step_id));

        match tool {
            "write_file_tool" => {
                let path = step.arguments.get("path")?.as_str()?;
                let path = PathBuf::from(path);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return None;
                }
                let mut checkpoint = Checkpoint::new(step.step_id.clone(), backup_dir.clone());
                if tokio::fs::create_dir_all(&backup_dir).await.is_err() {
                    return None;
                }
                let basename = path.file_name()?.to_owned();
                let backup_path = backup_dir.join(&basename);
                if tokio::fs::copy(&path, &backup_path).await.is_ok() {
                    checkpoint.snapshot.push((path, Some(backup_path)));
                } else {
                    checkpoint.snapshot.push((path, None));
                }
                Some(checkpoint)
            }
            "execute_bash" => Some(Checkpoint::new(step.step_id.clone(), backup_dir)),
            _ => None,
        }
    }

    /// Maps a step's `tool` + `arguments` onto the right `ToolExecutor`
    /// method, returning `(success, message)`.
    async fn dispatch(&self, step: &crate::plan::PlanStep) -> (bool, String) {
        let Some(tool) = step.tool.as_deref() else {
            return (true, "informational step (no tool)".to_string());
        };
        let args = &step.arguments;

        match tool {
            "execute_bash" => {
                let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
                    return (false, "missing 'command' argument".to_string());
                };
                let timeout = args.get("timeout").and_then(|v| v.as_u64());
                let result = self.tool_executor.execute_bash(command, timeout, None).await;
                Self::execution_outcome(result)
            }
            "execute_script" => {
                let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
                    return (false, "missing 'path' argument".to_string());
                };
                let timeout = args.get("timeout").and_then(|v| v.as_u64());
                let result = self.tool_executor.execute_script(std::path::Path::new(path), timeout, None).await;
                Self::execution_outcome(result)
            }
            "read_file_tool" => {
                let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
                    return (false, "missing 'path' argument".to_string());
                };
                match self.tool_executor.read_file(std::path::Path::new(path)).await {
                    Ok(content) => (true, content),
                    Err(e) => (false, e.to_string()),
                }
            }
            "write_file_tool" => {
                let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
                    return (false, "missing 'path' argument".to_string());
                };
                let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
                    return (false, "missing 'content' argument".to_string());
                };
                let overwrite = args.get("overwrite").and_then(|v| v.as_bool()).unwrap_or(true);
                match self.tool_executor.write_file(std::path::Path::new(path), content, overwrite).await {
                    Ok(()) => (true, format!("wrote {path}")),
                    Err(e) => (false, e.to_string()),
                }
            }
            "list_files_tool" => {
                let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
                    return (false, "missing 'path' argument".to_string());
                };
                let pattern = args.get("pattern").and_then(|v| v.as_str());
                match self.tool_executor.list_files(std::path::Path::new(path), pattern).await {
                    Ok(files) => (true, serde_json::to_string(&files).unwrap_or_default()),
                    Err(e) => (false, e.to_string()),
                }
            }
            other => (false, format!("unknown tool: {other}")),
        }
    }

    fn execution_outcome(result: orc_tools::ExecutionResult) -> (bool, String) {
        if result.success {
            (true, result.stdout)
        } else {
            (false, result.error_message.unwrap_or(result.stderr))
        }
    }

    fn record(&self, progress: &(dyn ProgressCallback), step_id: &str, status: &str, message: &str) {
        progress(step_id, status, message);
        self.log.lock().unwrap().push(LogEntry {
            timestamp: Utc::now(),
            step_id: step_id.to_string(),
            status: status.to_string(),
            message: message.to_string(),
        });
        info!(step_id, status, message, "workflow step transition");
    }

    pub fn save_state(&self, plan: &Plan, path: &std::path::Path) -> Result<(), WorkflowError> {
        let (completed, total) = plan.progress();
        let state = PersistedState {
            plan: plan.clone(),
            status: self.status(),
            summary: format!("{completed}/{total} steps"),
            log: self.log(),
        };
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reconstructs an engine in its saved status and log; no live
    /// checkpoints are restored.
    pub fn load_state(
        path: &std::path::Path,
        tool_executor: Arc<ToolExecutor>,
        checkpoint_dir: PathBuf,
    ) -> Result<(Self, Plan), WorkflowError> {
        let json = std::fs::read_to_string(path)?;
        let state: PersistedState = serde_json::from_str(&json)?;
        let engine = Self::new(tool_executor, checkpoint_dir);
        *engine.status.lock().unwrap() = state.status;
        *engine.log.lock().unwrap() = state.log;
        Ok((engine, state.plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanStep;
    use std::sync::atomic::AtomicUsize;

    fn engine(root: &std::path::Path) -> WorkflowEngine {
        let executor = Arc::new(ToolExecutor::new(vec![root.to_path_buf()], true, 5, 5, 1024, "python3"));
        WorkflowEngine::new(executor, root.join("checkpoints"))
    }

    fn noop_progress() -> impl Fn(&str, &str, &str) + Send + Sync {
        |_, _, _| {}
    }

    #[tokio::test]
    async fn unapproved_plan_is_rejected_without_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(PlanStep::new(None, "s", "main", None, serde_json::json!({}), vec![]));
        let progress = noop_progress();
        let (ok, message) = engine.execute(&mut plan, false, true, &progress).await;
        assert!(!ok);
        assert!(message.contains("not approved"));
    }

    #[tokio::test]
    async fn write_then_fail_rolls_back_file_content() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("target.txt");
        tokio::fs::write(&file, "original").await.unwrap();

        let engine = engine(tmp.path());
        let mut plan = Plan::new(None, "p", "d");
        let write_step = PlanStep::new(
            None,
            "overwrite",
            "main",
            Some("write_file_tool".to_string()),
            serde_json::json!({"path": file.to_str().unwrap(), "content": "changed", "overwrite": true}),
            vec![],
        );
        let fail_step = PlanStep::new(
            None,
            "fail on purpose",
            "main",
            Some("execute_bash".to_string()),
            serde_json::json!({"command": "rm -rf /"}),
            vec![write_step.step_id.clone()],
        );
        plan.add_step(write_step);
        plan.add_step(fail_step);
        plan.approved = true;

        let progress = noop_progress();
        let (ok, message) = engine.execute(&mut plan, true, true, &progress).await;
        assert!(!ok);
        assert!(message.contains("rolled back"));
        assert_eq!(engine.status(), EngineStatus::RolledBack);
        assert_eq!(tokio::fs::read_to_string(&file).await.unwrap(), "original");
    }

    #[tokio::test]
    async fn clean_run_completes_all_steps_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(PlanStep::new(
            None,
            "echo",
            "main",
            Some("execute_bash".to_string()),
            serde_json::json!({"command": "echo hi"}),
            vec![],
        ));
        plan.approved = true;

        let transitions = Arc::new(AtomicUsize::new(0));
        let counter = transitions.clone();
        let progress = move |_: &str, _: &str, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        let (ok, message) = engine.execute(&mut plan, false, true, &progress).await;
        assert!(ok);
        assert!(message.contains("1/1"));
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert!(transitions.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn informational_step_without_tool_completes_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(PlanStep::new(None, "just a note", "main", None, serde_json::json!({}), vec![]));
        plan.approved = true;
        let progress = noop_progress();
        let (ok, _) = engine.execute(&mut plan, false, true, &progress).await;
        assert!(ok);
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
    }
}

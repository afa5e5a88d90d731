//! The operator-facing command loop: owns the ToolExecutor, AgentRegistry,
//! OutputMultiplexer, WorkflowEngine, and Plan Parser, and dispatches the
//! operator's command vocabulary against them.
//!
//! Grounded in `multi_agent_orchestrator.py`'s `MultiAgentOrchestrator`:
//! the command set, the auto-spawn keyword scan, and the startup
//! banner/help sequence all follow its `process_command`/`run` loop.

use orc_agent::{run_turn, AgentRegistry, OutputMultiplexer, TurnOutcome};
use orc_core::{AgentId, AgentRole, ChatMessage, OrchestratorConfig, Secrets};
use orc_llm::{ChatClient, LlmClient};
use orc_tools::ToolExecutor;
use orc_workflow::{Plan, PlanParser, WorkflowEngine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant.";

struct Sessions {
    sessions: Mutex<HashMap<AgentId, Arc<orc_agent::AgentSession>>>,
    tasks: Mutex<HashMap<AgentId, tokio::task::JoinHandle<()>>>,
}

struct Orchestrator {
    config: OrchestratorConfig,
    workspace: PathBuf,
    registry: Arc<AgentRegistry>,
    mux: Arc<OutputMultiplexer<std::io::Stdout>>,
    tool_executor: Arc<ToolExecutor>,
    engine: Arc<WorkflowEngine>,
    pending_plans: Mutex<HashMap<String, Plan>>,
    sessions: Sessions,
    main_id: AgentId,
    auto_spawn_enabled: std::sync::atomic::AtomicBool,
}

pub async fn run(config_path: PathBuf, workspace: Option<PathBuf>) -> anyhow::Result<()> {
    let workspace = workspace.unwrap_or(std::env::current_dir()?);
    let mut config: OrchestratorConfig = {
        let text = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", config_path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", config_path.display()))?
    };

    if let Some(secrets_path) = config_path.parent().map(|p| p.join("secrets.json")) {
        if secrets_path.exists() {
            let text = std::fs::read_to_string(&secrets_path)?;
            let secrets: Secrets = serde_json::from_str(&text)?;
            config.apply_secrets(&secrets);
        }
    }

    let allowed_directories: Vec<PathBuf> = config
        .file_operations
        .allowed_directories
        .iter()
        .map(|p| resolve_against(&workspace, p))
        .collect();

    let tool_executor = Arc::new(ToolExecutor::with_file_permissions(
        allowed_directories,
        config.agent_settings.safe_mode,
        config.agent_settings.timeout_seconds,
        config.agent_settings.timeout_overrides.code_execution,
        config.file_operations.max_file_size_kb,
        config.agent_settings.script_interpreter.clone(),
        config.file_operations.allow_file_read,
        config.file_operations.allow_file_write,
    ));

    let registry = Arc::new(AgentRegistry::new());
    let mux = Arc::new(OutputMultiplexer::new());
    let engine = Arc::new(WorkflowEngine::new(tool_executor.clone(), workspace.join(".orc_checkpoints")));

    let main_profile = config
        .agent_profiles
        .get(&config.multi_agent_settings.default_main_profile)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no profile named '{}'", config.multi_agent_settings.default_main_profile))?;

    let main_id = registry.register(AgentRole::Main, main_profile.model.clone(), main_profile.provider.clone(), None, None, true)?;
    mux.register(main_id.clone(), AgentRole::Main);

    let system_prompt = load_system_prompt(&main_profile.system_prompt_file, &workspace)?;
    let client: Arc<dyn LlmClient> = Arc::new(ChatClient::new(main_profile.provider.clone(), main_profile.url.clone(), main_profile.api_key.clone()));
    let main_session = Arc::new(orc_agent::AgentSession::new(
        main_id.clone(),
        client,
        main_profile.model.clone(),
        system_prompt,
        main_profile.temperature,
        main_profile.max_tokens,
    ));

    let auto_spawn_enabled = config.spawning_rules.auto_spawn_on_keywords;
    let orchestrator = Arc::new(Orchestrator {
        config,
        workspace,
        registry,
        mux,
        tool_executor,
        engine,
        pending_plans: Mutex::new(HashMap::new()),
        sessions: Sessions { sessions: Mutex::new(HashMap::new()), tasks: Mutex::new(HashMap::new()) },
        main_id,
        auto_spawn_enabled: std::sync::atomic::AtomicBool::new(auto_spawn_enabled),
    });
    orchestrator.sessions.sessions.lock().await.insert(orchestrator.main_id.clone(), main_session);

    print_banner();
    print_help();

    let mut lines = read_stdin_lines();
    while let Some(line) = lines.recv().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "exit" {
            info!("shutting down");
            break;
        }
        orchestrator.clone().dispatch(line).await;
    }

    Ok(())
}

/// Reads stdin one line at a time on a dedicated blocking thread, posting
/// lines back into the async event loop through a channel — the operator
/// prompt never blocks the main agent's concurrently streaming turns.
fn read_stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn resolve_against(root: &Path, entry: &str) -> PathBuf {
    let p = Path::new(entry);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn load_system_prompt(path: &Option<String>, workspace: &Path) -> anyhow::Result<String> {
    match path {
        Some(p) => {
            let resolved = resolve_against(workspace, p);
            Ok(std::fs::read_to_string(&resolved)?)
        }
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
}

fn print_banner() {
    println!("=== orc :: multi-agent coding orchestrator ===");
}

fn print_help() {
    println!("Commands:");
    println!("  /spawn <role> <task>     - spawn a sub-agent");
    println!("  /agents                  - list registered agents");
    println!("  /stop <agent_id>         - terminate an agent");
    println!("  /stop_all                - terminate all sub-agents");
    println!("  /stats                   - registry statistics");
    println!("  /config                  - show active configuration");
    println!("  /stream                  - toggle streaming display (no-op placeholder)");
    println!("  /thinking                - toggle thinking display (no-op placeholder)");
    println!("  /reset                   - reset the main agent's conversation");
    println!("  /auto_spawn              - toggle automatic sub-agent spawning");
    println!("  /plans                   - list pending plans");
    println!("  /plan <plan_id>          - view a pending plan");
    println!("  /approve <plan_id>       - approve and execute a pending plan");
    println!("  /reject <plan_id>        - discard a pending plan");
    println!("  /cancel_workflow         - cancel the running workflow");
    println!("  @<agent_id> <message>    - message a specific sub-agent");
    println!("  /help                    - show this help");
    println!("  /exit                    - quit");
    println!();
}

impl Orchestrator {
    async fn dispatch(self: Arc<Self>, line: String) {
        if let Some(rest) = line.strip_prefix('@') {
            return self.dispatch_directed(rest).await;
        }
        if let Some(rest) = line.strip_prefix('/') {
            return self.dispatch_command(rest).await;
        }
        self.dispatch_to_main(line).await;
    }

    async fn dispatch_directed(self: Arc<Self>, rest: &str) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let (Some(recipient), Some(message)) = (parts.next(), parts.next()) else {
            println!("usage: @<agent_id> <message>");
            return;
        };
        if message.trim().is_empty() {
            println!("usage: @<agent_id> <message>");
            return;
        }
        let recipient = AgentId::new(recipient);
        let Some(session) = self.sessions.sessions.lock().await.get(&recipient).cloned() else {
            println!("unknown agent: {recipient}");
            return;
        };
        self.clone().spawn_turn(session, message.to_string()).await;
    }

    async fn dispatch_to_main(self: Arc<Self>, message: String) {
        self.clone().maybe_auto_spawn(&message).await;
        let Some(session) = self.sessions.sessions.lock().await.get(&self.main_id).cloned() else {
            error!("main agent session missing");
            return;
        };
        self.spawn_turn(session, message).await;
    }

    /// Lower-cases the message and checks every configured keyword
    /// substring; matches spawn a sub-agent from the mapped profile,
    /// parented to the main agent, whose turn runs concurrently with the
    /// main agent's own.
    async fn maybe_auto_spawn(self: &Arc<Self>, message: &str) {
        if !self.auto_spawn_enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let lowered = message.to_lowercase();
        for (keyword, profile_name) in &self.config.spawning_rules.keywords {
            if lowered.contains(&keyword.to_lowercase()) {
                if self.config.spawning_rules.require_confirmation {
                    println!("auto-spawn '{profile_name}' on keyword '{keyword}'? [y/N] (defaulting to no)");
                    continue;
                }
                let role = profile_name_to_role(profile_name);
                match self.clone().spawn_sub_agent(role, message.to_string(), Some(profile_name.clone())).await {
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "auto-spawn failed"),
                }
            }
        }
    }

    /// `spawn_sub_agent(role, task, profile?)`: resolves `<role>_agent` if
    /// no explicit profile is given, falling back to
    /// `default_sub_agent_profile`; registers the new session with the
    /// main agent as parent and with the multiplexer under the role color.
    async fn spawn_sub_agent(self: Arc<Self>, role: AgentRole, task: String, profile: Option<String>) -> anyhow::Result<AgentId> {
        let profile_name = profile.unwrap_or_else(|| format!("{}_agent", role.as_str()));
        let profile = self
            .config
            .agent_profiles
            .get(&profile_name)
            .or_else(|| self.config.agent_profiles.get(&self.config.multi_agent_settings.default_sub_agent_profile))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no profile '{profile_name}' and no default sub-agent profile"))?;

        let id = self.registry.register(role, profile.model.clone(), profile.provider.clone(), Some(self.main_id.clone()), Some(task.clone()), false)?;
        self.mux.register(id.clone(), role);

        let system_prompt = load_system_prompt(&profile.system_prompt_file, &self.workspace)?;
        let client: Arc<dyn LlmClient> = Arc::new(ChatClient::new(profile.provider.clone(), profile.url.clone(), profile.api_key.clone()));
        let session = Arc::new(orc_agent::AgentSession::new(id.clone(), client, profile.model.clone(), system_prompt, profile.temperature, profile.max_tokens));
        self.sessions.sessions.lock().await.insert(id.clone(), session.clone());

        self.clone().spawn_turn(session, task).await;
        Ok(id)
    }

    /// Runs one turn on a background task so the operator prompt and any
    /// concurrently running sub-agent turns are never blocked on it.
    async fn spawn_turn(self: Arc<Self>, session: Arc<orc_agent::AgentSession>, message: String) {
        let orchestrator = self.clone();
        let agent_id = session.agent_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = run_turn(&session, &orchestrator.registry, &orchestrator.mux, message, None).await;
            orchestrator.handle_turn_outcome(&agent_id, outcome).await;
        });
        self.sessions.tasks.lock().await.insert(agent_id, handle);
    }

    async fn handle_turn_outcome(&self, agent_id: &AgentId, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::TransportError(_) => {
                let _ = self.registry.set_status(agent_id, orc_core::AgentStatus::Error);
            }
            TurnOutcome::Completed { assistant_text, operations, contains_plan, .. } => {
                let _ = self.registry.set_status(agent_id, orc_core::AgentStatus::Idle);
                self.dispatch_file_operations(agent_id, &operations).await;
                if contains_plan {
                    self.handle_plan_submission(&assistant_text).await;
                }
            }
        }
    }

    /// File operation blocks are dispatched through the same ToolExecutor a
    /// workflow step would use, serialized per-agent via `file_mutex` so two
    /// writes from one turn never interleave.
    async fn dispatch_file_operations(&self, agent_id: &AgentId, operations: &orc_agent::ExtractedOperations) {
        let Some(session) = self.sessions.sessions.lock().await.get(agent_id).cloned() else { return };
        let _guard = session.file_mutex.lock().await;

        for read in &operations.reads {
            match self.tool_executor.read_file(Path::new(&read.path)).await {
                Ok(content) => self.mux.write(agent_id, &format!("read {}: {} bytes", read.path, content.len()), orc_agent::OutputKind::Status),
                Err(e) => self.mux.write(agent_id, &format!("read {} failed: {e}", read.path), orc_agent::OutputKind::Error),
            }
        }
        for write in &operations.writes {
            match self.tool_executor.write_file(Path::new(&write.path), &write.content, true).await {
                Ok(()) => self.mux.write(agent_id, &format!("wrote {}", write.path), orc_agent::OutputKind::Success),
                Err(e) => self.mux.write(agent_id, &format!("write {} failed: {e}", write.path), orc_agent::OutputKind::Error),
            }
        }
        for edit in &operations.edits {
            match self.tool_executor.read_file(Path::new(&edit.path)).await {
                Ok(content) => {
                    let replaced = content.replacen(&edit.find, &edit.replace, 1);
                    match self.tool_executor.write_file(Path::new(&edit.path), &replaced, true).await {
                        Ok(()) => self.mux.write(agent_id, &format!("edited {}", edit.path), orc_agent::OutputKind::Success),
                        Err(e) => self.mux.write(agent_id, &format!("edit {} failed: {e}", edit.path), orc_agent::OutputKind::Error),
                    }
                }
                Err(e) => self.mux.write(agent_id, &format!("edit {} failed to read: {e}", edit.path), orc_agent::OutputKind::Error),
            }
        }
    }

    /// Parses a `[PLAN]` block as a workflow plan; non-workflow (legacy
    /// file-operation) plans were already dispatched by
    /// `dispatch_file_operations` above and are not re-handled here.
    async fn handle_plan_submission(&self, assistant_text: &str) {
        let Some(plan) = PlanParser::parse(assistant_text) else { return };
        if let Err(e) = plan.validate() {
            self.mux.write(&self.main_id, &format!("received an invalid plan: {e}"), orc_agent::OutputKind::Error);
            return;
        }
        println!("{}", plan.display());
        println!("Decide with: /approve {0}, /reject {0}, or /plan {0} to view again.", plan.plan_id);
        self.pending_plans.lock().await.insert(plan.plan_id.clone(), plan);
    }

    async fn dispatch_command(self: Arc<Self>, rest: &str) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default();
        let arg = parts.next().unwrap_or_default().trim();

        match cmd {
            "spawn" => {
                let mut args = arg.splitn(2, char::is_whitespace);
                let (Some(role), Some(task)) = (args.next(), args.next()) else {
                    println!("usage: /spawn <role> <task>");
                    return;
                };
                if task.trim().is_empty() {
                    println!("usage: /spawn <role> <task>");
                    return;
                }
                let Some(role) = AgentRole::parse(role) else {
                    println!("unknown role: {role}");
                    return;
                };
                match self.spawn_sub_agent(role, task.to_string(), None).await {
                    Ok(id) => println!("spawned {id}"),
                    Err(e) => println!("spawn failed: {e}"),
                }
            }
            "agents" => self.print_agents().await,
            "stop" => {
                if arg.is_empty() {
                    println!("usage: /stop <agent_id>");
                    return;
                }
                let id = AgentId::new(arg);
                match self.registry.terminate(&id) {
                    Ok(()) => println!("terminated {id}"),
                    Err(e) => println!("{e}"),
                }
            }
            "stop_all" => {
                self.registry.terminate_children(&self.main_id);
                println!("all sub-agents terminated");
            }
            "stats" => {
                let stats = self.registry.stats();
                println!("total: {} active: {} by role: {:?}", stats.total_agents, stats.active_agents, stats.agents_by_role);
            }
            "config" => {
                println!("default_main_profile: {}", self.config.multi_agent_settings.default_main_profile);
                println!("default_sub_agent_profile: {}", self.config.multi_agent_settings.default_sub_agent_profile);
                println!("profiles: {:?}", self.config.agent_profiles.keys().collect::<Vec<_>>());
                println!("auto_spawn_enabled: {}", self.auto_spawn_enabled.load(std::sync::atomic::Ordering::SeqCst));
            }
            "stream" | "thinking" => {
                println!("'{cmd}' is a per-session display toggle; no effect on this terminal's output.");
            }
            "reset" => {
                if let Some(session) = self.sessions.sessions.lock().await.get(&self.main_id).cloned() {
                    let client = session.client.clone();
                    let fresh = orc_agent::AgentSession::new(
                        self.main_id.clone(),
                        client,
                        session.model.clone(),
                        DEFAULT_SYSTEM_PROMPT,
                        session.temperature,
                        session.max_tokens,
                    );
                    self.sessions.sessions.lock().await.insert(self.main_id.clone(), Arc::new(fresh));
                    println!("main agent conversation reset");
                }
            }
            "auto_spawn" => {
                let was = self.auto_spawn_enabled.fetch_xor(true, std::sync::atomic::Ordering::SeqCst);
                println!("auto-spawn {}", if was { "disabled" } else { "enabled" });
            }
            "plans" => {
                let pending = self.pending_plans.lock().await;
                if pending.is_empty() {
                    println!("no pending plans");
                } else {
                    for plan in pending.values() {
                        println!("{} — {}", plan.plan_id, plan.name);
                    }
                }
            }
            "plan" => {
                if arg.is_empty() {
                    println!("usage: /plan <plan_id>");
                    return;
                }
                match self.pending_plans.lock().await.get(arg) {
                    Some(plan) => println!("{}", plan.display()),
                    None => println!("no such pending plan: {arg}"),
                }
            }
            "approve" => self.approve_plan(arg).await,
            "reject" => {
                if arg.is_empty() {
                    println!("usage: /reject <plan_id>");
                    return;
                }
                if self.pending_plans.lock().await.remove(arg).is_some() {
                    println!("rejected {arg}");
                } else {
                    println!("no such pending plan: {arg}");
                }
            }
            "cancel_workflow" => {
                self.engine.cancel();
                println!("workflow cancellation requested");
            }
            "help" => print_help(),
            other => println!("unknown command: /{other}"),
        }
    }

    async fn print_agents(&self) {
        for descriptor in self.registry.list(true) {
            println!(
                "{} [{}] {:?} parent={:?} task={:?}",
                descriptor.id,
                descriptor.role.as_str(),
                descriptor.status,
                descriptor.parent_id,
                descriptor.task_description,
            );
        }
    }

    async fn approve_plan(self: &Arc<Self>, plan_id: &str) {
        if plan_id.is_empty() {
            println!("usage: /approve <plan_id>");
            return;
        }
        let Some(mut plan) = self.pending_plans.lock().await.remove(plan_id) else {
            println!("no such pending plan: {plan_id}");
            return;
        };
        plan.approved = true;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let progress = |step_id: &str, status: &str, message: &str| {
                println!("[workflow] {step_id} {status}: {message}");
            };
            let (ok, message) = orchestrator.engine.execute(&mut plan, true, true, &progress).await;
            if ok {
                println!("workflow {} completed: {message}", plan.plan_id);
            } else {
                println!("workflow {} failed: {message}", plan.plan_id);
            }
        });
    }
}

fn profile_name_to_role(profile_name: &str) -> AgentRole {
    profile_name
        .strip_suffix("_agent")
        .and_then(AgentRole::parse)
        .unwrap_or(AgentRole::General)
}

//! Shared data model: agent identity, roles, status, inter-agent messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An agent identifier — an opaque 8-character string, cheaply cloneable.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct AgentId(Arc<str>);

impl AgentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The fixed set of sub-agent roles the orchestrator knows how to spawn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Main,
    Reviewer,
    Researcher,
    Implementer,
    Tester,
    Optimizer,
    General,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Main => "main",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Researcher => "researcher",
            AgentRole::Implementer => "implementer",
            AgentRole::Tester => "tester",
            AgentRole::Optimizer => "optimizer",
            AgentRole::General => "general",
        }
    }

    /// Roles a Plan step's `agent_id` field may reference, plus "main".
    pub fn valid_step_agents() -> &'static [&'static str] {
        &["main", "reviewer", "researcher", "implementer", "tester", "optimizer"]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Some(Self::Main),
            "reviewer" => Some(Self::Reviewer),
            "researcher" => Some(Self::Researcher),
            "implementer" => Some(Self::Implementer),
            "tester" => Some(Self::Tester),
            "optimizer" => Some(Self::Optimizer),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Lifecycle status of a registered agent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Waiting,
    Completed,
    Error,
    Terminated,
}

/// The registry's view of one agent: identity, role, status, and the
/// summaries it has produced. Retained for the life of the process even
/// after the agent is terminated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub role: AgentRole,
    pub model_name: String,
    pub provider: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<AgentId>,
    pub task_description: Option<String>,
    pub is_main: bool,
    pub summaries: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(
        id: AgentId,
        role: AgentRole,
        model_name: impl Into<String>,
        provider: impl Into<String>,
        parent_id: Option<AgentId>,
        task_description: Option<String>,
        is_main: bool,
    ) -> Self {
        Self {
            id,
            role,
            model_name: model_name.into(),
            provider: provider.into(),
            status: AgentStatus::Idle,
            created_at: Utc::now(),
            parent_id,
            task_description,
            is_main,
            summaries: Vec::new(),
        }
    }
}

/// A message handed from one agent to another through the registry's
/// per-recipient queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterAgentMessage {
    pub from: AgentId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters the orchestrator reports via `/stats`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub agents_by_role: std::collections::HashMap<String, usize>,
}

/// A chat message exchanged with an LLM endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

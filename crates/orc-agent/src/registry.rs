//! AgentRegistry — identities, status, parent/child links, and the
//! per-recipient inter-agent message queues.
//!
//! Grounded in `agent_manager.py`'s `AgentManager`: one lock guards all
//! descriptor state (registration, status, summaries, parent/child
//! lookups); message delivery is split out onto its own per-recipient
//! channel so `receive`'s await never has to hold that lock, mirroring the
//! original's separate `asyncio.Queue` per agent.

use chrono::Utc;
use dashmap::DashMap;
use orc_core::{AgentDescriptor, AgentId, AgentRole, AgentStatus, InterAgentMessage, RegistryStats};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 256;
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 8;
const ID_GENERATION_RETRIES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(AgentId),
    #[error("a main agent is already registered: {0}")]
    MainAlreadyRegistered(AgentId),
    #[error("could not allocate a unique agent id after {0} attempts")]
    IdExhausted(usize),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

struct Inner {
    descriptors: HashMap<AgentId, AgentDescriptor>,
    main_id: Option<AgentId>,
}

/// Registers agents, tracks lifecycle status, and routes inter-agent
/// messages through bounded per-recipient FIFO queues.
pub struct AgentRegistry {
    inner: Mutex<Inner>,
    queues: DashMap<AgentId, (mpsc::Sender<InterAgentMessage>, AsyncMutex<mpsc::Receiver<InterAgentMessage>>)>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { descriptors: HashMap::new(), main_id: None }),
            queues: DashMap::new(),
        }
    }

    /// Register a new agent and return its freshly allocated id.
    pub fn register(
        &self,
        role: AgentRole,
        model_name: impl Into<String>,
        provider: impl Into<String>,
        parent_id: Option<AgentId>,
        task: Option<String>,
        is_main: bool,
    ) -> RegistryResult<AgentId> {
        let mut inner = self.inner.lock().unwrap();
        if is_main {
            if let Some(existing) = &inner.main_id {
                return Err(RegistryError::MainAlreadyRegistered(existing.clone()));
            }
        }

        let id = allocate_id(&inner.descriptors)?;
        let descriptor = AgentDescriptor::new(
            id.clone(),
            role,
            model_name,
            provider,
            parent_id,
            task,
            is_main,
        );
        inner.descriptors.insert(id.clone(), descriptor);
        if is_main {
            inner.main_id = Some(id.clone());
        }
        drop(inner);

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        self.queues.insert(id.clone(), (tx, AsyncMutex::new(rx)));
        debug!(agent_id = %id, role = role.as_str(), "agent registered");
        Ok(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentDescriptor> {
        self.inner.lock().unwrap().descriptors.get(id).cloned()
    }

    pub fn list(&self, include_terminated: bool) -> Vec<AgentDescriptor> {
        self.inner
            .lock()
            .unwrap()
            .descriptors
            .values()
            .filter(|d| include_terminated || d.status != AgentStatus::Terminated)
            .cloned()
            .collect()
    }

    pub fn children_of(&self, parent_id: &AgentId) -> Vec<AgentDescriptor> {
        self.inner
            .lock()
            .unwrap()
            .descriptors
            .values()
            .filter(|d| d.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect()
    }

    pub fn set_status(&self, id: &AgentId, status: AgentStatus) -> RegistryResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = inner.descriptors.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        descriptor.status = status;
        Ok(())
    }

    pub fn add_summary(&self, id: &AgentId, text: impl Into<String>) -> RegistryResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = inner.descriptors.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        descriptor.summaries.push(text.into());
        Ok(())
    }

    /// Enqueue a message for `to`. Silently reports via `Err` if the
    /// recipient is unknown; never panics the caller's dispatch loop.
    pub async fn send(&self, from: AgentId, to: &AgentId, message: impl Into<String>) -> RegistryResult<()> {
        let entry = self.queues.get(to).ok_or_else(|| RegistryError::NotFound(to.clone()))?;
        let msg = InterAgentMessage { from, message: message.into(), timestamp: Utc::now() };
        if entry.0.send(msg).await.is_err() {
            warn!(agent_id = %to, "message queue closed");
        }
        Ok(())
    }

    /// Wait up to `timeout` for the first message, then drain anything else
    /// already queued without waiting further.
    pub async fn receive(&self, id: &AgentId, timeout: Duration) -> RegistryResult<Vec<InterAgentMessage>> {
        let entry = self.queues.get(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut rx = entry.1.lock().await;
        let mut out = Vec::new();
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => out.push(msg),
            _ => return Ok(out),
        }
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        Ok(out)
    }

    /// Idempotent: terminating an already-terminated agent is a no-op.
    /// The descriptor and its summaries remain visible to `list(true)`.
    pub fn terminate(&self, id: &AgentId) -> RegistryResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let descriptor = inner.descriptors.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        descriptor.status = AgentStatus::Terminated;
        Ok(())
    }

    pub fn terminate_children(&self, parent_id: &AgentId) {
        let mut inner = self.inner.lock().unwrap();
        for descriptor in inner.descriptors.values_mut() {
            if descriptor.parent_id.as_ref() == Some(parent_id) {
                descriptor.status = AgentStatus::Terminated;
            }
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().unwrap();
        let mut by_role = HashMap::new();
        let mut active = 0;
        for descriptor in inner.descriptors.values() {
            *by_role.entry(descriptor.role.as_str().to_string()).or_insert(0) += 1;
            if descriptor.status != AgentStatus::Terminated {
                active += 1;
            }
        }
        RegistryStats {
            total_agents: inner.descriptors.len(),
            active_agents: active,
            agents_by_role: by_role,
        }
    }
}

fn allocate_id(existing: &HashMap<AgentId, AgentDescriptor>) -> RegistryResult<AgentId> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for _ in 0..ID_GENERATION_RETRIES {
        let candidate: String =
            (0..ID_LEN).map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char).collect();
        let id = AgentId::new(candidate);
        if !existing.contains_key(&id) {
            return Ok(id);
        }
    }
    Err(RegistryError::IdExhausted(ID_GENERATION_RETRIES))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> AgentRegistry {
        AgentRegistry::new()
    }

    #[test]
    fn register_returns_distinct_ids() {
        let registry = reg();
        let a = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let b = registry
            .register(AgentRole::Reviewer, "m", "p", Some(a.clone()), Some("review x".into()), false)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn only_one_main_agent_allowed() {
        let registry = reg();
        registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let err = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap_err();
        assert!(matches!(err, RegistryError::MainAlreadyRegistered(_)));
    }

    #[test]
    fn children_of_returns_only_direct_children() {
        let registry = reg();
        let main = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let child = registry
            .register(AgentRole::Reviewer, "m", "p", Some(main.clone()), None, false)
            .unwrap();
        let _grandchild = registry
            .register(AgentRole::Tester, "m", "p", Some(child.clone()), None, false)
            .unwrap();
        let children = registry.children_of(&main);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child);
    }

    #[test]
    fn terminate_is_idempotent_and_keeps_descriptor_visible() {
        let registry = reg();
        let id = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        registry.terminate(&id).unwrap();
        registry.terminate(&id).unwrap();
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Terminated);
        assert!(registry.list(true).iter().any(|d| d.id == id));
        assert!(!registry.list(false).iter().any(|d| d.id == id));
    }

    #[test]
    fn summaries_accumulate_in_order() {
        let registry = reg();
        let id = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        registry.add_summary(&id, "first").unwrap();
        registry.add_summary(&id, "second").unwrap();
        assert_eq!(registry.get(&id).unwrap().summaries, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn send_then_receive_delivers_message() {
        let registry = reg();
        let a = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let b = registry.register(AgentRole::Reviewer, "m", "p", Some(a.clone()), None, false).unwrap();
        registry.send(a.clone(), &b, "hello").await.unwrap();
        let messages = registry.receive(&b, Duration::from_millis(50)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "hello");
        assert_eq!(messages[0].from, a);
    }

    #[tokio::test]
    async fn receive_times_out_with_no_messages() {
        let registry = reg();
        let id = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let messages = registry.receive(&id, Duration::from_millis(20)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn receive_drains_everything_already_queued() {
        let registry = reg();
        let a = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let b = registry.register(AgentRole::Reviewer, "m", "p", Some(a.clone()), None, false).unwrap();
        registry.send(a.clone(), &b, "one").await.unwrap();
        registry.send(a.clone(), &b, "two").await.unwrap();
        let messages = registry.receive(&b, Duration::from_millis(50)).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn terminate_children_only_affects_direct_children() {
        let registry = reg();
        let main = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let child = registry.register(AgentRole::Reviewer, "m", "p", Some(main.clone()), None, false).unwrap();
        let unrelated = registry.register(AgentRole::Tester, "m", "p", None, None, false).unwrap();
        registry.terminate_children(&main);
        assert_eq!(registry.get(&child).unwrap().status, AgentStatus::Terminated);
        assert_eq!(registry.get(&unrelated).unwrap().status, AgentStatus::Idle);
    }

    #[test]
    fn stats_counts_by_role_and_active() {
        let registry = reg();
        let main = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        let child = registry.register(AgentRole::Reviewer, "m", "p", Some(main.clone()), None, false).unwrap();
        registry.terminate(&child).unwrap();
        let stats = registry.stats();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.active_agents, 1);
        assert_eq!(stats.agents_by_role.get("main"), Some(&1));
        assert_eq!(stats.agents_by_role.get("reviewer"), Some(&1));
    }
}

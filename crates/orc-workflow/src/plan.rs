//! Plan / PlanStep data model and its validation and scheduling logic.
//!
//! Grounded exactly in `plan.py`: step/plan ids are 8-character opaque
//! strings, dependency validation walks a fresh visited-set per branch so a
//! step can appear on more than one path without tripping a false cycle,
//! and `get_execution_order` is a textbook Kahn's-algorithm topological sort
//! with FIFO tie-breaking so ordering is stable across runs.

use crate::error::PlanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

pub const VALID_TOOLS: &[&str] = &[
    "execute_bash",
    "execute_script",
    "read_file_tool",
    "write_file_tool",
    "list_files_tool",
];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StepStatus::Pending => "o",
            StepStatus::InProgress => "~",
            StepStatus::Completed => "x",
            StepStatus::Failed => "!",
            StepStatus::Skipped => "-",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub description: String,
    pub agent_id: String,
    pub tool: Option<String>,
    pub arguments: serde_json::Value,
    pub dependencies: Vec<String>,
    pub estimated_time: u64,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl PlanStep {
    pub fn new(
        step_id: Option<String>,
        description: impl Into<String>,
        agent_id: impl Into<String>,
        tool: Option<String>,
        arguments: serde_json::Value,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            step_id: step_id.unwrap_or_else(new_short_id),
            description: description.into(),
            agent_id: agent_id.into(),
            tool,
            arguments,
            dependencies,
            estimated_time: 30,
            status: StepStatus::Pending,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
    pub approved: bool,
    pub metadata: HashMap<String, String>,
}

impl Plan {
    pub fn new(plan_id: Option<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.unwrap_or_else(new_short_id),
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
            created_at: Utc::now(),
            approved: false,
            metadata: HashMap::new(),
        }
    }

    pub fn add_step(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    pub fn get_step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn get_step_mut(&mut self, step_id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn total_estimated_time(&self) -> u64 {
        self.steps.iter().map(|s| s.estimated_time).sum()
    }

    pub fn progress(&self) -> (usize, usize) {
        let completed = self.steps.iter().filter(|s| s.status == StepStatus::Completed).count();
        (completed, self.steps.len())
    }

    pub fn progress_percentage(&self) -> f64 {
        let (completed, total) = self.progress();
        if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        }
    }

    /// Validates structure: non-empty, unique ids, dependencies resolve to
    /// real steps, no cycles, and every step names a known agent and tool.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::EmptySteps);
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(PlanError::DuplicateStepId(step.step_id.clone()));
            }
        }

        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step: step.step_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        for step in &self.steps {
            if self.has_circular_dependency(&step.step_id, &mut HashSet::new()) {
                return Err(PlanError::CircularDependency(step.step_id.clone()));
            }
        }

        for step in &self.steps {
            if !orc_core::AgentRole::valid_step_agents().contains(&step.agent_id.as_str()) {
                return Err(PlanError::InvalidAgentId(step.agent_id.clone()));
            }
            if let Some(tool) = &step.tool {
                if !VALID_TOOLS.contains(&tool.as_str()) {
                    return Err(PlanError::InvalidTool(tool.clone()));
                }
            }
        }

        Ok(())
    }

    /// DFS over a step's dependency chain with a fresh visited-set copy per
    /// recursive call, so the same step reachable along two independent
    /// paths doesn't register as a false cycle — only a step appearing
    /// twice on the *same* path does.
    fn has_circular_dependency(&self, step_id: &str, visited: &mut HashSet<String>) -> bool {
        if visited.contains(step_id) {
            return true;
        }
        visited.insert(step_id.to_string());
        let Some(step) = self.get_step(step_id) else { return false };
        for dep in &step.dependencies {
            let mut branch = visited.clone();
            if self.has_circular_dependency(dep, &mut branch) {
                return true;
            }
        }
        false
    }

    /// Kahn's algorithm: FIFO queue seeded with zero-in-degree steps,
    /// decrementing dependents' in-degree as each is popped. Ties break by
    /// the order steps were originally listed.
    pub fn execution_order(&self) -> Result<Vec<String>, PlanError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for step in &self.steps {
            in_degree.entry(step.step_id.as_str()).or_insert(0);
            for dep in &step.dependencies {
                *in_degree.entry(step.step_id.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(step.step_id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self.steps
            .iter()
            .map(|s| s.step_id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut result = Vec::new();
        while let Some(id) = queue.pop_front() {
            result.push(id.to_string());
            if let Some(deps) = dependents.get(id) {
                for &dependent in deps {
                    let degree = in_degree.get_mut(dependent).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if result.len() != self.steps.len() {
            return Err(PlanError::CircularDependency(self.plan_id.clone()));
        }
        Ok(result)
    }

    /// `main` steps cost 0.10, every other agent costs 0.02, summed.
    pub fn estimate_cost(&self) -> f64 {
        self.steps
            .iter()
            .map(|s| if s.agent_id == "main" { 0.10 } else { 0.02 })
            .sum()
    }

    pub fn display(&self) -> String {
        let mut out = format!(
            "Plan: {} ({})\n{}\nSteps:\n",
            self.name, self.plan_id, self.description
        );
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!(
                "  {}. [{}] {} — {} via {} (deps: {})\n",
                i + 1,
                step.status.icon(),
                step.step_id,
                step.description,
                step.tool.as_deref().unwrap_or("none"),
                if step.dependencies.is_empty() {
                    "none".to_string()
                } else {
                    step.dependencies.join(", ")
                }
            ));
        }
        out
    }
}

pub(crate) fn new_short_id() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..8).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep::new(
            Some(id.to_string()),
            "do a thing",
            "main",
            Some("execute_bash".to_string()),
            serde_json::json!({"command": "echo hi"}),
            deps.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn empty_plan_fails_validation() {
        let plan = Plan::new(None, "p", "d");
        assert!(matches!(plan.validate(), Err(PlanError::EmptySteps)));
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("s1", &[]));
        plan.add_step(step("s1", &[]));
        assert!(matches!(plan.validate(), Err(PlanError::DuplicateStepId(_))));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("s1", &["nope"]));
        assert!(matches!(plan.validate(), Err(PlanError::UnknownDependency { .. })));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("s1", &["s1"]));
        assert!(matches!(plan.validate(), Err(PlanError::CircularDependency(_))));
    }

    #[test]
    fn two_step_cycle_is_rejected() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("s1", &["s2"]));
        plan.add_step(step("s2", &["s1"]));
        assert!(matches!(plan.validate(), Err(PlanError::CircularDependency(_))));
    }

    #[test]
    fn diamond_dependency_is_not_a_false_cycle() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("a", &[]));
        plan.add_step(step("b", &["a"]));
        plan.add_step(step("c", &["a"]));
        plan.add_step(step("d", &["b", "c"]));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("a", &[]));
        plan.add_step(step("b", &["a"]));
        plan.add_step(step("c", &["a", "b"]));
        let order = plan.execution_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn execution_order_is_fifo_stable_for_ties() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("x", &[]));
        plan.add_step(step("y", &[]));
        plan.add_step(step("z", &[]));
        assert_eq!(plan.execution_order().unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn estimate_cost_charges_main_more() {
        let mut plan = Plan::new(None, "p", "d");
        plan.add_step(step("a", &[])); // main
        let mut reviewer_step = step("b", &[]);
        reviewer_step.agent_id = "reviewer".to_string();
        plan.add_step(reviewer_step);
        assert!((plan.estimate_cost() - 0.12).abs() < 1e-9);
    }

    #[test]
    fn invalid_agent_id_is_rejected() {
        let mut plan = Plan::new(None, "p", "d");
        let mut s = step("a", &[]);
        s.agent_id = "ghost".to_string();
        plan.add_step(s);
        assert!(matches!(plan.validate(), Err(PlanError::InvalidAgentId(_))));
    }

    #[test]
    fn invalid_tool_is_rejected() {
        let mut plan = Plan::new(None, "p", "d");
        let mut s = step("a", &[]);
        s.tool = Some("delete_everything".to_string());
        plan.add_step(s);
        assert!(matches!(plan.validate(), Err(PlanError::InvalidTool(_))));
    }
}

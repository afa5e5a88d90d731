//! Plan validation and workflow execution error taxonomy.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    EmptySteps,

    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("circular dependency involving step {0}")]
    CircularDependency(String),

    #[error("unknown agent id: {0}")]
    InvalidAgentId(String),

    #[error("unknown tool: {0}")]
    InvalidTool(String),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("plan is not approved")]
    NotApproved,

    #[error("plan failed validation: {0}")]
    ValidationFailed(#[from] PlanError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<PlanError> for orc_core::Error {
    fn from(e: PlanError) -> Self {
        orc_core::Error::Plan(e.to_string())
    }
}

impl From<WorkflowError> for orc_core::Error {
    fn from(e: WorkflowError) -> Self {
        orc_core::Error::Workflow(e.to_string())
    }
}

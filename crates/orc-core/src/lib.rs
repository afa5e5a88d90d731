//! orc-core — shared types, error taxonomy, and config structs.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AgentProfile, AgentSettings, FileOperations, MultiAgentSettings, OrchestratorConfig, Secrets,
    SpawningRules, TimeoutOverrides,
};
pub use error::{Error, Result};
pub use types::*;

//! Config file shapes — `agent_config_multi_agent.json` and its sibling
//! `secrets.json`. Pure types and parsing only; loading/merging lives in the
//! `orc-cli` binary so library crates stay free of filesystem access.
//!
//! Field names and nesting mirror the documented config grammar exactly
//! (`multi_agent_settings`, `agent_profiles`, `spawning_rules`,
//! `agent_settings.timeout_overrides`, `file_operations`) so a config file
//! written against that grammar deserializes without translation.

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level config file shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub multi_agent_settings: MultiAgentSettings,
    pub agent_profiles: HashMap<String, AgentProfile>,
    pub spawning_rules: SpawningRules,
    pub agent_settings: AgentSettings,
    pub file_operations: FileOperations,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MultiAgentSettings {
    pub default_main_profile: String,
    pub default_sub_agent_profile: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub provider: String,
    pub url: String,
    pub model: String,
    /// A literal key, or the `"YOUR_API_KEY_HERE"` sentinel substituted from
    /// `secrets.json` at load time.
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub stream: bool,
    pub show_token_count: bool,
    pub show_thinking: bool,
    pub role: Option<String>,
    pub system_prompt_file: Option<String>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            provider: String::new(),
            url: String::new(),
            model: String::new(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            stream: true,
            show_token_count: false,
            show_thinking: false,
            role: None,
            system_prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpawningRules {
    pub auto_spawn_on_keywords: bool,
    pub require_confirmation: bool,
    /// Substring -> profile name, checked case-insensitively against each
    /// operator message before it's dispatched to the main agent.
    pub keywords: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub safe_mode: bool,
    pub timeout_seconds: u64,
    pub timeout_overrides: TimeoutOverrides,
    /// Not part of the documented grammar; the interpreter used by
    /// `execute_script` is a config value rather than baked into the tool
    /// name (see DESIGN.md's open-question #3).
    pub script_interpreter: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            safe_mode: true,
            timeout_seconds: 60,
            timeout_overrides: TimeoutOverrides::default(),
            script_interpreter: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutOverrides {
    pub code_execution: u64,
}

impl Default for TimeoutOverrides {
    fn default() -> Self {
        Self { code_execution: 180 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileOperations {
    pub allow_file_write: bool,
    pub allow_file_read: bool,
    pub allowed_directories: Vec<String>,
    pub max_file_size_kb: u64,
}

impl Default for FileOperations {
    fn default() -> Self {
        Self {
            allow_file_write: true,
            allow_file_read: true,
            allowed_directories: Vec::new(),
            max_file_size_kb: 500,
        }
    }
}

/// `secrets.json` shape: flat `"<provider>_api_key": "..."` entries (e.g.
/// `ollama_api_key`, `lm_studio_api_key`), read alongside the main config and
/// substituted for the `"YOUR_API_KEY_HERE"` sentinel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secrets {
    pub keys: HashMap<String, String>,
}

pub const API_KEY_SENTINEL: &str = "YOUR_API_KEY_HERE";

impl OrchestratorConfig {
    /// Resolve sentinel API keys against a loaded `Secrets` file, mirroring
    /// `load_multi_agent_config`'s substitution of `ollama_api_key` /
    /// `lm_studio_api_key` style entries by provider name.
    pub fn apply_secrets(&mut self, secrets: &Secrets) {
        for profile in self.agent_profiles.values_mut() {
            if profile.api_key.as_deref() == Some(API_KEY_SENTINEL) {
                let key_name = format!("{}_api_key", profile.provider);
                profile.api_key = secrets.keys.get(&key_name).cloned();
            }
        }
    }
}

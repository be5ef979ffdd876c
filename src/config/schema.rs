use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::types::AgentType;

/// The TOML file structure for evolution.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub project: Option<ProjectSection>,
    pub state: Option<StateSection>,
    pub runtime: Option<RuntimeSection>,
    pub agents: Option<AgentsSection>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectSection {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StateSection {
    /// Relative paths are resolved against the project root.
    pub directory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RuntimeSection {
    /// Agent CLI executable.
    pub cli_path: Option<String>,
    pub grace_period_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub recent_log_entries: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AgentsSection {
    pub coordinator: Option<AgentSection>,
    pub worker: Option<AgentSection>,
    pub evaluator: Option<AgentSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSection {
    pub timeout_minutes: Option<u64>,
    pub model: Option<String>,
    /// Custom prompt template. Relative paths are resolved against the project root.
    pub prompt: Option<String>,
}

/// Resolved settings for one agent type.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTypeConfig {
    pub timeout: Duration,
    pub model: Option<String>,
    pub prompt_override: Option<PathBuf>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_root: PathBuf,
    pub project_name: String,
    pub project_description: String,
    pub state_dir: PathBuf,
    pub cli_path: String,
    pub agents: HashMap<AgentType, AgentTypeConfig>,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub recent_log_entries: usize,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub project_root: Option<PathBuf>,
    pub project_name: Option<String>,
    pub project_description: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub cli_path: Option<String>,
    pub agents: HashMap<AgentType, AgentSection>,
    pub grace_period_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub recent_log_entries: Option<usize>,
}

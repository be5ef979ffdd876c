//! Value types shared by the agent runtime, the pool and the coordinator.
//!
//! Everything here derives [`serde::Serialize`] so it can be re-published on
//! the outward event stream and written into checkpoints without conversion.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an agent within a pool.
///
/// Generated ids look like `worker-1a2b3c4d`; callers may also supply their own.
pub type AgentId = String;

/// The role an agent plays in the evolution loop. Fixed for the agent's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Coordinator,
    Worker,
    Evaluator,
}

impl AgentType {
    pub const ALL: [AgentType; 3] = [AgentType::Coordinator, AgentType::Worker, AgentType::Evaluator];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Coordinator => "coordinator",
            AgentType::Worker => "worker",
            AgentType::Evaluator => "evaluator",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an agent.
///
/// `Idle -> Starting -> Running -> (Paused <-> Running) -> Stopping -> Stopped | Failed`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Failed,
}

impl AgentStatus {
    /// True while a run is in progress (a subprocess may be alive).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AgentStatus::Starting | AgentStatus::Running | AgentStatus::Paused | AgentStatus::Stopping
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Stopped | AgentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopping => "stopping",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of content an [`OutputLine`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Thinking,
    Text,
    ThinkingDelta,
    TextDelta,
    ToolUse,
    Result,
    Error,
}

/// A single typed line of agent output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: OutputKind,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutputLine {
    pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            content: content.into(),
            kind,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Record of a single tool invocation made by the agent's subprocess.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    #[serde(rename = "tool")]
    pub name: String,
    pub input: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

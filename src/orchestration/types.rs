//! Type definitions for the orchestration layer.
//!
//! These types are the shared vocabulary between the [`super::pool::AgentPool`],
//! the [`super::coordinator::CycleCoordinator`] and the outward event stream.
//! All of them derive [`serde::Serialize`] so they can be published as-is.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::types::AgentId;

/// What a cycle sets out to do. Declaration order is the order in which the
/// decision parser looks for each keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Evolve,
    Cleanup,
    Bugfix,
    Done,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [TaskType::Evolve, TaskType::Cleanup, TaskType::Bugfix, TaskType::Done];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Evolve => "EVOLVE",
            TaskType::Cleanup => "CLEANUP",
            TaskType::Bugfix => "BUGFIX",
            TaskType::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the cycle currently in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CyclePhase {
    Idle,
    Coordinating,
    Working,
    Evaluating,
    Completed,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "IDLE",
            CyclePhase::Coordinating => "COORDINATING",
            CyclePhase::Working => "WORKING",
            CyclePhase::Evaluating => "EVALUATING",
            CyclePhase::Completed => "COMPLETED",
            CyclePhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The coordinator's parsed instruction for one cycle. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorDecision {
    pub task_type: TaskType,
    pub description: String,
    /// The raw `<task>...</task>` block, or the description if there is none.
    pub task_block: String,
    pub files: Vec<String>,
    pub skills: Vec<String>,
}

/// Outcome of one cycle. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResult {
    pub cycle: u32,
    pub task_type: TaskType,
    pub description: String,
    pub success: bool,
    pub files_modified: Vec<String>,
    pub tools_used: HashMap<String, u64>,
    pub duration_seconds: f64,
    pub commit_hash: Option<String>,
    pub error: Option<String>,
}

impl CycleResult {
    /// A failed result for a cycle that never got a usable decision.
    pub fn failed(cycle: u32, error: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            cycle,
            task_type: TaskType::Evolve,
            description: "Unknown".to_string(),
            success: false,
            files_modified: Vec::new(),
            tools_used: HashMap::new(),
            duration_seconds,
            commit_hash: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Delegation,
    Waiting,
    DataFlow,
    Completed,
}

/// A directed audit edge between two agents. Only ever relabelled to
/// [`RelationshipKind::Completed`], never removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRelationship {
    pub source_id: AgentId,
    pub target_id: AgentId,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub task_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

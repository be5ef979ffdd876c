//! The outward event stream.
//!
//! The pool and the coordinator publish [`SuiteEvent`]s on a single
//! fire-and-forget [`EventSink`]. Consumers (the JSONL [`crate::logging::EventLog`],
//! a transport layer) drain the receiving end; a dropped receiver is ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::agent::types::{AgentId, AgentStatus, AgentType, OutputLine, ToolUse};
use crate::agent::usage::UsageMetrics;
use crate::orchestration::types::{AgentRelationship, CyclePhase, CycleResult};

/// A timestamped event, serialized as a flat JSON object tagged by `type`.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // -- Pool ---------------------------------------------------------------
    AgentSpawned {
        agent_id: AgentId,
        agent_type: AgentType,
        assigned_by: Option<AgentId>,
    },
    AgentOutput {
        agent_id: AgentId,
        line: OutputLine,
    },
    AgentToolUse {
        agent_id: AgentId,
        tool: ToolUse,
    },
    #[serde(rename = "agent_status")]
    AgentStatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
    },
    UsageUpdate {
        agent_id: AgentId,
        agent_type: AgentType,
        model: String,
        delta: UsageMetrics,
        total: UsageMetrics,
    },
    AgentKilled {
        agent_id: AgentId,
    },
    /// `target` is an agent id, or a role name for role-level guidance.
    GuidanceInjected {
        target: String,
        content_length: usize,
    },
    RelationshipChanged {
        relationship: AgentRelationship,
    },

    // -- Coordinator --------------------------------------------------------
    OrchestratorStarted {
        max_cycles: Option<u32>,
        dry_run: bool,
    },
    PhaseChanged {
        cycle: u32,
        phase: CyclePhase,
    },
    CycleStarted {
        cycle: u32,
    },
    CycleCompleted {
        result: CycleResult,
    },
    CycleFailed {
        result: CycleResult,
    },
    PromptPrepared {
        cycle: u32,
        agent_type: AgentType,
        prompt: String,
    },
    MaxCyclesReached {
        cycle: u32,
    },
    TooManyFailures {
        consecutive_failures: u32,
    },
    EvolutionComplete {
        cycle: u32,
    },
    StopRequested,
    ForceStopped,
    OrchestratorStopped {
        cycles_run: u32,
    },
}

pub type EventSender = mpsc::UnboundedSender<SuiteEvent>;

/// Fire-and-forget publisher. A sink without a sender drops every event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<EventSender>,
}

impl EventSink {
    pub fn new(tx: EventSender) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a sink together with the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SuiteEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn publish(&self, kind: EventKind) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(SuiteEvent {
                timestamp: Utc::now(),
                kind,
            });
        }
    }
}

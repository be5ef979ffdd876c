//! The agent pool: registry of live agents and the hub for their events.
//!
//! [`AgentPool`] owns every [`Agent`] it spawns. Each agent is wired to a
//! [`PoolRelay`] observer that re-publishes its output, tool uses, status
//! changes and usage on the pool's [`EventSink`] tagged with the agent id,
//! folds usage into the [`UsageLedger`] and checkpoints the agent on every
//! status change.
//!
//! **Concurrency model:** membership, the usage ledger and the relationship log
//! each sit behind their own `std::sync::Mutex`. None of them is held across an
//! `.await`; lifecycle calls clone the agent's `Arc` out of the map first.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;

use super::relationships::RelationshipLog;
use super::types::{AgentRelationship, RelationshipKind};
use super::usage_ledger::{DailyUsage, UsageLedger};
use crate::agent::process::ProcessLauncher;
use crate::agent::runtime::{Agent, AgentContext, AgentObserver, AgentSettings, AgentSnapshot};
use crate::agent::types::{AgentId, AgentStatus, AgentType, OutputLine, ToolUse};
use crate::agent::usage::UsageMetrics;
use crate::channel::{self, CheckpointStore, GuidanceStore};
use crate::error::AgentError;
use crate::events::{EventKind, EventSink};

/// Launch settings for each agent type.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    default: AgentSettings,
    per_type: HashMap<AgentType, AgentSettings>,
}

impl PoolSettings {
    /// Use `settings` for every agent type.
    pub fn uniform(settings: AgentSettings) -> Self {
        Self {
            default: settings,
            per_type: HashMap::new(),
        }
    }

    pub fn with(mut self, agent_type: AgentType, settings: AgentSettings) -> Self {
        self.per_type.insert(agent_type, settings);
        self
    }

    pub fn for_type(&self, agent_type: AgentType) -> &AgentSettings {
        self.per_type.get(&agent_type).unwrap_or(&self.default)
    }
}

/// External collaborators the pool hands to its agents.
#[derive(Clone)]
pub struct PoolCollaborators {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub guidance: Arc<dyn GuidanceStore>,
    pub checkpoints: Option<Arc<dyn CheckpointStore>>,
    pub events: EventSink,
}

/// Read-only view of the pool, recomputed on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub total_agents: usize,
    pub running_agents: usize,
    pub agents: BTreeMap<AgentType, Vec<AgentSnapshot>>,
    pub relationships: Vec<AgentRelationship>,
    pub total_usage: UsageMetrics,
}

struct PoolEntry {
    /// Spawn order; "first" agent of a type means lowest sequence.
    seq: u64,
    agent: Arc<Agent>,
}

struct PoolInner {
    settings: PoolSettings,
    collaborators: PoolCollaborators,
    agents: Mutex<HashMap<AgentId, PoolEntry>>,
    ledger: Mutex<UsageLedger>,
    relationships: Mutex<RelationshipLog>,
    next_seq: AtomicU64,
}

/// Shared handle to the pool. Cheap to clone.
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl AgentPool {
    pub fn new(settings: PoolSettings, collaborators: PoolCollaborators) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                settings,
                collaborators,
                agents: Mutex::new(HashMap::new()),
                ledger: Mutex::new(UsageLedger::default()),
                relationships: Mutex::new(RelationshipLog::default()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    fn events(&self) -> &EventSink {
        &self.inner.collaborators.events
    }

    // -- Membership ---------------------------------------------------------

    /// Create an agent and add it to the pool.
    ///
    /// Id collisions are not guarded against: a caller-supplied id that is
    /// already present replaces the existing entry.
    pub fn spawn(&self, agent_type: AgentType, id: Option<AgentId>, assigned_by: Option<AgentId>) -> Arc<Agent> {
        let id = id.unwrap_or_else(|| Agent::generate_id(agent_type));
        let relay: Arc<dyn AgentObserver> = Arc::new(PoolRelay {
            pool: Arc::downgrade(&self.inner),
        });
        let ctx = AgentContext {
            launcher: Arc::clone(&self.inner.collaborators.launcher),
            guidance: Arc::clone(&self.inner.collaborators.guidance),
            observer: Some(relay),
        };
        let settings = self.inner.settings.for_type(agent_type).clone();
        let agent = Arc::new(Agent::new(id.clone(), agent_type, assigned_by.clone(), settings, ctx));

        let assigner = {
            let mut agents = lock(&self.inner.agents);
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            agents.insert(
                id.clone(),
                PoolEntry {
                    seq,
                    agent: Arc::clone(&agent),
                },
            );
            assigned_by
                .as_ref()
                .and_then(|a| agents.get(a))
                .map(|e| Arc::clone(&e.agent))
        };

        tracing::info!(agent_id = %id, agent_type = %agent_type, assigned_by = ?assigned_by, "Spawned agent");
        self.events().publish(EventKind::AgentSpawned {
            agent_id: id.clone(),
            agent_type,
            assigned_by: assigned_by.clone(),
        });

        if let Some(assigner_id) = assigned_by {
            if let Some(assigner) = assigner {
                assigner.add_delegate(&id);
            }
            self.add_relationship(&assigner_id, &id, RelationshipKind::Delegation, None);
        }

        agent
    }

    /// First reusable (not active) agent of `agent_type`, in spawn order.
    pub fn get_idle_agent(&self, agent_type: AgentType) -> Option<Arc<Agent>> {
        let agents = lock(&self.inner.agents);
        agents
            .values()
            .filter(|e| e.agent.agent_type() == agent_type && !e.agent.status().is_active())
            .min_by_key(|e| e.seq)
            .map(|e| Arc::clone(&e.agent))
    }

    pub fn get_or_spawn_agent(&self, agent_type: AgentType) -> Arc<Agent> {
        match self.get_idle_agent(agent_type) {
            Some(agent) => agent,
            None => self.spawn(agent_type, None, None),
        }
    }

    pub fn get_agent(&self, id: &str) -> Option<Arc<Agent>> {
        lock(&self.inner.agents).get(id).map(|e| Arc::clone(&e.agent))
    }

    fn require(&self, id: &str) -> Result<Arc<Agent>, AgentError> {
        self.get_agent(id).ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    /// Agents in spawn order, optionally filtered by type.
    pub fn list_agents(&self, agent_type: Option<AgentType>) -> Vec<Arc<Agent>> {
        let agents = lock(&self.inner.agents);
        let mut entries: Vec<&PoolEntry> = agents
            .values()
            .filter(|e| agent_type.is_none_or(|t| e.agent.agent_type() == t))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| Arc::clone(&e.agent)).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.agents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Lifecycle ----------------------------------------------------------

    pub async fn start_agent(&self, id: &str, prompt: &str) -> Result<(), AgentError> {
        self.require(id)?.start(prompt).await
    }

    pub fn pause_agent(&self, id: &str) -> Result<(), AgentError> {
        self.require(id)?.pause();
        Ok(())
    }

    pub fn resume_agent(&self, id: &str) -> Result<(), AgentError> {
        self.require(id)?.resume();
        Ok(())
    }

    pub async fn stop_agent(&self, id: &str) -> Result<(), AgentError> {
        self.require(id)?.stop().await;
        Ok(())
    }

    /// Kill the agent's process and remove it from the pool.
    pub async fn kill_agent(&self, id: &str) -> Result<(), AgentError> {
        let agent = lock(&self.inner.agents)
            .remove(id)
            .map(|e| e.agent)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        // Removed first so the final status change is not checkpointed.
        agent.kill().await;

        if let Some(checkpoints) = &self.inner.collaborators.checkpoints {
            if let Err(e) = checkpoints.clear(id) {
                tracing::warn!(agent_id = %id, "Failed to clear checkpoint: {e}");
            }
        }

        tracing::info!(agent_id = %id, "Killed agent");
        self.events().publish(EventKind::AgentKilled { agent_id: id.to_string() });
        Ok(())
    }

    /// Gracefully stop every agent concurrently.
    pub async fn stop_all(&self) {
        let agents = self.list_agents(None);
        join_all(agents.iter().map(|a| a.stop())).await;
    }

    /// Kill every agent process immediately, keeping pool membership.
    pub async fn force_stop_all(&self) {
        let agents = self.list_agents(None);
        join_all(agents.iter().map(|a| a.kill())).await;
    }

    /// Kill and remove every agent.
    pub async fn kill_all(&self) {
        let ids: Vec<AgentId> = self.list_agents(None).iter().map(|a| a.id().to_string()).collect();
        join_all(ids.iter().map(|id| self.kill_agent(id))).await;
    }

    // -- Guidance -----------------------------------------------------------

    pub fn inject_guidance(&self, id: &str, text: &str) -> Result<(), AgentError> {
        let agent = self.require(id)?;
        if let Err(e) = agent.inject_guidance(text) {
            tracing::warn!(agent_id = %id, "Failed to queue guidance: {e}");
            return Ok(());
        }
        self.events().publish(EventKind::GuidanceInjected {
            target: id.to_string(),
            content_length: text.len(),
        });
        Ok(())
    }

    /// Queue guidance for every agent of `agent_type`. Returns how many agents
    /// received it.
    pub fn broadcast_guidance(&self, agent_type: AgentType, text: &str) -> usize {
        self.list_agents(Some(agent_type))
            .iter()
            .filter(|a| self.inject_guidance(a.id(), text).is_ok())
            .count()
    }

    /// Queue guidance for the next prompt built for `agent_type`, whichever
    /// agent ends up running it.
    pub fn inject_role_guidance(&self, agent_type: AgentType, text: &str) -> std::io::Result<()> {
        let store = self.inner.collaborators.guidance.as_ref();
        channel::queue_guidance(store, agent_type.as_str(), text)?;
        self.events().publish(EventKind::GuidanceInjected {
            target: agent_type.as_str().to_string(),
            content_length: text.len(),
        });
        Ok(())
    }

    /// Role-level guidance for `agent_type`, left queued.
    pub fn peek_role_guidance(&self, agent_type: AgentType) -> Option<String> {
        match self.inner.collaborators.guidance.read(agent_type.as_str()) {
            Ok(guidance) => guidance,
            Err(e) => {
                tracing::warn!(role = %agent_type, "Failed to read role guidance: {e}");
                None
            }
        }
    }

    /// Read and clear role-level guidance for `agent_type`.
    pub fn take_role_guidance(&self, agent_type: AgentType) -> Option<String> {
        let store = self.inner.collaborators.guidance.as_ref();
        match channel::take_guidance(store, agent_type.as_str()) {
            Ok(guidance) => guidance,
            Err(e) => {
                tracing::warn!(role = %agent_type, "Failed to read role guidance: {e}");
                None
            }
        }
    }

    // -- Relationships ------------------------------------------------------

    pub fn add_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        kind: RelationshipKind,
        task_description: Option<String>,
    ) -> AgentRelationship {
        let relationship = lock(&self.inner.relationships).add(source_id, target_id, kind, task_description);
        if kind == RelationshipKind::Waiting {
            if let Some(source) = self.get_agent(source_id) {
                source.set_waiting_for(Some(target_id.to_string()));
            }
        }
        self.events().publish(EventKind::RelationshipChanged {
            relationship: relationship.clone(),
        });
        relationship
    }

    pub fn clear_waiting(&self, agent_id: &str) {
        if let Some(agent) = self.get_agent(agent_id) {
            agent.set_waiting_for(None);
        }
        let changed = lock(&self.inner.relationships).complete_waiting(agent_id);
        for relationship in changed {
            self.events().publish(EventKind::RelationshipChanged { relationship });
        }
    }

    pub fn relationships(&self) -> Vec<AgentRelationship> {
        lock(&self.inner.relationships).all().to_vec()
    }

    pub fn active_relationships(&self) -> Vec<AgentRelationship> {
        lock(&self.inner.relationships).active()
    }

    // -- Usage --------------------------------------------------------------

    pub fn total_usage(&self) -> UsageMetrics {
        lock(&self.inner.ledger).total()
    }

    pub fn today_usage(&self) -> DailyUsage {
        lock(&self.inner.ledger).day(today())
    }

    pub fn usage_history(&self, days: u32) -> Vec<DailyUsage> {
        lock(&self.inner.ledger).history(today(), days)
    }

    pub fn record_cycle(&self, success: bool) {
        lock(&self.inner.ledger).record_cycle(today(), success);
    }

    // -- Status -------------------------------------------------------------

    pub fn get_status(&self) -> PoolStatus {
        let agents = self.list_agents(None);
        let mut by_type: BTreeMap<AgentType, Vec<AgentSnapshot>> =
            AgentType::ALL.iter().map(|t| (*t, Vec::new())).collect();
        for agent in &agents {
            by_type.entry(agent.agent_type()).or_default().push(agent.snapshot());
        }
        PoolStatus {
            total_agents: agents.len(),
            running_agents: agents.iter().filter(|a| a.status() == AgentStatus::Running).count(),
            agents: by_type,
            relationships: self.active_relationships(),
            total_usage: self.total_usage(),
        }
    }
}

/// Observer installed on every pooled agent.
///
/// Holds a weak reference so agents do not keep the pool alive.
struct PoolRelay {
    pool: Weak<PoolInner>,
}

impl AgentObserver for PoolRelay {
    fn on_output(&self, agent: &Agent, line: &OutputLine) {
        if let Some(pool) = self.pool.upgrade() {
            pool.collaborators.events.publish(EventKind::AgentOutput {
                agent_id: agent.id().to_string(),
                line: line.clone(),
            });
        }
    }

    fn on_tool_use(&self, agent: &Agent, tool: &ToolUse) {
        if let Some(pool) = self.pool.upgrade() {
            pool.collaborators.events.publish(EventKind::AgentToolUse {
                agent_id: agent.id().to_string(),
                tool: tool.clone(),
            });
        }
    }

    fn on_status(&self, agent: &Agent, status: AgentStatus) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        pool.collaborators.events.publish(EventKind::AgentStatusChanged {
            agent_id: agent.id().to_string(),
            status,
        });
        if let Some(checkpoints) = &pool.collaborators.checkpoints {
            if !lock(&pool.agents).contains_key(agent.id()) {
                return;
            }
            if let Err(e) = checkpoints.save(agent.id(), &agent.snapshot()) {
                tracing::warn!(agent_id = %agent.id(), "Failed to checkpoint agent: {e}");
            }
        }
    }

    fn on_usage(&self, agent: &Agent, delta: &UsageMetrics) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let model = agent.model().unwrap_or_else(|| "unknown".to_string());
        lock(&pool.ledger).record_usage(today(), agent.agent_type(), &model, delta);
        pool.collaborators.events.publish(EventKind::UsageUpdate {
            agent_id: agent.id().to_string(),
            agent_type: agent.agent_type(),
            model,
            delta: *delta,
            total: agent.usage(),
        });
    }
}

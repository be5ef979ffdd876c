//! The evolution loop.
//!
//! Each cycle runs `IDLE -> COORDINATING -> WORKING -> EVALUATING ->
//! COMPLETED | FAILED`: a coordinator agent picks a task, a worker agent
//! carries it out, and a failed worker has its changes rolled back. Every
//! cycle produces exactly one [`CycleResult`], success or not; the run ends on
//! a DONE decision, the cycle limit, three consecutive failures, or a stop
//! request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use super::decision::parse_decision;
use super::pool::{AgentPool, PoolStatus};
use super::prompts::{guidance_section, render, PromptLibrary};
use super::state_files::{StateFiles, PROJECT_FILE, STATE_FILE};
use super::types::{CoordinatorDecision, CyclePhase, CycleResult, TaskType};
use super::vcs::VersionControl;
use crate::agent::types::{AgentStatus, AgentType, OutputKind};
use crate::error::CycleError;
use crate::events::{EventKind, EventSink};

/// Consecutive failed cycles after which the run gives up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Number of cycles included in [`CoordinatorStatus::recent_cycles`].
const STATUS_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Cycle log entries included in the coordinator prompt.
    pub recent_log_entries: usize,
    /// Used when the state directory has no project file.
    pub project_description: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            recent_log_entries: 10,
            project_description: String::new(),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    MaxCyclesReached,
    TooManyFailures,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub running: bool,
    pub cycle: u32,
    pub phase: CyclePhase,
    pub pool: PoolStatus,
    pub recent_cycles: Vec<CycleResult>,
}

struct RunState {
    cycle: u32,
    phase: CyclePhase,
    running: bool,
    history: Vec<CycleResult>,
}

/// What the worker phase produced.
struct WorkerOutcome {
    success: bool,
    files_modified: Vec<String>,
    tools_used: std::collections::HashMap<String, u64>,
    error: Option<String>,
}

pub struct CycleCoordinator {
    pool: AgentPool,
    vcs: Arc<dyn VersionControl>,
    prompts: PromptLibrary,
    state_files: StateFiles,
    events: EventSink,
    settings: CoordinatorSettings,
    state: Mutex<RunState>,
    stop_requested: AtomicBool,
    force_stopped: AtomicBool,
}

impl CycleCoordinator {
    pub fn new(
        pool: AgentPool,
        vcs: Arc<dyn VersionControl>,
        prompts: PromptLibrary,
        state_files: StateFiles,
        events: EventSink,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            pool,
            vcs,
            prompts,
            state_files,
            events,
            settings,
            state: Mutex::new(RunState {
                cycle: 0,
                phase: CyclePhase::Idle,
                running: false,
                history: Vec::new(),
            }),
            stop_requested: AtomicBool::new(false),
            force_stopped: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn cycle(&self) -> u32 {
        self.state().cycle
    }

    pub fn phase(&self) -> CyclePhase {
        self.state().phase
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn history(&self) -> Vec<CycleResult> {
        self.state().history.clone()
    }

    // -- Run loop -----------------------------------------------------------

    pub async fn run(&self, max_cycles: Option<u32>, dry_run: bool) -> RunOutcome {
        self.state().running = true;
        self.stop_requested.store(false, Ordering::SeqCst);
        self.force_stopped.store(false, Ordering::SeqCst);
        let mut consecutive_failures = 0;
        let mut cycles_run = 0;

        tracing::info!(max_cycles = ?max_cycles, dry_run, "Starting evolution run");
        self.events.publish(EventKind::OrchestratorStarted { max_cycles, dry_run });

        let outcome = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break RunOutcome::Stopped;
            }

            let next = self.cycle() + 1;
            if let Some(max) = max_cycles {
                if next > max {
                    tracing::info!(max_cycles = max, "Maximum cycles reached");
                    self.events.publish(EventKind::MaxCyclesReached { cycle: max });
                    break RunOutcome::MaxCyclesReached;
                }
            }
            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                tracing::warn!(consecutive_failures, "Too many consecutive failures, stopping");
                self.events.publish(EventKind::TooManyFailures { consecutive_failures });
                break RunOutcome::TooManyFailures;
            }

            self.state().cycle = next;
            cycles_run += 1;
            let result = self.run_cycle(dry_run).await;

            if result.success {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
            }

            if result.task_type == TaskType::Done && result.success {
                tracing::info!(cycle = next, reason = %result.description, "Evolution complete");
                self.events.publish(EventKind::EvolutionComplete { cycle: next });
                break RunOutcome::Done;
            }
        };

        {
            let mut state = self.state();
            state.running = false;
            state.phase = CyclePhase::Idle;
        }
        self.events.publish(EventKind::PhaseChanged {
            cycle: self.cycle(),
            phase: CyclePhase::Idle,
        });
        tracing::info!(cycles_run, outcome = ?outcome, "Evolution run stopped");
        self.events.publish(EventKind::OrchestratorStopped { cycles_run });
        outcome
    }

    /// Run one cycle with the current cycle number and record its result.
    pub async fn run_cycle(&self, dry_run: bool) -> CycleResult {
        let cycle = self.cycle();
        let started = Instant::now();
        tracing::info!(cycle, "Cycle started");
        self.events.publish(EventKind::CycleStarted { cycle });

        let result = match self.execute_cycle(cycle, dry_run, started).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(cycle, "Cycle failed: {e}");
                CycleResult::failed(cycle, e.to_string(), started.elapsed().as_secs_f64())
            }
        };

        self.record(&result, dry_run);
        result
    }

    async fn execute_cycle(&self, cycle: u32, dry_run: bool, started: Instant) -> Result<CycleResult, CycleError> {
        self.set_phase(cycle, CyclePhase::Coordinating);
        let decision = self.run_coordinator(cycle, dry_run).await?;
        tracing::info!(cycle, task_type = %decision.task_type, "Coordinator decided: {}", decision.description);

        if decision.task_type == TaskType::Done {
            return Ok(CycleResult {
                cycle,
                task_type: TaskType::Done,
                description: decision.description,
                success: true,
                files_modified: Vec::new(),
                tools_used: Default::default(),
                duration_seconds: started.elapsed().as_secs_f64(),
                commit_hash: None,
                error: None,
            });
        }

        self.set_phase(cycle, CyclePhase::Working);
        let outcome = self.run_worker(cycle, &decision, dry_run).await?;

        if !outcome.success || self.force_stopped.load(Ordering::SeqCst) {
            let error = outcome
                .error
                .or_else(|| {
                    self.force_stopped
                        .load(Ordering::SeqCst)
                        .then(|| "Force stopped".to_string())
                })
                .unwrap_or_else(|| "Worker failed".to_string());
            tracing::warn!(cycle, "Worker failed: {error}");
            self.rollback().await;
            return Ok(CycleResult {
                cycle,
                task_type: decision.task_type,
                description: decision.description,
                success: false,
                files_modified: outcome.files_modified,
                tools_used: outcome.tools_used,
                duration_seconds: started.elapsed().as_secs_f64(),
                commit_hash: None,
                error: Some(error),
            });
        }

        // Evaluation is a pass-through for now.
        self.set_phase(cycle, CyclePhase::Evaluating);

        let commit_hash = if dry_run { None } else { self.vcs.head_commit().await };
        Ok(CycleResult {
            cycle,
            task_type: decision.task_type,
            description: decision.description,
            success: true,
            files_modified: outcome.files_modified,
            tools_used: outcome.tools_used,
            duration_seconds: started.elapsed().as_secs_f64(),
            commit_hash,
            error: None,
        })
    }

    /// Append to history, count it, log it and announce it.
    fn record(&self, result: &CycleResult, dry_run: bool) {
        self.state().history.push(result.clone());

        if !dry_run {
            self.pool.record_cycle(result.success);
            if let Err(e) = self.state_files.append_cycle(result) {
                tracing::warn!(cycle = result.cycle, "Failed to append cycle log: {e}");
            }
        }

        if result.success {
            self.set_phase(result.cycle, CyclePhase::Completed);
            if !dry_run && result.task_type != TaskType::Done {
                if let Err(e) = self.state_files.update_state(result.cycle, Utc::now()) {
                    tracing::warn!(cycle = result.cycle, "Failed to update state file: {e}");
                }
            }
            tracing::info!(cycle = result.cycle, "Cycle completed");
            self.events.publish(EventKind::CycleCompleted { result: result.clone() });
        } else {
            self.set_phase(result.cycle, CyclePhase::Failed);
            self.events.publish(EventKind::CycleFailed { result: result.clone() });
        }
    }

    // -- Phases -------------------------------------------------------------

    async fn run_coordinator(&self, cycle: u32, dry_run: bool) -> Result<CoordinatorDecision, CycleError> {
        let prompt = self.build_coordinator_prompt()?;

        if dry_run {
            self.events.publish(EventKind::PromptPrepared {
                cycle,
                agent_type: AgentType::Coordinator,
                prompt,
            });
            return Ok(CoordinatorDecision {
                task_type: TaskType::Done,
                description: "Dry run - no action".to_string(),
                task_block: String::new(),
                files: Vec::new(),
                skills: Vec::new(),
            });
        }

        let agent = self.pool.get_or_spawn_agent(AgentType::Coordinator);
        agent.set_current_task(Some("Deciding next evolution task".to_string()));
        agent.start(&prompt).await?;
        self.consume_role_guidance(AgentType::Coordinator);
        let status = agent.wait_until_finished().await;

        if self.force_stopped.load(Ordering::SeqCst) {
            self.rollback().await;
            return Err(CycleError::CoordinatorFailed("Force stopped".to_string()));
        }
        if status == AgentStatus::Failed {
            let error = agent.error().unwrap_or_else(|| "Coordinator agent failed".to_string());
            return Err(CycleError::CoordinatorFailed(error));
        }

        let output = agent
            .current_run_output()
            .into_iter()
            .filter(|line| matches!(line.kind, OutputKind::Text | OutputKind::Result))
            .map(|line| line.content)
            .collect::<Vec<_>>()
            .join("\n");
        parse_decision(&output).ok_or(CycleError::ParseFailure)
    }

    async fn run_worker(
        &self,
        cycle: u32,
        decision: &CoordinatorDecision,
        dry_run: bool,
    ) -> Result<WorkerOutcome, CycleError> {
        let prompt = self.build_worker_prompt(decision)?;

        if dry_run {
            self.events.publish(EventKind::PromptPrepared {
                cycle,
                agent_type: AgentType::Worker,
                prompt,
            });
            return Ok(WorkerOutcome {
                success: true,
                files_modified: Vec::new(),
                tools_used: Default::default(),
                error: None,
            });
        }

        let agent = self.pool.get_or_spawn_agent(AgentType::Worker);
        agent.set_current_task(Some(decision.description.clone()));
        if let Err(e) = agent.start(&prompt).await {
            return Ok(WorkerOutcome {
                success: false,
                files_modified: Vec::new(),
                tools_used: Default::default(),
                error: Some(e.to_string()),
            });
        }
        self.consume_role_guidance(AgentType::Worker);
        let status = agent.wait_until_finished().await;
        let error = agent.error();

        Ok(WorkerOutcome {
            success: status != AgentStatus::Failed && error.is_none(),
            files_modified: agent.files_modified(),
            tools_used: agent.tool_counts(),
            error,
        })
    }

    /// Revert the working tree. Failures are logged and otherwise ignored.
    async fn rollback(&self) {
        tracing::info!("Rolling back working tree");
        if let Err(e) = self.vcs.reset_hard().await {
            tracing::warn!("Rollback reset failed: {e}");
        }
        if let Err(e) = self.vcs.clean_untracked().await {
            tracing::warn!("Rollback clean failed: {e}");
        }
    }

    // -- Prompts ------------------------------------------------------------

    fn project_description(&self) -> Result<String, CycleError> {
        let project = self.state_files.read(PROJECT_FILE)?;
        if project.trim().is_empty() {
            Ok(self.settings.project_description.clone())
        } else {
            Ok(project)
        }
    }

    /// Role guidance stays queued until an agent has actually been launched
    /// with it.
    fn consume_role_guidance(&self, agent_type: AgentType) {
        if self.pool.take_role_guidance(agent_type).is_some() {
            tracing::debug!(agent_type = %agent_type, "Consumed role guidance");
        }
    }

    fn build_coordinator_prompt(&self) -> Result<String, CycleError> {
        let template = self.prompts.load(AgentType::Coordinator)?;
        let state = self.state_files.read(STATE_FILE)?;
        let log = self.state_files.recent_log_entries(self.settings.recent_log_entries)?;
        let project = self.project_description()?;
        let guidance = guidance_section(self.pool.peek_role_guidance(AgentType::Coordinator).as_deref());

        Ok(render(
            &template,
            &[
                ("STATE", &state),
                ("LOG", &log),
                ("PROJECT", &project),
                ("INJECTED_GUIDANCE", &guidance),
            ],
        ))
    }

    fn build_worker_prompt(&self, decision: &CoordinatorDecision) -> Result<String, CycleError> {
        let template = self.prompts.load(AgentType::Worker)?;
        let project = self.project_description()?;
        let guidance = guidance_section(self.pool.peek_role_guidance(AgentType::Worker).as_deref());

        Ok(render(
            &template,
            &[
                ("TASK_TYPE", decision.task_type.as_str()),
                ("TASK_XML", &decision.task_block),
                ("PROJECT", &project),
                ("INJECTED_GUIDANCE", &guidance),
            ],
        ))
    }

    // -- Control ------------------------------------------------------------

    fn set_phase(&self, cycle: u32, phase: CyclePhase) {
        self.state().phase = phase;
        tracing::debug!(cycle, phase = %phase, "Phase changed");
        self.events.publish(EventKind::PhaseChanged { cycle, phase });
    }

    /// Cooperative stop: the in-flight cycle finishes first.
    pub fn stop(&self) {
        tracing::info!("Stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
        self.events.publish(EventKind::StopRequested);
    }

    /// Stop now: kill every agent process. A cycle in flight is recorded as
    /// failed and rolled back.
    pub async fn force_stop(&self) {
        tracing::warn!("Force stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
        self.force_stopped.store(true, Ordering::SeqCst);
        self.state().running = false;
        self.events.publish(EventKind::ForceStopped);
        self.pool.force_stop_all().await;
    }

    pub fn status(&self) -> CoordinatorStatus {
        let (running, cycle, phase, recent_cycles) = {
            let state = self.state();
            let skip = state.history.len().saturating_sub(STATUS_HISTORY_LEN);
            (state.running, state.cycle, state.phase, state.history[skip..].to_vec())
        };
        CoordinatorStatus {
            running,
            cycle,
            phase,
            pool: self.pool.get_status(),
            recent_cycles,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::agent::process::{CommandSpec, ProcessHandle, ProcessLauncher};
    use crate::agent::runtime::AgentSettings;
    use crate::channel::MemoryChannel;
    use crate::error::VcsError;
    use crate::orchestration::pool::{PoolCollaborators, PoolSettings};

    struct NoLaunch;

    #[async_trait]
    impl ProcessLauncher for NoLaunch {
        async fn launch(&self, _command: &CommandSpec) -> std::io::Result<Box<dyn ProcessHandle>> {
            Err(std::io::Error::other("launching is disabled in this test"))
        }
    }

    struct NoVcs;

    #[async_trait]
    impl VersionControl for NoVcs {
        async fn reset_hard(&self) -> Result<(), VcsError> {
            Ok(())
        }
        async fn clean_untracked(&self) -> Result<(), VcsError> {
            Ok(())
        }
        async fn head_commit(&self) -> Option<String> {
            None
        }
    }

    fn coordinator(state_dir: &Path) -> (CycleCoordinator, tokio::sync::mpsc::UnboundedReceiver<crate::events::SuiteEvent>) {
        let (events, rx) = EventSink::channel();
        let pool = AgentPool::new(
            PoolSettings::uniform(AgentSettings::new(state_dir)),
            PoolCollaborators {
                launcher: Arc::new(NoLaunch),
                guidance: Arc::new(MemoryChannel::default()),
                checkpoints: None,
                events: events.clone(),
            },
        );
        let coordinator = CycleCoordinator::new(
            pool,
            Arc::new(NoVcs),
            PromptLibrary::default(),
            StateFiles::new(state_dir),
            events,
            CoordinatorSettings {
                recent_log_entries: 10,
                project_description: "A test project".to_string(),
            },
        );
        (coordinator, rx)
    }

    #[tokio::test]
    async fn dry_run_worker_renders_task_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, mut rx) = coordinator(dir.path());
        let decision = parse_decision("BUGFIX: fix off-by-one\n\n<task><files>src/lib.rs</files></task>").unwrap();

        let outcome = coordinator.run_worker(1, &decision, true).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.files_modified.is_empty());
        assert!(coordinator.pool().is_empty());

        let (agent_type, prompt) = match rx.try_recv().unwrap().kind {
            EventKind::PromptPrepared { agent_type, prompt, .. } => (agent_type, prompt),
            other => panic!("expected prompt_prepared, got {other:?}"),
        };
        assert_eq!(agent_type, AgentType::Worker);
        assert!(prompt.contains("## Task (BUGFIX)"));
        assert!(prompt.contains("<files>src/lib.rs</files>"));
        assert!(prompt.contains("A test project"));
        assert!(!prompt.contains("{{"));
    }

    #[tokio::test]
    async fn coordinator_prompt_merges_and_consumes_role_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _rx) = coordinator(dir.path());
        StateFiles::new(dir.path()).init().unwrap();
        std::fs::write(dir.path().join(PROJECT_FILE), "Project from file").unwrap();
        coordinator
            .pool()
            .inject_role_guidance(AgentType::Coordinator, "Focus on the CLI")
            .unwrap();

        let peeked = coordinator.build_coordinator_prompt().unwrap();
        assert!(peeked.contains("## Injected Guidance\n\nFocus on the CLI"));

        let prompt = coordinator.build_coordinator_prompt().unwrap();
        assert!(prompt.contains("Focus on the CLI"));
        assert!(prompt.contains("Project from file"));
        assert!(prompt.contains("**Cycle**: 0"));
        assert!(prompt.contains("# Evolution Log"));

        let again = coordinator.build_coordinator_prompt().unwrap();
        assert!(!again.contains("Injected Guidance"));
    }

    #[tokio::test]
    async fn launch_failure_fails_the_cycle_without_stopping_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _rx) = coordinator(dir.path());

        let outcome = coordinator.run(Some(2), false).await;
        assert_eq!(outcome, RunOutcome::MaxCyclesReached);

        let history = coordinator.history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| !r.success));
        assert!(history[0].error.as_deref().unwrap().contains("launching is disabled"));
        assert_eq!(coordinator.pool().today_usage().cycles, 2);
        assert_eq!(coordinator.status().recent_cycles.len(), 2);
        assert!(!coordinator.is_running());
    }
}

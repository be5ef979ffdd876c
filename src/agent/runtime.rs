//! The agent runtime: one subprocess, end to end.
//!
//! An [`Agent`] launches the agent CLI, turns its streamed stdout into typed
//! [`OutputLine`]s and [`ToolUse`]s, and supports pause/resume, graceful stop,
//! kill and a wall-clock timeout. Everything it emits goes to an optional
//! [`AgentObserver`]; the pool uses that to re-publish events tagged with the
//! agent's id.
//!
//! Failures inside a run never come back as `Err`: they are recorded as the
//! agent's error string and a `Failed` status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::command::build_command;
use super::gate::PauseGate;
use super::output::OutputBuffer;
use super::process::{ProcessHandle, ProcessLauncher};
use super::stream::{decode_line, modified_file, LineAssembler, StreamItem};
use super::types::{AgentId, AgentStatus, AgentType, OutputKind, OutputLine, ToolUse};
use super::usage::UsageMetrics;
use crate::channel::{self, GuidanceStore};
use crate::error::AgentError;

/// Maximum length of the goal derived from a prompt's first line.
const GOAL_MAX_CHARS: usize = 200;

/// Receives everything an agent emits.
///
/// Called from the agent's stream task without any agent lock held, so
/// implementations may call back into the agent (e.g. [`Agent::snapshot`]).
pub trait AgentObserver: Send + Sync {
    fn on_output(&self, _agent: &Agent, _line: &OutputLine) {}

    fn on_tool_use(&self, _agent: &Agent, _tool: &ToolUse) {}

    fn on_status(&self, _agent: &Agent, _status: AgentStatus) {}

    /// `delta` is the usage of a single request, already priced.
    fn on_usage(&self, _agent: &Agent, _delta: &UsageMetrics) {}
}

/// Per-agent launch settings, resolved from config by the pool.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub cli_path: String,
    pub project_root: PathBuf,
    pub model: Option<String>,
    pub timeout: Duration,
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

impl AgentSettings {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: "claude".to_string(),
            project_root: project_root.into(),
            model: None,
            timeout: Duration::from_secs(30 * 60),
            grace_period: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Collaborators shared by every agent in a pool.
#[derive(Clone)]
pub struct AgentContext {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub guidance: Arc<dyn GuidanceStore>,
    pub observer: Option<Arc<dyn AgentObserver>>,
}

/// Serializable view of an agent, used for status reports and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub id: AgentId,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub goal: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_modified: Vec<String>,
    pub tools_used: usize,
    pub output_lines: usize,
    pub error: Option<String>,
    pub model: Option<String>,
    pub usage: UsageMetrics,
    pub assigned_by: Option<AgentId>,
    pub delegated_to: Vec<AgentId>,
    pub waiting_for: Option<AgentId>,
}

#[derive(Default)]
struct AgentState {
    current_task: Option<String>,
    goal: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    output: OutputBuffer,
    tool_uses: Vec<ToolUse>,
    files_modified: Vec<String>,
    error: Option<String>,
    usage: UsageMetrics,
    model: Option<String>,
    assigned_by: Option<AgentId>,
    delegated_to: Vec<AgentId>,
    waiting_for: Option<AgentId>,
}

/// Cancellation handles for the current run.
#[derive(Clone)]
struct RunControl {
    stop: CancellationToken,
    kill: CancellationToken,
}

impl RunControl {
    fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            kill: CancellationToken::new(),
        }
    }
}

enum RunEnd {
    Exited,
    Stopped,
    Killed,
    TimedOut,
    ReadFailed(String),
}

pub struct Agent {
    id: AgentId,
    agent_type: AgentType,
    settings: AgentSettings,
    ctx: AgentContext,
    state: Mutex<AgentState>,
    status_tx: watch::Sender<AgentStatus>,
    gate: PauseGate,
    run: Mutex<Option<RunControl>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("agent_type", &self.agent_type)
            .field("status", &self.status())
            .finish()
    }
}

impl Agent {
    pub fn new(
        id: AgentId,
        agent_type: AgentType,
        assigned_by: Option<AgentId>,
        settings: AgentSettings,
        ctx: AgentContext,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(AgentStatus::Idle);
        Self {
            id,
            agent_type,
            settings,
            ctx,
            state: Mutex::new(AgentState {
                assigned_by,
                ..Default::default()
            }),
            status_tx,
            gate: PauseGate::new(),
            run: Mutex::new(None),
        }
    }

    /// Generate an id of the form `{type}-{8 hex chars}`.
    pub fn generate_id(agent_type: AgentType) -> AgentId {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", agent_type, &hex[..8])
    }

    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_control(&self) -> Option<RunControl> {
        self.run.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Launch the agent CLI with `prompt` and start streaming its output.
    ///
    /// Returns once the process is running; use [`Agent::wait_until_finished`]
    /// to wait for the run to end.
    pub async fn start(self: &Arc<Self>, prompt: &str) -> Result<(), AgentError> {
        // Claim and install the run control together, so a stop or kill that
        // sees `Starting` always finds something to cancel.
        let control = {
            let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
            let mut claimed = false;
            self.status_tx.send_if_modified(|status| {
                if status.is_active() {
                    return false;
                }
                *status = AgentStatus::Starting;
                claimed = true;
                true
            });
            if !claimed {
                return Err(AgentError::AlreadyRunning(self.id.clone()));
            }
            let control = RunControl::new();
            *run = Some(control.clone());
            control
        };

        let prompt = self.merge_guidance(prompt);
        {
            let mut state = self.state();
            state.goal = Some(derive_goal(&prompt));
            state.started_at = Some(Utc::now());
            state.finished_at = None;
            state.error = None;
            state.tool_uses.clear();
            state.files_modified.clear();
        }
        self.gate.open();
        self.notify_status(AgentStatus::Starting);

        let command = build_command(
            &self.settings.cli_path,
            self.agent_type,
            self.settings.model.as_deref(),
            &prompt,
            &self.settings.project_root,
        );

        let handle = match self.ctx.launcher.launch(&command).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(agent_id = %self.id, "Failed to launch agent: {e}");
                self.state().error = Some(e.to_string());
                self.emit_output(OutputLine::new(OutputKind::Error, format!("Agent failed: {e}")));
                *self.run.lock().unwrap_or_else(|e| e.into_inner()) = None;
                self.finish(AgentStatus::Failed);
                return Err(AgentError::LaunchFailed(e.to_string()));
            }
        };

        // A stop during launch has already moved the status on; the stream
        // task sees the cancelled control on its first iteration.
        let running = self.status_tx.send_if_modified(|status| {
            if *status != AgentStatus::Starting {
                return false;
            }
            *status = AgentStatus::Running;
            true
        });
        if running {
            self.notify_status(AgentStatus::Running);
            tracing::info!(agent_id = %self.id, agent_type = %self.agent_type, "Agent started");
        }

        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.drive(handle, control).await });
        Ok(())
    }

    /// Close the pause gate. No-op unless running.
    pub fn pause(&self) {
        let paused = self.status_tx.send_if_modified(|status| {
            if *status != AgentStatus::Running {
                return false;
            }
            *status = AgentStatus::Paused;
            true
        });
        if paused {
            self.gate.close();
            tracing::debug!(agent_id = %self.id, "Agent paused");
            self.notify_status(AgentStatus::Paused);
        }
    }

    /// Reopen the pause gate. No-op unless paused.
    pub fn resume(&self) {
        let resumed = self.status_tx.send_if_modified(|status| {
            if *status != AgentStatus::Paused {
                return false;
            }
            *status = AgentStatus::Running;
            true
        });
        if resumed {
            self.gate.open();
            tracing::debug!(agent_id = %self.id, "Agent resumed");
            self.notify_status(AgentStatus::Running);
        }
    }

    /// Graceful stop: SIGTERM, then SIGKILL after the grace period.
    /// Resolves once the run has ended.
    pub async fn stop(&self) {
        let requested = self.status_tx.send_if_modified(|status| {
            if !matches!(
                status,
                AgentStatus::Starting | AgentStatus::Running | AgentStatus::Paused
            ) {
                return false;
            }
            *status = AgentStatus::Stopping;
            true
        });
        if requested {
            self.notify_status(AgentStatus::Stopping);
            if let Some(control) = self.run_control() {
                control.stop.cancel();
            }
            self.gate.open();
        }
        self.wait_until_finished().await;
    }

    /// Immediate kill with no grace period. Resolves once the run has ended.
    pub async fn kill(&self) {
        if let Some(control) = self.run_control() {
            control.kill.cancel();
            self.gate.open();
        }
        self.wait_until_finished().await;
    }

    /// Resolve once the agent is no longer starting, running, paused or stopping.
    pub async fn wait_until_finished(&self) -> AgentStatus {
        let mut rx = self.status_tx.subscribe();
        match rx.wait_for(|status| !status.is_active()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    // -- Guidance -----------------------------------------------------------

    /// Queue guidance for the next run of this agent.
    pub fn inject_guidance(&self, text: &str) -> std::io::Result<()> {
        channel::queue_guidance(self.ctx.guidance.as_ref(), &self.id, text)
    }

    fn merge_guidance(&self, prompt: &str) -> String {
        match channel::take_guidance(self.ctx.guidance.as_ref(), &self.id) {
            Ok(Some(guidance)) => {
                tracing::info!(agent_id = %self.id, "Merging queued guidance into prompt");
                format!("{prompt}\n\n## Injected Guidance\n\n{guidance}")
            }
            Ok(None) => prompt.to_string(),
            Err(e) => {
                tracing::warn!(agent_id = %self.id, "Failed to read guidance: {e}");
                prompt.to_string()
            }
        }
    }

    // -- Stream loop --------------------------------------------------------

    async fn drive(self: Arc<Self>, mut handle: Box<dyn ProcessHandle>, control: RunControl) {
        let deadline = Instant::now() + self.settings.timeout;
        let mut assembler = LineAssembler::default();

        let end = loop {
            if control.kill.is_cancelled() {
                break RunEnd::Killed;
            }
            if control.stop.is_cancelled() {
                break RunEnd::Stopped;
            }

            if !self.gate.is_open() {
                tokio::select! {
                    _ = self.gate.wait_open() => {}
                    _ = control.stop.cancelled() => continue,
                    _ = control.kill.cancelled() => continue,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }

            if Instant::now() >= deadline {
                break RunEnd::TimedOut;
            }

            tokio::select! {
                biased;
                _ = control.kill.cancelled() => break RunEnd::Killed,
                _ = control.stop.cancelled() => break RunEnd::Stopped,
                read = tokio::time::timeout(self.settings.poll_interval, handle.read_chunk()) => {
                    match read {
                        Err(_) => continue,
                        Ok(Ok(Some(chunk))) => {
                            for line in assembler.push(&chunk) {
                                self.handle_line(&line);
                            }
                        }
                        Ok(Ok(None)) => {
                            if let Some(rest) = assembler.finish() {
                                self.handle_line(&rest);
                            }
                            break RunEnd::Exited;
                        }
                        Ok(Err(e)) => break RunEnd::ReadFailed(e.to_string()),
                    }
                }
            }
        };

        let status = match end {
            RunEnd::Exited => {
                match tokio::time::timeout(self.settings.grace_period, handle.wait()).await {
                    Ok(Ok(exit)) => {
                        tracing::debug!(agent_id = %self.id, code = ?exit.code, "Agent process exited")
                    }
                    Ok(Err(e)) => tracing::warn!(agent_id = %self.id, "Failed to reap agent process: {e}"),
                    // stdout closed but the process lingers.
                    Err(_) => force_kill(&self.id, handle.as_mut()).await,
                }
                AgentStatus::Stopped
            }
            RunEnd::Stopped => {
                if let Err(e) = handle.terminate() {
                    tracing::warn!(agent_id = %self.id, "Failed to signal agent process: {e}");
                }
                let exited = tokio::select! {
                    r = tokio::time::timeout(self.settings.grace_period, handle.wait()) => r.is_ok(),
                    _ = control.kill.cancelled() => false,
                };
                if !exited {
                    force_kill(&self.id, handle.as_mut()).await;
                }
                tracing::info!(agent_id = %self.id, "Agent stopped");
                AgentStatus::Stopped
            }
            RunEnd::Killed => {
                force_kill(&self.id, handle.as_mut()).await;
                tracing::info!(agent_id = %self.id, "Agent killed");
                AgentStatus::Stopped
            }
            RunEnd::TimedOut => {
                force_kill(&self.id, handle.as_mut()).await;
                let message = format!("Timed out after {}", format_duration(self.settings.timeout));
                tracing::warn!(agent_id = %self.id, "{message}");
                self.state().error = Some(message.clone());
                self.emit_output(OutputLine::new(OutputKind::Error, message));
                AgentStatus::Failed
            }
            RunEnd::ReadFailed(e) => {
                force_kill(&self.id, handle.as_mut()).await;
                let message = format!("Failed to read agent output: {e}");
                tracing::error!(agent_id = %self.id, "{message}");
                self.state().error = Some(message.clone());
                self.emit_output(OutputLine::new(OutputKind::Error, message));
                AgentStatus::Failed
            }
        };

        *self.run.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.finish(status);
    }

    fn handle_line(&self, line: &str) {
        for item in decode_line(line) {
            match item {
                StreamItem::ModelResolved(model) => {
                    tracing::debug!(agent_id = %self.id, model = %model, "Model resolved");
                    self.state().model = Some(model);
                }
                StreamItem::ToolUse(tool) => {
                    {
                        let mut state = self.state();
                        if let Some(file) = modified_file(&tool) {
                            if !state.files_modified.contains(&file) {
                                state.files_modified.push(file);
                            }
                        }
                        state.tool_uses.push(tool.clone());
                    }
                    if let Some(observer) = &self.ctx.observer {
                        observer.on_tool_use(self, &tool);
                    }
                }
                StreamItem::Output(line) => self.emit_output(line),
                StreamItem::Completed { usage, error } => {
                    let delta = {
                        let mut state = self.state();
                        if let Some(error) = error {
                            state.error = Some(error);
                        }
                        usage.map(|counts| {
                            let model = state
                                .model
                                .clone()
                                .or_else(|| self.settings.model.clone())
                                .unwrap_or_else(|| "unknown".to_string());
                            let delta = UsageMetrics::from_counts(&counts, &model);
                            state.usage.merge(&delta);
                            delta
                        })
                    };
                    if let (Some(delta), Some(observer)) = (delta, &self.ctx.observer) {
                        observer.on_usage(self, &delta);
                    }
                }
            }
        }
    }

    fn emit_output(&self, line: OutputLine) {
        self.state().output.push(line.clone());
        if let Some(observer) = &self.ctx.observer {
            observer.on_output(self, &line);
        }
    }

    fn finish(&self, status: AgentStatus) {
        self.state().finished_at = Some(Utc::now());
        self.set_status(status);
    }

    fn set_status(&self, status: AgentStatus) {
        self.status_tx.send_replace(status);
        self.notify_status(status);
    }

    fn notify_status(&self, status: AgentStatus) {
        if let Some(observer) = &self.ctx.observer {
            observer.on_status(self, status);
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn status(&self) -> AgentStatus {
        *self.status_tx.borrow()
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn goal(&self) -> Option<String> {
        self.state().goal.clone()
    }

    pub fn current_task(&self) -> Option<String> {
        self.state().current_task.clone()
    }

    pub fn set_current_task(&self, task: Option<String>) {
        self.state().current_task = task;
    }

    /// Resolved model, falling back to the configured one.
    pub fn model(&self) -> Option<String> {
        self.state().model.clone().or_else(|| self.settings.model.clone())
    }

    pub fn usage(&self) -> UsageMetrics {
        self.state().usage
    }

    pub fn files_modified(&self) -> Vec<String> {
        self.state().files_modified.clone()
    }

    /// Invocation count per tool name for the current run.
    pub fn tool_counts(&self) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        for tool in &self.state().tool_uses {
            *counts.entry(tool.name.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn get_output(&self, limit: Option<usize>, offset: usize) -> Vec<OutputLine> {
        self.state().output.slice(limit, offset)
    }

    /// Output produced since the current (or last) run started.
    pub fn current_run_output(&self) -> Vec<OutputLine> {
        let state = self.state();
        let Some(started_at) = state.started_at else {
            return Vec::new();
        };
        state
            .output
            .iter()
            .filter(|line| line.timestamp >= started_at)
            .cloned()
            .collect()
    }

    pub fn output_len(&self) -> usize {
        self.state().output.len()
    }

    pub fn assigned_by(&self) -> Option<AgentId> {
        self.state().assigned_by.clone()
    }

    pub fn delegated_to(&self) -> Vec<AgentId> {
        self.state().delegated_to.clone()
    }

    pub fn add_delegate(&self, id: &str) {
        let mut state = self.state();
        if !state.delegated_to.iter().any(|d| d == id) {
            state.delegated_to.push(id.to_string());
        }
    }

    pub fn waiting_for(&self) -> Option<AgentId> {
        self.state().waiting_for.clone()
    }

    pub fn set_waiting_for(&self, id: Option<AgentId>) {
        self.state().waiting_for = id;
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let status = self.status();
        let state = self.state();
        AgentSnapshot {
            id: self.id.clone(),
            agent_type: self.agent_type,
            status,
            current_task: state.current_task.clone(),
            goal: state.goal.clone(),
            started_at: state.started_at,
            finished_at: state.finished_at,
            files_modified: state.files_modified.clone(),
            tools_used: state.tool_uses.len(),
            output_lines: state.output.len(),
            error: state.error.clone(),
            model: state.model.clone().or_else(|| self.settings.model.clone()),
            usage: state.usage,
            assigned_by: state.assigned_by.clone(),
            delegated_to: state.delegated_to.clone(),
            waiting_for: state.waiting_for.clone(),
        }
    }
}

async fn force_kill(agent_id: &str, handle: &mut dyn ProcessHandle) {
    if let Err(e) = handle.kill() {
        tracing::warn!(agent_id = %agent_id, "Failed to kill agent process: {e}");
    }
    if let Err(e) = handle.wait().await {
        tracing::warn!(agent_id = %agent_id, "Failed to reap agent process: {e}");
    }
}

/// First line of the prompt, truncated to [`GOAL_MAX_CHARS`].
fn derive_goal(prompt: &str) -> String {
    prompt
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .take(GOAL_MAX_CHARS)
        .collect()
}

/// Format a duration as a short human-readable string (e.g. `45m`, `1m30s`, `500ms`).
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m, s) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m}m"),
        (0, m, s) => format!("{m}m{s}s"),
        (h, 0, 0) => format!("{h}h"),
        (h, m, _) => format!("{h}h{m}m"),
    }
}

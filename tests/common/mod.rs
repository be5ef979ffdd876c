//! Shared fixtures: scripted agent processes, a `sh`-backed launcher and a
//! recording version-control double.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use evolution_suite::agent::process::{CommandSpec, ProcessExit, ProcessHandle, ProcessLauncher, TokioLauncher};
use evolution_suite::agent::runtime::{Agent, AgentContext, AgentObserver, AgentSettings};
use evolution_suite::agent::types::{AgentStatus, AgentType, OutputLine, ToolUse};
use evolution_suite::agent::usage::UsageMetrics;
use evolution_suite::channel::MemoryChannel;
use evolution_suite::error::VcsError;
use evolution_suite::orchestration::vcs::VersionControl;

// -- stream-json lines ------------------------------------------------------

pub fn init_line(model: &str) -> String {
    json!({"type": "system", "subtype": "init", "model": model}).to_string() + "\n"
}

pub fn text_line(text: &str) -> String {
    json!({"type": "assistant", "message": {"content": [{"type": "text", "text": text}]}}).to_string() + "\n"
}

pub fn tool_line(name: &str, file_path: &str) -> String {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "tool_use", "name": name, "input": {"file_path": file_path}}]}
    })
    .to_string()
        + "\n"
}

pub fn result_line(text: &str, input_tokens: u64, output_tokens: u64) -> String {
    json!({
        "type": "result",
        "result": text,
        "is_error": false,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens}
    })
    .to_string()
        + "\n"
}

pub fn error_result_line(text: &str) -> String {
    json!({"type": "result", "result": text, "is_error": true}).to_string() + "\n"
}

// -- Scripted processes -----------------------------------------------------

/// A signal the runtime sent to a scripted process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    Term,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    /// Close stdout once the chunks are consumed, then exit with this code.
    Exit(i32),
    /// Keep stdout open until signalled.
    Hang,
    /// Keep stdout open and ignore SIGTERM.
    IgnoreTerm,
}

/// What one launch produces.
pub struct Script {
    launch_error: Option<String>,
    chunks: Vec<Vec<u8>>,
    live: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    ending: Ending,
}

impl Script {
    /// Emit `lines` (one chunk each) and exit 0.
    pub fn lines<S: AsRef<str>>(lines: &[S]) -> Self {
        Self::chunks(lines.iter().map(|l| l.as_ref().as_bytes().to_vec()).collect())
    }

    pub fn chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            launch_error: None,
            chunks,
            live: None,
            ending: Ending::Exit(0),
        }
    }

    /// Emit `lines` and then keep running until stopped or killed.
    pub fn hang<S: AsRef<str>>(lines: &[S]) -> Self {
        Self {
            ending: Ending::Hang,
            ..Self::lines(lines)
        }
    }

    pub fn ignore_term() -> Self {
        Self {
            ending: Ending::IgnoreTerm,
            ..Self::chunks(Vec::new())
        }
    }

    /// A process whose stdout the test feeds; dropping the sender closes it.
    pub fn live() -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let script = Self {
            live: Some(rx),
            ..Self::chunks(Vec::new())
        };
        (script, tx)
    }

    pub fn launch_failure(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Self::chunks(Vec::new())
        }
    }
}

/// Hands out queued [`Script`]s in launch order and records every command.
/// Launching with an empty queue fails.
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    launches: Mutex<Vec<CommandSpec>>,
    signals: Arc<Mutex<Vec<Sent>>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn launches(&self) -> Vec<CommandSpec> {
        self.launches.lock().unwrap().clone()
    }

    /// The prompt passed with `-p` to the n-th launch.
    pub fn prompt(&self, n: usize) -> String {
        let launches = self.launches();
        let args = &launches[n].args;
        let at = args.iter().position(|a| a == "-p").expect("prompt flag");
        args[at + 1].clone()
    }

    pub fn signals(&self) -> Vec<Sent> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, command: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>> {
        self.launches.lock().unwrap().push(command.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::other("no script queued"))?;
        if let Some(message) = script.launch_error {
            return Err(io::Error::new(io::ErrorKind::NotFound, message));
        }

        let (rx, hold) = match script.live {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                for chunk in script.chunks {
                    let _ = tx.send(chunk);
                }
                let hold = matches!(script.ending, Ending::Hang | Ending::IgnoreTerm).then_some(tx);
                (rx, hold)
            }
        };

        Ok(Box::new(ScriptedProcess {
            rx,
            _hold: hold,
            ending: script.ending,
            exit: None,
            signals: self.signals.clone(),
        }))
    }
}

struct ScriptedProcess {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    _hold: Option<mpsc::UnboundedSender<Vec<u8>>>,
    ending: Ending,
    exit: Option<ProcessExit>,
    signals: Arc<Mutex<Vec<Sent>>>,
}

#[async_trait]
impl ProcessHandle for ScriptedProcess {
    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.exit.is_some() {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                if let Ending::Exit(code) = self.ending {
                    self.exit = Some(ProcessExit { code: Some(code) });
                }
                Ok(None)
            }
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signals.lock().unwrap().push(Sent::Term);
        if self.ending != Ending::IgnoreTerm {
            self.exit = Some(ProcessExit { code: None });
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.signals.lock().unwrap().push(Sent::Kill);
        self.exit = Some(ProcessExit { code: None });
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        match self.exit {
            Some(exit) => Ok(exit),
            None => std::future::pending().await,
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.exit)
    }
}

/// Parks every launch until [`HeldLauncher::release`], then hands out the
/// inner launcher's next script.
pub struct HeldLauncher {
    pub inner: Arc<ScriptedLauncher>,
    release: Notify,
    waiting: AtomicUsize,
}

impl HeldLauncher {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            inner: ScriptedLauncher::new(scripts),
            release: Notify::new(),
            waiting: AtomicUsize::new(0),
        })
    }

    /// Launches currently parked.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl ProcessLauncher for HeldLauncher {
    async fn launch(&self, command: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.inner.launch(command).await
    }
}

// -- Real processes ---------------------------------------------------------

/// Runs `sh -c <script>` in place of the agent CLI.
pub struct ShellLauncher {
    pub script: String,
}

#[async_trait]
impl ProcessLauncher for ShellLauncher {
    async fn launch(&self, command: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>> {
        let shell = CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), self.script.clone()],
            cwd: command.cwd.clone(),
        };
        TokioLauncher.launch(&shell).await
    }
}

// -- Agents -----------------------------------------------------------------

/// Settings with short timers so tests run fast.
pub fn fast_settings(root: &Path) -> AgentSettings {
    AgentSettings {
        cli_path: "claude".to_string(),
        project_root: root.to_path_buf(),
        model: None,
        timeout: Duration::from_secs(10),
        grace_period: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
    }
}

/// Everything an agent reported to its observer.
#[derive(Default)]
pub struct Recorder {
    pub outputs: Mutex<Vec<OutputLine>>,
    pub tools: Mutex<Vec<ToolUse>>,
    pub statuses: Mutex<Vec<AgentStatus>>,
    pub usage: Mutex<Vec<UsageMetrics>>,
}

impl Recorder {
    pub fn statuses(&self) -> Vec<AgentStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn output_texts(&self) -> Vec<String> {
        self.outputs.lock().unwrap().iter().map(|l| l.content.clone()).collect()
    }
}

impl AgentObserver for Recorder {
    fn on_output(&self, _agent: &Agent, line: &OutputLine) {
        self.outputs.lock().unwrap().push(line.clone());
    }

    fn on_tool_use(&self, _agent: &Agent, tool: &ToolUse) {
        self.tools.lock().unwrap().push(tool.clone());
    }

    fn on_status(&self, _agent: &Agent, status: AgentStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_usage(&self, _agent: &Agent, delta: &UsageMetrics) {
        self.usage.lock().unwrap().push(*delta);
    }
}

pub struct TestAgent {
    pub agent: Arc<Agent>,
    pub recorder: Arc<Recorder>,
    pub guidance: Arc<MemoryChannel>,
}

pub fn test_agent(
    agent_type: AgentType,
    settings: AgentSettings,
    launcher: Arc<dyn ProcessLauncher>,
) -> TestAgent {
    let recorder = Arc::new(Recorder::default());
    let guidance = Arc::new(MemoryChannel::default());
    let agent = Arc::new(Agent::new(
        Agent::generate_id(agent_type),
        agent_type,
        None,
        settings,
        AgentContext {
            launcher,
            guidance: guidance.clone(),
            observer: Some(recorder.clone()),
        },
    ));
    TestAgent {
        agent,
        recorder,
        guidance,
    }
}

/// Wait (bounded) until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// -- Version control --------------------------------------------------------

/// Records calls and, if asked, what the cycle log looked like at rollback.
#[derive(Default)]
pub struct RecordingVcs {
    calls: Mutex<Vec<&'static str>>,
    head: Option<String>,
    watch_log: Option<PathBuf>,
    log_at_reset: Mutex<Vec<String>>,
}

impl RecordingVcs {
    pub fn new(head: Option<&str>) -> Self {
        Self {
            head: head.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn watching_log(mut self, path: PathBuf) -> Self {
        self.watch_log = Some(path);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn log_at_reset(&self) -> Vec<String> {
        self.log_at_reset.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionControl for RecordingVcs {
    async fn reset_hard(&self) -> Result<(), VcsError> {
        self.calls.lock().unwrap().push("reset_hard");
        if let Some(path) = &self.watch_log {
            let log = std::fs::read_to_string(path).unwrap_or_default();
            self.log_at_reset.lock().unwrap().push(log);
        }
        Ok(())
    }

    async fn clean_untracked(&self) -> Result<(), VcsError> {
        self.calls.lock().unwrap().push("clean_untracked");
        Ok(())
    }

    async fn head_commit(&self) -> Option<String> {
        self.calls.lock().unwrap().push("head_commit");
        self.head.clone()
    }
}

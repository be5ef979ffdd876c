//! Subprocess launching for agent runs.
//!
//! The runtime only talks to a [`ProcessLauncher`] and the [`ProcessHandle`]
//! it returns, so tests can substitute scripted processes. [`TokioLauncher`]
//! is the real implementation:
//! - Runs the child in its own process group (`process_group(0)`) so signals
//!   reach any grandchildren the CLI spawns
//! - Has `kill_on_drop(true)` so a dropped handle never leaks a process
//! - Drains stderr into `tracing` so a chatty child can never block on a full pipe

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// Size of a single stdout read.
const READ_CHUNK_SIZE: usize = 8192;

/// A fully-resolved command line to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, command: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>>;
}

/// A running child process as seen by the agent runtime.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Next chunk of stdout, or `None` once stdout is closed.
    ///
    /// Must be cancel-safe: the runtime races it against a poll timeout.
    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Ask the process to exit (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;

    async fn wait(&mut self) -> io::Result<ProcessExit>;

    /// Exit status if the process has already exited.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;
}

/// Launches real subprocesses with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, command: &CommandSpec) -> io::Result<Box<dyn ProcessHandle>> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let program = command.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(program = %program, "[stderr] {line}");
                }
            });
        }

        let pid = child.id();
        tracing::debug!(program = %command.program, pid = ?pid, "Spawned agent process");

        Ok(Box::new(TokioProcess {
            child,
            stdout,
            pid,
            buf: vec![0; READ_CHUNK_SIZE],
        }))
    }
}

struct TokioProcess {
    child: Child,
    stdout: ChildStdout,
    pid: Option<u32>,
    buf: Vec<u8>,
}

impl TokioProcess {
    fn signal_group(&self, signal: Signal) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let n = self.stdout.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGKILL)?;
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(ProcessExit { code: status.code() })
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }
}

//! JSONL event log for run replay.
//!
//! Every [`SuiteEvent`] published during a run is written as one JSON line to
//! `{state_dir}/logs/events-{timestamp}.jsonl`.
//!
//! Uses synchronous `std::fs` since writes are small, buffered, and flushed
//! after each event -- no async complexity needed for append-only logging.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::events::SuiteEvent;

/// Append-only JSONL logger for suite events.
pub struct EventLog {
    writer: BufWriter<fs::File>,
    log_path: PathBuf,
}

impl EventLog {
    /// Create a new log file under `{state_dir}/logs/`.
    ///
    /// The file is named `events-{ISO8601}.jsonl` with colons replaced by
    /// dashes so the name is valid on every filesystem.
    pub fn new(state_dir: &Path) -> anyhow::Result<Self> {
        let log_dir = state_dir.join("logs");
        fs::create_dir_all(&log_dir)?;

        let run_id = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let log_path = log_dir.join(format!("events-{run_id}.jsonl"));

        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            log_path,
        })
    }

    /// Serialize an event as a single JSON line and flush.
    pub fn log_event(&mut self, event: &SuiteEvent) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Drain `rx` into the log until every sender is dropped.
    pub async fn drain(mut self, mut rx: mpsc::UnboundedReceiver<SuiteEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.log_event(&event) {
                tracing::warn!("Failed to write event log: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::TempDir;

    use crate::events::{EventKind, EventSink};

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = fs::File::open(path).expect("open log");
        std::io::BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.expect("read line")).expect("valid JSON"))
            .collect()
    }

    #[test]
    fn creates_log_file_under_state_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let log = EventLog::new(tmp.path()).expect("EventLog::new");

        let path = log.log_path();
        assert!(path.exists(), "log file should exist at {path:?}");
        assert!(path.starts_with(tmp.path().join("logs")));

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("events-"));
        assert!(name.ends_with(".jsonl"));
    }

    #[tokio::test]
    async fn drain_writes_one_line_per_event() {
        let tmp = TempDir::new().expect("tempdir");
        let log = EventLog::new(tmp.path()).unwrap();
        let path = log.log_path().to_owned();

        let (sink, rx) = EventSink::channel();
        sink.publish(EventKind::CycleStarted { cycle: 1 });
        sink.publish(EventKind::AgentKilled {
            agent_id: "worker-1".to_string(),
        });
        drop(sink);

        log.drain(rx).await;

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "cycle_started");
        assert_eq!(lines[0]["cycle"], 1);
        assert_eq!(lines[1]["type"], "agent_killed");
        assert_eq!(lines[1]["agent_id"], "worker-1");
    }
}

//! Flat state files shared with the agents.
//!
//! Under the state directory:
//! - `EVOLUTION_STATE.md` -- summary; the core only rewrites its `**Cycle**`
//!   and `**Last Updated**` lines
//! - `EVOLUTION_LOG.md` -- append-only log, one `## Cycle N:` entry per cycle
//! - `EVOLUTION_PROJECT.md` -- project description, read-only to the core

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::types::CycleResult;

pub const STATE_FILE: &str = "EVOLUTION_STATE.md";
pub const LOG_FILE: &str = "EVOLUTION_LOG.md";
pub const PROJECT_FILE: &str = "EVOLUTION_PROJECT.md";

static CYCLE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*Cycle\*\*: \d+").expect("valid regex"));
static UPDATED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*Last Updated\*\*: .*").expect("valid regex"));
static CYCLE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## Cycle \d+:").expect("valid regex"));

const INITIAL_STATE: &str = "# Evolution State

**Cycle**: 0
**Phase**: IDLE
**Last Updated**: Never

## Current Status

Evolution suite initialized. Run `evolution run` to begin.
";

const INITIAL_LOG: &str = "# Evolution Log\n\n";

#[derive(Debug, Clone)]
pub struct StateFiles {
    dir: PathBuf,
}

impl StateFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Lay out the state directory. Existing files are left untouched.
    /// Returns the files that were created.
    pub fn init(&self) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)?;
        for sub in [".guidance", ".agent-state", "logs"] {
            fs::create_dir_all(self.dir.join(sub))?;
        }
        let mut created = Vec::new();
        for (name, content) in [(STATE_FILE, INITIAL_STATE), (LOG_FILE, INITIAL_LOG)] {
            let path = self.path(name);
            if !path.exists() {
                fs::write(&path, content)?;
                created.push(path);
            }
        }
        Ok(created)
    }

    /// File contents, or an empty string if the file does not exist.
    pub fn read(&self, name: &str) -> io::Result<String> {
        match fs::read_to_string(self.path(name)) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, name: &str, content: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(name), content)
    }

    pub fn append(&self, name: &str, content: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.path(name))?;
        file.write_all(content.as_bytes())
    }

    /// Rewrite the cycle number and last-updated timestamp in the state file.
    /// A missing state file is left missing.
    pub fn update_state(&self, cycle: u32, now: DateTime<Utc>) -> io::Result<()> {
        let path = self.path(STATE_FILE);
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        let content = CYCLE_LINE.replace_all(&content, format!("**Cycle**: {cycle}").as_str());
        let content = UPDATED_LINE.replace_all(&content, format!("**Last Updated**: {}", now.to_rfc3339()).as_str());
        fs::write(&path, content.as_ref())
    }

    pub fn append_cycle(&self, result: &CycleResult) -> io::Result<()> {
        self.append(LOG_FILE, &format_log_entry(result))
    }

    /// The cycle log trimmed to its `max_entries` most recent cycles.
    pub fn recent_log_entries(&self, max_entries: usize) -> io::Result<String> {
        let log = self.read(LOG_FILE)?;
        Ok(trim_log(&log, max_entries))
    }
}

fn trim_log(log: &str, max_entries: usize) -> String {
    let starts: Vec<usize> = CYCLE_HEADER.find_iter(log).map(|m| m.start()).collect();
    if starts.len() <= max_entries {
        return log.to_string();
    }
    let header = &log[..starts[0]];
    let keep_from = starts[starts.len() - max_entries];
    format!(
        "{header}\n\n*[Showing last {max_entries} of {} cycles]*\n\n{}",
        starts.len(),
        &log[keep_from..]
    )
}

pub fn format_log_entry(result: &CycleResult) -> String {
    let mut entry = format!(
        "## Cycle {}: {} - {}\n\n- **Result**: {}\n- **Duration**: {:.1}s\n",
        result.cycle,
        result.task_type,
        result.description,
        if result.success { "success" } else { "failed" },
        result.duration_seconds,
    );
    if let Some(hash) = &result.commit_hash {
        entry.push_str(&format!("- **Commit**: {hash}\n"));
    }
    if !result.files_modified.is_empty() {
        entry.push_str(&format!("- **Files**: {}\n", result.files_modified.join(", ")));
    }
    if let Some(error) = &result.error {
        entry.push_str(&format!("- **Error**: {error}\n"));
    }
    entry.push('\n');
    entry
}

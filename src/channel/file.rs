//! Filesystem-backed guidance and checkpoint store.
//!
//! Layout under the state directory:
//! - `.guidance/{key}.md` -- queued guidance, prefixed with a metadata comment
//! - `.agent-state/{id}.json` -- latest agent snapshot, replaced atomically

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{file_stem, CheckpointStore, GuidanceStore};
use crate::agent::runtime::AgentSnapshot;

#[derive(Debug, Clone)]
pub struct FileChannel {
    guidance_dir: PathBuf,
    state_dir: PathBuf,
}

impl FileChannel {
    /// Create the channel rooted at `base_dir`, creating its directories.
    pub fn new(base_dir: &Path) -> io::Result<Self> {
        let guidance_dir = base_dir.join(".guidance");
        let state_dir = base_dir.join(".agent-state");
        fs::create_dir_all(&guidance_dir)?;
        fs::create_dir_all(&state_dir)?;
        Ok(Self {
            guidance_dir,
            state_dir,
        })
    }

    pub fn guidance_dir(&self) -> &Path {
        &self.guidance_dir
    }

    /// All readable checkpoints, ordered by agent id. Unparseable files are skipped.
    pub fn list_checkpoints(&self) -> io::Result<Vec<AgentSnapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.state_dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read(&path).map(|bytes| serde_json::from_slice::<AgentSnapshot>(&bytes)) {
                Ok(Ok(snapshot)) => snapshots.push(snapshot),
                Ok(Err(e)) => tracing::warn!(path = %path.display(), "Skipping unreadable checkpoint: {e}"),
                Err(e) => tracing::warn!(path = %path.display(), "Failed to read checkpoint: {e}"),
            }
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    fn guidance_path(&self, key: &str) -> PathBuf {
        self.guidance_dir.join(format!("{}.md", file_stem(key)))
    }

    fn state_path(&self, agent_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", file_stem(agent_id)))
    }
}

impl GuidanceStore for FileChannel {
    fn write(&self, key: &str, content: &str) -> io::Result<()> {
        let header = format!("<!--\n  Injected: {}\n-->\n\n", Utc::now().to_rfc3339());
        fs::write(self.guidance_path(key), header + content)
    }

    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let raw = match fs::read_to_string(self.guidance_path(key)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let content = strip_metadata(&raw);
        Ok((!content.is_empty()).then_some(content))
    }

    fn clear(&self, key: &str) -> io::Result<()> {
        remove_if_exists(&self.guidance_path(key))
    }
}

impl CheckpointStore for FileChannel {
    fn save(&self, agent_id: &str, snapshot: &AgentSnapshot) -> io::Result<()> {
        let path = self.state_path(agent_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot).map_err(io::Error::other)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)
    }

    fn load(&self, agent_id: &str) -> io::Result<Option<AgentSnapshot>> {
        match fs::read(self.state_path(agent_id)) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clear(&self, agent_id: &str) -> io::Result<()> {
        remove_if_exists(&self.state_path(agent_id))
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Drop `<!-- ... -->` metadata blocks and trim the rest.
fn strip_metadata(raw: &str) -> String {
    let mut kept = Vec::new();
    let mut in_comment = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if !in_comment && trimmed.starts_with("<!--") {
            in_comment = !trimmed.ends_with("-->");
            continue;
        }
        if in_comment {
            if trimmed.contains("-->") {
                in_comment = false;
            }
            continue;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

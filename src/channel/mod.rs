//! Out-of-band communication with agents.
//!
//! Two small keyed stores sit beside the pool:
//! - [`GuidanceStore`]: operator- or peer-supplied text queued for an agent's
//!   next prompt, keyed by agent id (or by role name for role-level guidance)
//! - [`CheckpointStore`]: the latest [`AgentSnapshot`] per agent, for recovery
//!
//! Both are synchronous: entries are small and written rarely.

mod file;
mod memory;

pub use file::FileChannel;
pub use memory::MemoryChannel;

use std::io;

use crate::agent::runtime::AgentSnapshot;

/// Separator placed between queued guidance entries.
pub const GUIDANCE_SEPARATOR: &str = "\n\n---\n\n";

pub trait GuidanceStore: Send + Sync {
    fn write(&self, key: &str, content: &str) -> io::Result<()>;

    /// Queued guidance, or `None` if nothing (or only whitespace) is queued.
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    fn clear(&self, key: &str) -> io::Result<()>;
}

pub trait CheckpointStore: Send + Sync {
    fn save(&self, agent_id: &str, snapshot: &AgentSnapshot) -> io::Result<()>;

    fn load(&self, agent_id: &str) -> io::Result<Option<AgentSnapshot>>;

    fn clear(&self, agent_id: &str) -> io::Result<()>;
}

/// Append `content` to whatever is already queued under `key`.
pub fn queue_guidance(store: &dyn GuidanceStore, key: &str, content: &str) -> io::Result<()> {
    let combined = match store.read(key)? {
        Some(existing) => format!("{existing}{GUIDANCE_SEPARATOR}{content}"),
        None => content.to_string(),
    };
    store.write(key, &combined)
}

/// Read and clear the guidance queued under `key`.
pub fn take_guidance(store: &dyn GuidanceStore, key: &str) -> io::Result<Option<String>> {
    let guidance = store.read(key)?;
    if guidance.is_some() {
        store.clear(key)?;
    }
    Ok(guidance)
}

/// Map an agent id or role name to a safe file stem.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

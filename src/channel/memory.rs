//! In-memory guidance and checkpoint store (non-persistent, for tests and dry runs).

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use super::{CheckpointStore, GuidanceStore};
use crate::agent::runtime::AgentSnapshot;

#[derive(Debug, Default)]
pub struct MemoryChannel {
    guidance: Mutex<HashMap<String, String>>,
    checkpoints: Mutex<HashMap<String, AgentSnapshot>>,
}

impl MemoryChannel {
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl GuidanceStore for MemoryChannel {
    fn write(&self, key: &str, content: &str) -> io::Result<()> {
        self.guidance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), content.to_string());
        Ok(())
    }

    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let guidance = self.guidance.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guidance
            .get(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn clear(&self, key: &str) -> io::Result<()> {
        self.guidance.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }
}

impl CheckpointStore for MemoryChannel {
    fn save(&self, agent_id: &str, snapshot: &AgentSnapshot) -> io::Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, agent_id: &str) -> io::Result<Option<AgentSnapshot>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned())
    }

    fn clear(&self, agent_id: &str) -> io::Result<()> {
        self.checkpoints.lock().unwrap_or_else(|e| e.into_inner()).remove(agent_id);
        Ok(())
    }
}

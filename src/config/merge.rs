use super::schema::{AgentSection, AgentTypeConfig, AppConfig, ConfigFile, PartialConfig};
use crate::agent::types::AgentType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout per agent type, in minutes.
fn default_timeout_minutes(agent_type: AgentType) -> u64 {
    match agent_type {
        AgentType::Coordinator => 15,
        AgentType::Worker => 45,
        AgentType::Evaluator => 30,
    }
}

impl ConfigFile {
    pub fn to_partial(self) -> PartialConfig {
        let mut partial = PartialConfig::default();
        if let Some(project) = self.project {
            partial.project_name = project.name;
            partial.project_description = project.description;
        }
        if let Some(state) = self.state {
            partial.state_dir = state.directory.map(PathBuf::from);
        }
        if let Some(runtime) = self.runtime {
            partial.cli_path = runtime.cli_path;
            partial.grace_period_secs = runtime.grace_period_secs;
            partial.poll_interval_ms = runtime.poll_interval_ms;
            partial.recent_log_entries = runtime.recent_log_entries;
        }
        if let Some(agents) = self.agents {
            let sections = [
                (AgentType::Coordinator, agents.coordinator),
                (AgentType::Worker, agents.worker),
                (AgentType::Evaluator, agents.evaluator),
            ];
            for (agent_type, section) in sections {
                if let Some(section) = section {
                    partial.agents.insert(agent_type, section);
                }
            }
        }
        partial
    }
}

impl AgentSection {
    fn with_fallback(self, fallback: AgentSection) -> AgentSection {
        AgentSection {
            timeout_minutes: self.timeout_minutes.or(fallback.timeout_minutes),
            model: self.model.or(fallback.model),
            prompt: self.prompt.or(fallback.prompt),
        }
    }
}

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence; agent sections merge field by field.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        let mut agents: HashMap<AgentType, AgentSection> = fallback.agents;
        for (agent_type, section) in self.agents {
            let merged = match agents.remove(&agent_type) {
                Some(lower) => section.with_fallback(lower),
                None => section,
            };
            agents.insert(agent_type, merged);
        }

        PartialConfig {
            project_root: self.project_root.or(fallback.project_root),
            project_name: self.project_name.or(fallback.project_name),
            project_description: self.project_description.or(fallback.project_description),
            state_dir: self.state_dir.or(fallback.state_dir),
            cli_path: self.cli_path.or(fallback.cli_path),
            agents,
            grace_period_secs: self.grace_period_secs.or(fallback.grace_period_secs),
            poll_interval_ms: self.poll_interval_ms.or(fallback.poll_interval_ms),
            recent_log_entries: self.recent_log_entries.or(fallback.recent_log_entries),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let project_root = self.project_root.unwrap_or_else(|| PathBuf::from("."));
        let project_name = self.project_name.unwrap_or_else(|| {
            project_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        });
        let state_dir = resolve(&project_root, self.state_dir.unwrap_or_else(|| PathBuf::from("evolution")));

        let mut sections = self.agents;
        let agents = AgentType::ALL
            .iter()
            .map(|&agent_type| {
                let section = sections.remove(&agent_type).unwrap_or_default();
                let minutes = section
                    .timeout_minutes
                    .unwrap_or_else(|| default_timeout_minutes(agent_type));
                let config = AgentTypeConfig {
                    timeout: Duration::from_secs(minutes * 60),
                    model: section.model,
                    prompt_override: section.prompt.map(|p| resolve(&project_root, PathBuf::from(p))),
                };
                (agent_type, config)
            })
            .collect();

        AppConfig {
            project_name,
            project_description: self.project_description.unwrap_or_default(),
            state_dir,
            cli_path: self.cli_path.unwrap_or_else(|| "claude".to_string()),
            agents,
            grace_period: Duration::from_secs(self.grace_period_secs.unwrap_or(2)),
            poll_interval: Duration::from_millis(self.poll_interval_ms.unwrap_or(500)),
            recent_log_entries: self.recent_log_entries.unwrap_or(10),
            project_root,
        }
    }
}

fn resolve(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() { path } else { root.join(path) }
}

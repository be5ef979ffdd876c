//! Prompt templates.
//!
//! A template is resolved from a configured override file if one exists,
//! otherwise from the defaults compiled into the binary. Rendering is plain
//! `{{NAME}}` placeholder substitution.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::agent::types::AgentType;
use crate::error::CycleError;

const DEFAULT_COORDINATOR: &str = include_str!("../../templates/coordinator.md");
const DEFAULT_WORKER: &str = include_str!("../../templates/worker.md");
const DEFAULT_EVALUATOR: &str = include_str!("../../templates/evaluator.md");

#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    overrides: HashMap<AgentType, PathBuf>,
}

impl PromptLibrary {
    pub fn new(overrides: HashMap<AgentType, PathBuf>) -> Self {
        Self { overrides }
    }

    pub fn load(&self, agent_type: AgentType) -> Result<String, CycleError> {
        if let Some(path) = self.overrides.get(&agent_type) {
            if path.exists() {
                return Ok(std::fs::read_to_string(path)?);
            }
            tracing::warn!(
                path = %path.display(),
                "Prompt override for {agent_type} not found, using default"
            );
        }
        Ok(default_template(agent_type).to_string())
    }
}

pub fn default_template(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Coordinator => DEFAULT_COORDINATOR,
        AgentType::Worker => DEFAULT_WORKER,
        AgentType::Evaluator => DEFAULT_EVALUATOR,
    }
}

/// Replace every `{{KEY}}` with its value. Unknown placeholders are left as-is.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), value)
    })
}

/// Text substituted for `{{INJECTED_GUIDANCE}}`.
pub fn guidance_section(guidance: Option<&str>) -> String {
    match guidance {
        Some(g) => format!("\n## Injected Guidance\n\n{g}\n"),
        None => String::new(),
    }
}

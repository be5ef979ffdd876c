pub mod merge;
pub mod schema;

pub use schema::*;

use crate::agent::runtime::AgentSettings;
use crate::agent::types::AgentType;
use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use crate::orchestration::coordinator::CoordinatorSettings;
use crate::orchestration::pool::PoolSettings;
use crate::orchestration::prompts::PromptLibrary;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Name of the project config file.
pub const CONFIG_FILENAME: &str = "evolution.toml";

/// Load configuration by merging global, project, and CLI sources.
/// Precedence: CLI > project config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply). A config
/// file named explicitly with `--config` must exist and parse.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let (project, explicit) = cli_paths(cli);
    let project_root = match project {
        Some(p) => p,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    // Layer 1: Global config (~/.config/evolution-suite/evolution.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Project config (explicit path, else {project}/evolution.toml)
    let project_config = match explicit {
        Some(path) => load_toml_file(&path)?.ok_or_else(|| ConfigError::ParseError {
            path: path.clone(),
            message: "file not found".to_string(),
        })?,
        None => load_toml_file(&project_root.join(CONFIG_FILENAME))
            .unwrap_or_else(|e| {
                tracing::warn!("{e}");
                None
            })
            .unwrap_or_default(),
    };

    // Layer 3: CLI args
    let cli_partial = PartialConfig {
        project_root: Some(project_root),
        ..Default::default()
    };

    let config = cli_partial
        .with_fallback(project_config)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found or unreadable.
fn load_global_config() -> PartialConfig {
    let Some(path) = global_config_path() else {
        tracing::debug!("Could not determine global config directory");
        return PartialConfig::default();
    };
    match load_toml_file(&path) {
        Ok(partial) => partial.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("{e}");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file. `Ok(None)` if the file does not exist.
fn load_toml_file(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let config_file = toml::from_str::<ConfigFile>(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(Some(config_file.to_partial()))
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/evolution-suite/evolution.toml
/// macOS: ~/Library/Application Support/evolution-suite/evolution.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "evolution-suite").map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
}

/// Extract project directory and explicit config path from CLI args.
fn cli_paths(cli: &Cli) -> (Option<PathBuf>, Option<PathBuf>) {
    match &cli.command {
        Commands::Init { path } => (path.clone(), None),
        Commands::Run { project, config, .. } | Commands::Status { project, config } => {
            (project.clone(), config.clone())
        }
    }
}

/// Starter evolution.toml written by `evolution init`.
pub fn default_config_file(project_name: &str) -> String {
    format!(
        r#"# Evolution Suite configuration

[project]
name = "{project_name}"
description = "Add your project description here"

[state]
directory = "evolution"

[runtime]
cli_path = "claude"
grace_period_secs = 2
poll_interval_ms = 500
recent_log_entries = 10

[agents.coordinator]
timeout_minutes = 15
# model = "claude-opus-4"
# prompt = "evolution/prompts/coordinator.md"

[agents.worker]
timeout_minutes = 45

[agents.evaluator]
timeout_minutes = 30
"#
    )
}

impl AppConfig {
    pub fn agent_config(&self, agent_type: AgentType) -> AgentTypeConfig {
        self.agents.get(&agent_type).cloned().unwrap_or(AgentTypeConfig {
            timeout: std::time::Duration::from_secs(30 * 60),
            model: None,
            prompt_override: None,
        })
    }

    pub fn agent_settings(&self, agent_type: AgentType) -> AgentSettings {
        let agent = self.agent_config(agent_type);
        AgentSettings {
            cli_path: self.cli_path.clone(),
            project_root: self.project_root.clone(),
            model: agent.model,
            timeout: agent.timeout,
            grace_period: self.grace_period,
            poll_interval: self.poll_interval,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        AgentType::ALL.iter().fold(
            PoolSettings::uniform(AgentSettings::new(&self.project_root)),
            |settings, &agent_type| settings.with(agent_type, self.agent_settings(agent_type)),
        )
    }

    pub fn prompt_library(&self) -> PromptLibrary {
        PromptLibrary::new(
            self.agents
                .iter()
                .filter_map(|(t, c)| c.prompt_override.clone().map(|p| (*t, p)))
                .collect(),
        )
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            recent_log_entries: self.recent_log_entries,
            project_description: self.project_description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_config_file_parses() {
        let partial = toml::from_str::<ConfigFile>(&default_config_file("demo"))
            .unwrap()
            .to_partial();
        assert_eq!(partial.project_name.as_deref(), Some("demo"));
        assert_eq!(partial.agents[&AgentType::Worker].timeout_minutes, Some(45));
    }

    #[test]
    fn project_config_is_loaded_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[project]\nname = \"demo\"\n\n[agents.worker]\nmodel = \"claude-sonnet-4\"\n",
        )
        .unwrap();

        let cli = Cli::parse_from(["evolution", "status", "--project", dir.path().to_str().unwrap()]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.state_dir, dir.path().join("evolution"));

        let worker = config.agent_settings(AgentType::Worker);
        assert_eq!(worker.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(worker.project_root, dir.path());
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let cli = Cli::parse_from(["evolution", "run", "--config", missing.to_str().unwrap()]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn malformed_explicit_config_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[project\nname = ").unwrap();
        let cli = Cli::parse_from(["evolution", "run", "--config", path.to_str().unwrap()]);
        let err = load_config(&cli).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}

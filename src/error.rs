use std::path::PathBuf;

use crate::agent::types::AgentId;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },
}

/// Errors returned by agent and pool operations.
///
/// Failures that happen *inside* a running agent (timeouts, stream errors,
/// worker-reported errors) are not represented here: they are contained in the
/// agent and surfaced as its status plus error string.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    #[error("Agent {0} is already running")]
    AlreadyRunning(AgentId),

    #[error("Failed to launch agent process: {0}")]
    LaunchFailed(String),
}

/// Errors that fail a single evolution cycle (never the whole run).
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Could not parse coordinator decision")]
    ParseFailure,

    #[error("Coordinator agent failed: {0}")]
    CoordinatorFailed(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("State file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the version-control collaborator.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

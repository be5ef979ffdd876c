//! Command lines for the agent CLI.

use std::path::Path;

use super::process::CommandSpec;
use super::types::AgentType;

/// Tools a coordinator may use. Coordinators read the project and delegate
/// through the pool's control-surface tools instead of spawning subprocesses.
pub const COORDINATOR_ALLOWED_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "mcp__evolution-suite-agents__spawn_worker",
    "mcp__evolution-suite-agents__spawn_evaluator",
    "mcp__evolution-suite-agents__get_agent_status",
    "mcp__evolution-suite-agents__get_agent_output",
    "mcp__evolution-suite-agents__wait_for_agent",
];

/// Build the fixed command line for one agent run.
pub fn build_command(
    cli_path: &str,
    agent_type: AgentType,
    model: Option<&str>,
    prompt: &str,
    project_root: &Path,
) -> CommandSpec {
    let mut args: Vec<String> = [
        "--dangerously-skip-permissions",
        "--verbose",
        "--output-format",
        "stream-json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(model) = model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }

    if agent_type == AgentType::Coordinator {
        args.push("--allowedTools".to_string());
        args.push(COORDINATOR_ALLOWED_TOOLS.join(","));
    }

    args.push("-p".to_string());
    args.push(prompt.to_string());

    CommandSpec {
        program: cli_path.to_string(),
        args,
        cwd: project_root.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_gets_unrestricted_stream_json_command() {
        let cmd = build_command("claude", AgentType::Worker, None, "do it", Path::new("/repo"));
        assert_eq!(cmd.program, "claude");
        assert_eq!(cmd.cwd, Path::new("/repo"));
        assert!(cmd.args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
        assert!(!cmd.args.iter().any(|a| a == "--allowedTools"));
        assert_eq!(cmd.args[cmd.args.len() - 2..], ["-p", "do it"]);
    }

    #[test]
    fn coordinator_is_restricted_to_allow_list() {
        let cmd = build_command(
            "/usr/local/bin/claude",
            AgentType::Coordinator,
            Some("claude-opus-4"),
            "decide",
            Path::new("/repo"),
        );
        let pos = cmd.args.iter().position(|a| a == "--allowedTools").unwrap();
        let tools = &cmd.args[pos + 1];
        assert!(tools.starts_with("Read,Glob,Grep"));
        assert!(!tools.split(',').any(|t| t == "Bash" || t == "Edit"));
        assert!(cmd.args.windows(2).any(|w| w == ["--model", "claude-opus-4"]));
    }
}

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use evolution_suite::agent::process::TokioLauncher;
use evolution_suite::channel::FileChannel;
use evolution_suite::cli::{Cli, Commands};
use evolution_suite::config::{self, AppConfig, CONFIG_FILENAME};
use evolution_suite::events::EventSink;
use evolution_suite::logging::EventLog;
use evolution_suite::orchestration::coordinator::{CycleCoordinator, RunOutcome};
use evolution_suite::orchestration::pool::{AgentPool, PoolCollaborators};
use evolution_suite::orchestration::state_files::{StateFiles, STATE_FILE};
use evolution_suite::orchestration::vcs::GitCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli)?;
    tracing::info!(
        project = %config.project_root.display(),
        state_dir = %config.state_dir.display(),
        "Config loaded"
    );

    match cli.command {
        Commands::Init { .. } => init(&config),
        Commands::Run {
            max_cycles, dry_run, ..
        } => run(&config, max_cycles, dry_run).await,
        Commands::Status { .. } => status(&config),
    }
}

fn init(config: &AppConfig) -> anyhow::Result<()> {
    let config_path = config.project_root.join(CONFIG_FILENAME);
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }
    std::fs::create_dir_all(&config.project_root)
        .with_context(|| format!("Failed to create {}", config.project_root.display()))?;
    std::fs::write(&config_path, config::default_config_file(&config.project_name))
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let created = StateFiles::new(&config.state_dir)
        .init()
        .context("Failed to initialize state directory")?;

    println!("Initialized evolution suite for {}", config.project_name);
    println!("  Created {}", config_path.display());
    for path in created {
        println!("  Created {}", path.display());
    }
    Ok(())
}

async fn run(config: &AppConfig, max_cycles: Option<u32>, dry_run: bool) -> anyhow::Result<()> {
    let state_files = StateFiles::new(&config.state_dir);
    state_files.init().context("Failed to initialize state directory")?;
    let channel = Arc::new(FileChannel::new(&config.state_dir).context("Failed to open agent channel")?);

    let (events, rx) = EventSink::channel();
    let event_log = EventLog::new(&config.state_dir)?;
    tracing::info!(path = %event_log.log_path().display(), "Writing event log");
    let drain = tokio::spawn(event_log.drain(rx));

    let pool = AgentPool::new(
        config.pool_settings(),
        PoolCollaborators {
            launcher: Arc::new(TokioLauncher),
            guidance: channel.clone(),
            checkpoints: Some(channel),
            events: events.clone(),
        },
    );
    let coordinator = Arc::new(CycleCoordinator::new(
        pool,
        Arc::new(GitCli::new(&config.project_root)),
        config.prompt_library(),
        state_files,
        events,
        config.coordinator_settings(),
    ));

    // First Ctrl-C finishes the current cycle, the second kills the agents.
    let signals = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            println!("\nStopping after the current cycle (Ctrl-C again to force)...");
            coordinator.stop();
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            println!("\nForce stopping...");
            coordinator.force_stop().await;
        }
    });

    let outcome = coordinator.run(max_cycles, dry_run).await;
    signals.abort();
    let _ = signals.await;

    let status = coordinator.status();
    let history = coordinator.history();
    drop(coordinator);
    // The log task ends once every event sender is gone.
    if let Err(e) = drain.await {
        tracing::warn!("Event log task failed: {e}");
    }

    let reason = match outcome {
        RunOutcome::Done => "evolution complete",
        RunOutcome::MaxCyclesReached => "maximum cycles reached",
        RunOutcome::TooManyFailures => "too many consecutive failures",
        RunOutcome::Stopped => "stopped",
    };
    let succeeded = history.iter().filter(|r| r.success).count();
    println!(
        "\nRun finished ({reason}): {} cycles, {succeeded} succeeded, {} tokens, ${:.4}",
        history.len(),
        status.pool.total_usage.total_tokens(),
        status.pool.total_usage.cost_usd(),
    );
    for result in &history {
        let mark = if result.success { "ok" } else { "FAILED" };
        println!(
            "  Cycle {}: {} - {} [{mark}]",
            result.cycle, result.task_type, result.description
        );
    }
    Ok(())
}

fn status(config: &AppConfig) -> anyhow::Result<()> {
    let state_files = StateFiles::new(&config.state_dir);
    if !state_files.path(STATE_FILE).exists() {
        bail!(
            "No evolution state in {} (run `evolution init` first)",
            config.state_dir.display()
        );
    }

    println!("{}", state_files.read(STATE_FILE)?.trim_end());
    println!();
    println!(
        "{}",
        state_files.recent_log_entries(config.recent_log_entries)?.trim_end()
    );

    print_checkpoints(&config.state_dir)
}

fn print_checkpoints(state_dir: &Path) -> anyhow::Result<()> {
    let snapshots = FileChannel::new(state_dir)?.list_checkpoints()?;
    if snapshots.is_empty() {
        return Ok(());
    }
    println!();
    println!("Agents:");
    for snapshot in snapshots {
        let task = snapshot.current_task.as_deref().unwrap_or("-");
        println!(
            "  {:<22} {:<10} {} tokens  {task}",
            snapshot.id,
            snapshot.status.as_str(),
            snapshot.usage.total_tokens()
        );
        if let Some(error) = &snapshot.error {
            println!("  {:<22} error: {error}", "");
        }
    }
    Ok(())
}

#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use c4_selfplay::config::AppConfig;
use c4_selfplay::logging::init_logging;
use c4_selfplay::search::{best, Objective, SearchController, TrialStatus};

/// Search DQN hyperparameters with independent training runs.
#[derive(Parser)]
#[command(name = "tune", about = "Tune Connect Four DQN hyperparameters")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of trials
    #[arg(long)]
    trials: Option<usize>,

    /// Run trials in parallel
    #[arg(long)]
    parallel: bool,

    /// Seed for sampling trial configs
    #[arg(long)]
    seed: Option<u64>,

    /// Episodes per trial
    #[arg(long)]
    episodes: Option<usize>,

    /// Objective: final, best or smoothed
    #[arg(long)]
    objective: Option<String>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write rotating log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn parse_objective(name: &str) -> Result<Objective> {
    match name {
        "final" => Ok(Objective::Final),
        "best" => Ok(Objective::Best),
        "smoothed" => Ok(Objective::Smoothed),
        other => anyhow::bail!("unknown objective '{other}' (expected final, best or smoothed)"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(&cli.log_level, cli.log_dir.as_deref())
        .context("initializing logger")?;

    let mut app_config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(trials) = cli.trials {
        app_config.search.trials = trials;
    }
    if cli.parallel {
        app_config.search.parallel = true;
    }
    if let Some(seed) = cli.seed {
        app_config.search.seed = seed;
    }
    if let Some(episodes) = cli.episodes {
        app_config.search.trial_episodes = episodes;
    }
    if let Some(name) = &cli.objective {
        app_config.search.objective = parse_objective(name)?;
    }
    app_config.validate().context("validating config")?;

    let tracker = app_config
        .tracking
        .build()
        .with_context(|| format!("opening tracking dir {}", app_config.tracking.dir.display()))?;
    let controller =
        SearchController::from_app_config(&app_config, tracker).context("setting up search")?;
    let results = controller.run().context("hyperparameter search failed")?;

    println!("--- Search results ---");
    for r in &results {
        let status = match &r.status {
            TrialStatus::Completed => "completed".to_string(),
            TrialStatus::Pruned => "pruned".to_string(),
            TrialStatus::Failed { error } => format!("failed: {error}"),
        };
        println!(
            "  trial {:>3}: {:>8}  {}",
            r.trial_id,
            r.objective.map_or_else(|| "-".to_string(), |o| format!("{o:.4}")),
            status
        );
    }
    match best(&results) {
        Some(b) => {
            println!("Best trial {} (objective {:.4}):", b.trial_id, b.objective.unwrap_or(0.0));
            println!("    learning_rate: {:.3e}", b.config.learning_rate);
            println!("    learning_rate_decay: {:.5}", b.config.learning_rate_decay);
            println!("    gamma: {:.5}", b.config.gamma);
            println!("    epsilon_end: {:.4}", b.config.epsilon_end);
            println!("    batch_size: {}", b.config.batch_size);
            println!("    buffer_capacity: {}", b.config.buffer_capacity);
            println!("    target_sync_interval: {}", b.config.target_sync_interval);
        }
        None => println!("No trial completed."),
    }
    Ok(())
}

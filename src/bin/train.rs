#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use c4_selfplay::checkpoint::CheckpointManager;
use c4_selfplay::config::AppConfig;
use c4_selfplay::logging::init_logging;
use c4_selfplay::training::{Orchestrator, RunStatus};

/// Train a Connect Four Q-learning agent through self-play.
#[derive(Parser)]
#[command(name = "train", about = "Train a Connect Four DQN agent via self-play")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Resume training from the latest checkpoint
    #[arg(long)]
    resume: bool,

    /// Override number of training episodes
    #[arg(long)]
    episodes: Option<usize>,

    /// Override learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Override the run seed
    #[arg(long)]
    seed: Option<u64>,

    /// Self-play workers; more than one trains in throughput mode
    #[arg(long)]
    workers: Option<usize>,

    /// Override the checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write rotating log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", AppConfig::default_toml().context("serializing default config")?);
        return Ok(());
    }

    let _logger = init_logging(&cli.log_level, cli.log_dir.as_deref())
        .context("initializing logger")?;

    let mut app_config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    if let Some(episodes) = cli.episodes {
        app_config.run.episode_budget = episodes;
    }
    if let Some(lr) = cli.lr {
        app_config.run.learning_rate = lr;
    }
    if let Some(seed) = cli.seed {
        app_config.run.seed = seed;
    }
    if let Some(workers) = cli.workers {
        app_config.training.workers = workers;
    }
    if let Some(dir) = cli.checkpoint_dir {
        app_config.checkpoint.checkpoint_dir = dir;
    }
    app_config.validate().context("validating config")?;

    let tracker = app_config
        .tracking
        .build()
        .with_context(|| format!("opening tracking dir {}", app_config.tracking.dir.display()))?;
    let mut orchestrator =
        Orchestrator::from_app_config(&app_config, tracker).context("setting up training run")?;

    if cli.resume {
        let manager = CheckpointManager::new(app_config.checkpoint.clone())
            .context("opening checkpoint dir")?;
        match manager.load_latest() {
            Ok(checkpoint) => orchestrator
                .resume(&checkpoint)
                .context("restoring checkpoint")?,
            Err(e) => warn!("No checkpoint to resume from ({e}), starting fresh"),
        }
    }

    let summary = if app_config.training.workers > 1 {
        orchestrator.run_concurrent()
    } else {
        orchestrator.run()
    }
    .context("training failed")?;

    info!(
        "Training {} after {} episodes: best score {:.3}, final score {}",
        match summary.status {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Stopped => "stopped",
        },
        summary.episodes,
        summary.best_eval_score,
        summary
            .final_eval_score
            .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"))
    );
    Ok(())
}

use std::ops::ControlFlow;
use std::sync::Arc;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ai::BurnQFunction;
use crate::config::{AppConfig, RunConfig};
use crate::error::{ConfigError, SearchError};
use crate::search::pruner::MedianPruner;
use crate::search::space::SearchSpace;
use crate::training::concurrent::CancellationToken;
use crate::training::orchestrator::{Orchestrator, RunStatus, TrainingConfig};
use crate::training::tracker::ExperimentTracker;

/// How a trial's evaluation history is reduced to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Score of the last evaluation.
    #[default]
    Final,
    /// Highest score seen.
    Best,
    /// Exponential moving average with `SearchConfig::smoothing`.
    Smoothed,
}

impl Objective {
    pub fn reduce(self, scores: &[f32], smoothing: f32) -> Option<f32> {
        match self {
            Objective::Final => scores.last().copied(),
            Objective::Best => scores.iter().copied().reduce(f32::max),
            Objective::Smoothed => scores
                .iter()
                .copied()
                .reduce(|ema, s| smoothing * s + (1.0 - smoothing) * ema),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub trials: usize,
    /// Run trials on a rayon pool instead of one after another.
    pub parallel: bool,
    /// Threads for parallel search; 0 uses rayon's default.
    pub threads: usize,
    /// Seeds config sampling. Every trial trains with the base run seed.
    pub seed: u64,
    /// Episode budget of each trial, replacing `run.episode_budget`.
    pub trial_episodes: usize,
    pub startup_trials: usize,
    pub warmup_evaluations: usize,
    pub objective: Objective,
    /// Weight of the newest score in the smoothed objective.
    pub smoothing: f32,
    pub space: SearchSpace,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            trials: 20,
            parallel: false,
            threads: 0,
            seed: 42,
            trial_episodes: 5000,
            startup_trials: 5,
            warmup_evaluations: 1,
            objective: Objective::Final,
            smoothing: 0.3,
            space: SearchSpace::default(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == 0 {
            return Err(ConfigError::Validation("search.trials must be > 0".to_string()));
        }
        if self.trial_episodes == 0 {
            return Err(ConfigError::Validation(
                "search.trial_episodes must be > 0".to_string(),
            ));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigError::Validation(
                "search.smoothing must be in (0, 1]".to_string(),
            ));
        }
        self.space.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    Pruned,
    Failed { error: String },
}

/// What the tracker receives for every trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: usize,
    pub config: RunConfig,
    pub objective: Option<f32>,
    pub pruned: bool,
    #[serde(flatten)]
    pub status: TrialStatus,
}

impl TrialResult {
    fn failed(trial_id: usize, config: RunConfig, error: String) -> Self {
        TrialResult {
            trial_id,
            config,
            objective: None,
            pruned: false,
            status: TrialStatus::Failed { error },
        }
    }
}

/// Runs independent training runs over sampled configs and reports each one.
pub struct SearchController {
    base: RunConfig,
    training: TrainingConfig,
    config: SearchConfig,
    pruner: MedianPruner,
    tracker: Arc<dyn ExperimentTracker>,
    cancel: CancellationToken,
}

impl SearchController {
    pub fn new(
        base: RunConfig,
        training: TrainingConfig,
        config: SearchConfig,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        training.validate()?;
        Ok(SearchController {
            pruner: MedianPruner::new(config.startup_trials, config.warmup_evaluations),
            base,
            training,
            config,
            tracker,
            cancel: CancellationToken::new(),
        })
    }

    pub fn from_app_config(
        app: &AppConfig,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Result<Self, SearchError> {
        Self::new(app.run.clone(), app.training.clone(), app.search.clone(), tracker)
    }

    /// Shared by every trial. Cancelling stops running trials at their next
    /// episode boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Trial configs, drawn up front so parallel and sequential searches try
    /// the same points.
    pub fn sample_configs(&self) -> Vec<RunConfig> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let base = RunConfig {
            episode_budget: self.config.trial_episodes,
            ..self.base.clone()
        };
        (0..self.config.trials)
            .map(|_| self.config.space.sample(&base, &mut rng))
            .collect()
    }

    /// Run every trial and report each to the tracker, ordered by trial id.
    pub fn run(&self) -> Result<Vec<TrialResult>, SearchError> {
        let configs: Vec<(usize, RunConfig)> = self.sample_configs().into_iter().enumerate().collect();
        info!(
            "Starting search: {} trials, {}, objective {:?}",
            configs.len(),
            if self.config.parallel { "parallel" } else { "sequential" },
            self.config.objective
        );

        let mut results: Vec<TrialResult> = if self.config.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .thread_name(|i| format!("trial-worker-{i}"))
                .build()
                ?;
            pool.install(|| {
                configs
                    .into_par_iter()
                    .map(|(id, config)| self.run_trial(id, config))
                    .collect()
            })
        } else {
            configs
                .into_iter()
                .map(|(id, config)| self.run_trial(id, config))
                .collect()
        };
        results.sort_by_key(|r| r.trial_id);

        for result in &results {
            self.tracker.log_trial(result)?;
        }
        if let Some(best) = best(&results) {
            info!(
                "Best trial {}: objective {:.4} (lr {:.2e}, gamma {:.4}, batch {}, buffer {})",
                best.trial_id,
                best.objective.unwrap_or(0.0),
                best.config.learning_rate,
                best.config.gamma,
                best.config.batch_size,
                best.config.buffer_capacity
            );
        }
        Ok(results)
    }

    fn run_trial(&self, id: usize, config: RunConfig) -> TrialResult {
        if self.cancel.is_cancelled() {
            return TrialResult::failed(id, config, "search cancelled".to_string());
        }
        info!(
            "Trial {id}: lr {:.2e}, gamma {:.4}, eps_end {:.3}, batch {}, buffer {}, sync {}",
            config.learning_rate,
            config.gamma,
            config.epsilon_end,
            config.batch_size,
            config.buffer_capacity,
            config.target_sync_interval
        );

        if let Err(e) = config.validate() {
            warn!("Trial {id} has an invalid config: {e}");
            return TrialResult::failed(id, config, e.to_string());
        }
        let online = BurnQFunction::from_run_config(&config);
        let orchestrator =
            Orchestrator::new(config.clone(), self.training.clone(), online, self.tracker.clone());
        let mut orchestrator = match orchestrator {
            Ok(o) => o
                .with_run_id(format!("trial-{id:03}"))
                .with_cancellation(self.cancel.clone()),
            Err(e) => {
                warn!("Trial {id} failed to start: {e}");
                return TrialResult::failed(id, config, e.to_string());
            }
        };

        let mut evaluations = 0;
        let mut observer = |_episode: usize, score: f32| {
            let prune = self.pruner.report(id, evaluations, score);
            evaluations += 1;
            if prune {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let summary = match orchestrator.run_observed(&mut observer) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Trial {id} failed: {e}");
                return TrialResult::failed(id, config, e.to_string());
            }
        };

        let scores: Vec<f32> = summary.eval_history.iter().map(|&(_, s)| s).collect();
        let objective = self.config.objective.reduce(&scores, self.config.smoothing);
        let pruned = summary.status == RunStatus::Stopped;
        let status = match summary.status {
            RunStatus::Completed => {
                self.pruner.trial_finished(id);
                TrialStatus::Completed
            }
            RunStatus::Stopped => TrialStatus::Pruned,
            RunStatus::Cancelled => TrialStatus::Failed {
                error: "search cancelled".to_string(),
            },
        };
        info!(
            "Trial {id} {:?} after {} episodes, objective {}",
            status,
            summary.episodes,
            objective.map_or_else(|| "-".to_string(), |o| format!("{o:.4}"))
        );
        TrialResult {
            trial_id: id,
            config,
            objective,
            pruned,
            status,
        }
    }
}

/// Highest-objective completed trial.
pub fn best(results: &[TrialResult]) -> Option<&TrialResult> {
    results
        .iter()
        .filter(|r| r.status == TrialStatus::Completed)
        .filter_map(|r| r.objective.map(|o| (o, r)))
        .max_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, r)| r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::tracker::MemoryTracker;

    fn tiny_base() -> RunConfig {
        RunConfig {
            epsilon_decay_steps: 200,
            min_replay_size: 16,
            hidden_size: 16,
            seed: 3,
            ..RunConfig::default()
        }
    }

    fn tiny_training() -> TrainingConfig {
        TrainingConfig {
            eval_interval: 4,
            eval_games: 2,
            log_interval: 4,
            ..TrainingConfig::default()
        }
    }

    fn tiny_search(trials: usize, parallel: bool) -> SearchConfig {
        SearchConfig {
            trials,
            parallel,
            threads: 2,
            trial_episodes: 8,
            startup_trials: 100,
            space: SearchSpace {
                batch_sizes: vec![8],
                buffer_capacities: vec![64, 128],
                target_sync_intervals: vec![5, 10],
                ..SearchSpace::default()
            },
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_objective_reduction() {
        let scores = [0.2, 0.6, 0.4];
        assert_eq!(Objective::Final.reduce(&scores, 0.5), Some(0.4));
        assert_eq!(Objective::Best.reduce(&scores, 0.5), Some(0.6));
        let smoothed = Objective::Smoothed.reduce(&scores, 0.5).unwrap();
        // ((0.2 + 0.6) / 2 + 0.4) / 2
        assert!((smoothed - 0.4).abs() < 1e-6);
        assert_eq!(Objective::Final.reduce(&[], 0.5), None);
    }

    #[test]
    fn test_search_config_validation() {
        SearchConfig::default().validate().unwrap();
        assert!(SearchConfig {
            trials: 0,
            ..SearchConfig::default()
        }
        .validate()
        .is_err());
        assert!(SearchConfig {
            smoothing: 0.0,
            ..SearchConfig::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_trial_result_json() {
        let result = TrialResult::failed(4, RunConfig::default(), "boom".to_string());
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"error\":\"boom\""));
        let back: TrialResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_sequential_search_reports_every_trial() {
        let tracker = Arc::new(MemoryTracker::new());
        let controller =
            SearchController::new(tiny_base(), tiny_training(), tiny_search(2, false), tracker.clone())
                .unwrap();
        let results = controller.run().unwrap();

        assert_eq!(results.len(), 2);
        for (id, result) in results.iter().enumerate() {
            assert_eq!(result.trial_id, id);
            assert_eq!(result.status, TrialStatus::Completed);
            assert!(!result.pruned);
            assert!(result.objective.is_some());
            assert_eq!(result.config.episode_budget, 8);
        }
        let logged = tracker.trials();
        assert_eq!(logged, results);
        let runs: Vec<String> = tracker.params().into_iter().map(|(id, _)| id).collect();
        assert_eq!(runs, vec!["trial-000".to_string(), "trial-001".to_string()]);
        assert!(best(&results).is_some());
    }

    #[test]
    fn test_parallel_search_samples_same_configs() {
        let tracker = Arc::new(MemoryTracker::new());
        let parallel =
            SearchController::new(tiny_base(), tiny_training(), tiny_search(3, true), tracker.clone())
                .unwrap();
        let sequential = SearchController::new(
            tiny_base(),
            tiny_training(),
            tiny_search(3, false),
            Arc::new(MemoryTracker::new()),
        )
        .unwrap();
        assert_eq!(parallel.sample_configs(), sequential.sample_configs());

        let results = parallel.run().unwrap();
        let ids: Vec<usize> = results.iter().map(|r| r.trial_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(results.iter().all(|r| r.status == TrialStatus::Completed));
        assert_eq!(tracker.trials().len(), 3);
    }

    #[test]
    fn test_failed_trial_does_not_stop_search() {
        let tracker = Arc::new(MemoryTracker::new());
        let base = RunConfig {
            hidden_size: 0,
            ..tiny_base()
        };
        let controller =
            SearchController::new(base, tiny_training(), tiny_search(2, false), tracker.clone()).unwrap();
        let results = controller.run().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r.status, TrialStatus::Failed { .. }) && r.objective.is_none()));
        assert_eq!(tracker.trials().len(), 2);
        assert!(best(&results).is_none());
    }

    #[test]
    fn test_trial_below_median_is_reported_pruned() {
        let tracker = Arc::new(MemoryTracker::new());
        let search = SearchConfig {
            startup_trials: 1,
            warmup_evaluations: 0,
            ..tiny_search(1, false)
        };
        let controller =
            SearchController::new(tiny_base(), tiny_training(), search, tracker.clone()).unwrap();
        // A finished peer no win rate can reach.
        assert!(!controller.pruner.report(99, 0, 1.1));
        controller.pruner.trial_finished(99);

        let results = controller.run().unwrap();
        assert_eq!(results.len(), 1);
        let trial = &results[0];
        assert_eq!(trial.status, TrialStatus::Pruned);
        assert!(trial.pruned);
        assert!(trial.objective.is_some());

        let logged = tracker.trials();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, TrialStatus::Pruned);
        assert!(logged[0].pruned);
        assert!(best(&results).is_none());
        assert_eq!(controller.pruner.finished_trials(), 1);
    }

    #[test]
    fn test_best_ignores_pruned() {
        let mut pruned = TrialResult::failed(0, RunConfig::default(), String::new());
        pruned.status = TrialStatus::Pruned;
        pruned.pruned = true;
        pruned.objective = Some(0.9);
        let mut done = TrialResult::failed(1, RunConfig::default(), String::new());
        done.status = TrialStatus::Completed;
        done.objective = Some(0.4);
        let results = [pruned, done];
        assert_eq!(best(&results).map(|r| r.trial_id), Some(1));
    }
}

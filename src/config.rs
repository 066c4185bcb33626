use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ai::exploration::ScheduleKind;
use crate::ai::LossKind;
use crate::checkpoint::CheckpointManagerConfig;
use crate::error::ConfigError;
use crate::search::SearchConfig;
use crate::training::orchestrator::TrainingConfig;
use crate::training::tracker::TrackingConfig;

/// Relative sampling weights for the opponent faced in each training episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpponentWeights {
    pub random: f64,
    pub rule_based: f64,
    /// Weight shared by all frozen snapshots of promoted policies.
    pub frozen: f64,
}

impl Default for OpponentWeights {
    fn default() -> Self {
        OpponentWeights {
            random: 1.0,
            rule_based: 1.0,
            frozen: 0.0,
        }
    }
}

/// Hyperparameters of one training run. Stored inside every checkpoint and
/// varied by the hyperparameter search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub learning_rate: f64,
    /// Multiplier applied every `lr_decay_interval` episodes.
    pub learning_rate_decay: f64,
    pub min_learning_rate: f64,
    pub lr_decay_interval: usize,
    pub gamma: f32,
    pub epsilon_start: f32,
    pub epsilon_end: f32,
    pub epsilon_decay_steps: usize,
    pub epsilon_schedule: ScheduleKind,
    /// Per-step factor for the exponential schedule.
    pub epsilon_decay_rate: f32,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    /// Learning starts once the buffer holds max(batch_size, min_replay_size).
    pub min_replay_size: usize,
    /// Environment steps between learner updates.
    pub train_every: usize,
    /// Learner steps between target syncs.
    pub target_sync_interval: usize,
    pub episode_budget: usize,
    pub loss: LossKind,
    pub max_grad_norm: f32,
    /// Width of the fully connected hidden layer of the Q-network.
    pub hidden_size: usize,
    pub seed: u64,
    pub opponents: OpponentWeights,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            learning_rate: 5e-4,
            learning_rate_decay: 0.999,
            min_learning_rate: 1e-5,
            lr_decay_interval: 1000,
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_end: 0.1,
            epsilon_decay_steps: 50_000,
            epsilon_schedule: ScheduleKind::Linear,
            epsilon_decay_rate: 0.9999,
            buffer_capacity: 50_000,
            batch_size: 64,
            min_replay_size: 1000,
            train_every: 1,
            target_sync_interval: 1000,
            episode_budget: 20_000,
            loss: LossKind::Huber,
            max_grad_norm: 10.0,
            hidden_size: 128,
            seed: 42,
            opponents: OpponentWeights::default(),
        }
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Validation(msg.to_string())
}

impl RunConfig {
    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(invalid("run.learning_rate must be a finite value > 0"));
        }
        if !(self.learning_rate_decay > 0.0 && self.learning_rate_decay <= 1.0) {
            return Err(invalid("run.learning_rate_decay must be in (0, 1]"));
        }
        if self.min_learning_rate < 0.0 || self.min_learning_rate > self.learning_rate {
            return Err(invalid("run.min_learning_rate must be in [0, run.learning_rate]"));
        }
        if self.lr_decay_interval == 0 {
            return Err(invalid("run.lr_decay_interval must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(invalid("run.gamma must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.epsilon_start) {
            return Err(invalid("run.epsilon_start must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.epsilon_end) {
            return Err(invalid("run.epsilon_end must be in [0, 1]"));
        }
        if self.epsilon_end > self.epsilon_start {
            return Err(invalid("run.epsilon_end must be <= run.epsilon_start"));
        }
        if !(self.epsilon_decay_rate > 0.0 && self.epsilon_decay_rate <= 1.0) {
            return Err(invalid("run.epsilon_decay_rate must be in (0, 1]"));
        }
        if self.batch_size == 0 {
            return Err(invalid("run.batch_size must be > 0"));
        }
        if self.buffer_capacity < self.batch_size {
            return Err(invalid("run.buffer_capacity must be >= run.batch_size"));
        }
        if self.min_replay_size > self.buffer_capacity {
            return Err(invalid("run.min_replay_size must be <= run.buffer_capacity"));
        }
        if self.train_every == 0 {
            return Err(invalid("run.train_every must be > 0"));
        }
        if self.target_sync_interval == 0 {
            return Err(invalid("run.target_sync_interval must be > 0"));
        }
        if self.episode_budget == 0 {
            return Err(invalid("run.episode_budget must be > 0"));
        }
        if !(self.max_grad_norm > 0.0) {
            return Err(invalid("run.max_grad_norm must be > 0"));
        }
        if self.hidden_size == 0 {
            return Err(invalid("run.hidden_size must be > 0"));
        }
        let w = &self.opponents;
        if w.random < 0.0 || w.rule_based < 0.0 || w.frozen < 0.0 {
            return Err(invalid("run.opponents weights must be >= 0"));
        }
        if !(w.random + w.rule_based > 0.0) {
            return Err(invalid(
                "run.opponents needs a positive random or rule_based weight",
            ));
        }
        Ok(())
    }

    /// Buffer size at which learner updates begin.
    pub fn warmup_size(&self) -> usize {
        self.min_replay_size.max(self.batch_size)
    }
}

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub training: TrainingConfig,
    pub checkpoint: CheckpointManagerConfig,
    pub search: SearchConfig,
    pub tracking: TrackingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::warn!(
                "config file '{}' not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()?;
        self.training.validate()?;
        if self.checkpoint.keep_last_n == 0 {
            return Err(invalid("checkpoint.keep_last_n must be >= 1"));
        }
        self.search.validate()?;
        Ok(())
    }

    /// TOML with every default value filled in.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        AppConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[run]
learning_rate = 0.001

[run.opponents]
frozen = 0.5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!((config.run.learning_rate - 0.001).abs() < 1e-12);
        assert!((config.run.gamma - 0.99).abs() < 1e-6);
        assert!((config.run.opponents.frozen - 0.5).abs() < 1e-12);
        assert!((config.run.opponents.random - 1.0).abs() < 1e-12);
        assert_eq!(config.run.episode_budget, 20_000);
    }

    #[test]
    fn test_enum_fields_parse_snake_case() {
        let toml_str = r#"
[run]
loss = "mse"
epsilon_schedule = "exponential"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.loss, LossKind::Mse);
        assert_eq!(config.run.epsilon_schedule, ScheduleKind::Exponential);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default(Path::new("no_such_config.toml")).unwrap();
        assert_eq!(config.run, RunConfig::default());
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[run]\ngamma = 1.5").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_default_toml_roundtrips() {
        let config: AppConfig = toml::from_str(&AppConfig::default_toml().unwrap()).unwrap();
        config.validate().expect("roundtripped config should be valid");
        assert_eq!(config.run, RunConfig::default());
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let cases: Vec<fn(&mut RunConfig)> = vec![
            |c| c.learning_rate = 0.0,
            |c| c.learning_rate = -1e-3,
            |c| c.gamma = 1.01,
            |c| c.epsilon_start = 1.5,
            |c| c.epsilon_end = -0.1,
            |c| {
                c.epsilon_start = 0.1;
                c.epsilon_end = 0.5;
            },
            |c| c.batch_size = 0,
            |c| {
                c.buffer_capacity = 10;
                c.batch_size = 64;
                c.min_replay_size = 0;
            },
            |c| c.train_every = 0,
            |c| c.target_sync_interval = 0,
            |c| c.episode_budget = 0,
            |c| c.learning_rate_decay = 1.5,
            |c| c.opponents.random = -1.0,
            |c| {
                c.opponents.random = 0.0;
                c.opponents.rule_based = 0.0;
                c.opponents.frozen = 1.0;
            },
        ];
        for (i, mutate) in cases.into_iter().enumerate() {
            let mut config = RunConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {i} should be rejected");
        }
    }

    #[test]
    fn test_validation_does_not_clamp() {
        let mut config = AppConfig::default();
        config.run.gamma = 2.0;
        assert!(config.validate().is_err());
        assert_eq!(config.run.gamma, 2.0);
    }

    #[test]
    fn test_warmup_size_is_at_least_batch() {
        let config = RunConfig {
            min_replay_size: 8,
            batch_size: 32,
            ..Default::default()
        };
        assert_eq!(config.warmup_size(), 32);
    }
}

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;

/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Counters needed to continue a run where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub learner_steps: usize,
    pub env_steps: usize,
    /// Current learning rate after decay and instability cuts.
    pub learning_rate: f64,
}

/// Evaluation snapshot at checkpoint time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub eval_score: f32,
    pub draw_rate: f32,
    pub average_game_length: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_loss: Option<f32>,
}

/// Everything in a checkpoint except the byte streams. Written to metadata.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub episode_count: usize,
    pub best_eval_score: f32,
    pub timestamp: u64,
    /// Position in save order within the checkpoint directory.
    #[serde(default)]
    pub sequence: u64,
    pub run_config: RunConfig,
    pub progress: TrainingProgress,
    pub metrics: CheckpointMetrics,
}

/// Versioned trainable state. Loadable for resume, or by anything that only
/// needs the network weights to predict.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub format_version: u32,
    pub network_weights: Vec<u8>,
    pub optimizer_state: Vec<u8>,
    pub episode_count: usize,
    pub best_eval_score: f32,
    pub run_config: RunConfig,
    pub progress: TrainingProgress,
}

impl Checkpoint {
    pub fn new(
        network_weights: Vec<u8>,
        optimizer_state: Vec<u8>,
        episode_count: usize,
        best_eval_score: f32,
        run_config: RunConfig,
        progress: TrainingProgress,
    ) -> Self {
        Checkpoint {
            format_version: FORMAT_VERSION,
            network_weights,
            optimizer_state,
            episode_count,
            best_eval_score,
            run_config,
            progress,
        }
    }

    pub fn metadata(&self, metrics: CheckpointMetrics, timestamp: u64) -> CheckpointMetadata {
        CheckpointMetadata {
            format_version: self.format_version,
            episode_count: self.episode_count,
            best_eval_score: self.best_eval_score,
            timestamp,
            sequence: 0,
            run_config: self.run_config.clone(),
            progress: self.progress.clone(),
            metrics,
        }
    }

    pub(crate) fn from_parts(
        metadata: CheckpointMetadata,
        network_weights: Vec<u8>,
        optimizer_state: Vec<u8>,
    ) -> Self {
        Checkpoint {
            format_version: metadata.format_version,
            network_weights,
            optimizer_state,
            episode_count: metadata.episode_count,
            best_eval_score: metadata.best_eval_score,
            run_config: metadata.run_config,
            progress: metadata.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serde() {
        let checkpoint = Checkpoint::new(
            vec![1, 2, 3],
            vec![4, 5],
            5000,
            0.72,
            RunConfig::default(),
            TrainingProgress {
                learner_steps: 40_000,
                env_steps: 60_000,
                learning_rate: 4e-4,
            },
        );
        let meta = checkpoint.metadata(
            CheckpointMetrics {
                eval_score: 0.72,
                draw_rate: 0.05,
                average_game_length: 21.5,
                average_loss: None,
            },
            1_700_000_000,
        );

        let json = serde_json::to_string_pretty(&meta).unwrap();
        assert!(!json.contains("average_loss"));
        let back: CheckpointMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.format_version, FORMAT_VERSION);
        assert_eq!(back.episode_count, 5000);
        assert_eq!(back.run_config, RunConfig::default());
        assert_eq!(back.progress, checkpoint.progress);
        assert_eq!(back.sequence, 0);

        let rebuilt = Checkpoint::from_parts(back, vec![1, 2, 3], vec![4, 5]);
        assert_eq!(rebuilt.network_weights, checkpoint.network_weights);
        assert!((rebuilt.best_eval_score - 0.72).abs() < 1e-6);
    }
}

use log::debug;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::ConfigError;

/// Ranges the tuner draws run configs from. Everything not listed here is
/// copied from the base config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    /// Log-uniform.
    pub learning_rate: [f64; 2],
    /// Log-uniform.
    pub learning_rate_decay: [f64; 2],
    pub gamma: [f32; 2],
    /// Log-uniform.
    pub epsilon_end: [f32; 2],
    pub batch_sizes: Vec<usize>,
    pub buffer_capacities: Vec<usize>,
    pub target_sync_intervals: Vec<usize>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        SearchSpace {
            learning_rate: [4e-5, 8e-4],
            learning_rate_decay: [0.99, 0.999],
            gamma: [0.99, 0.999],
            epsilon_end: [0.05, 0.2],
            batch_sizes: vec![32, 64, 128],
            buffer_capacities: vec![10_000, 50_000, 100_000],
            target_sync_intervals: vec![500, 1000, 2000],
        }
    }
}

fn log_uniform<R: Rng + ?Sized>(rng: &mut R, [lo, hi]: [f64; 2]) -> f64 {
    rng.random_range(lo.ln()..=hi.ln()).exp()
}

fn pick<R: Rng + ?Sized>(rng: &mut R, choices: &[usize], fallback: usize) -> usize {
    choices.choose(rng).copied().unwrap_or(fallback)
}

impl SearchSpace {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));
        let [lr_lo, lr_hi] = self.learning_rate;
        if !(lr_lo > 0.0 && lr_lo <= lr_hi) {
            return invalid("search.space.learning_rate must satisfy 0 < low <= high");
        }
        let [d_lo, d_hi] = self.learning_rate_decay;
        if !(d_lo > 0.0 && d_lo <= d_hi && d_hi <= 1.0) {
            return invalid("search.space.learning_rate_decay must satisfy 0 < low <= high <= 1");
        }
        let [g_lo, g_hi] = self.gamma;
        if !(0.0..=1.0).contains(&g_lo) || !(0.0..=1.0).contains(&g_hi) || g_lo > g_hi {
            return invalid("search.space.gamma must satisfy 0 <= low <= high <= 1");
        }
        let [e_lo, e_hi] = self.epsilon_end;
        if !(e_lo > 0.0 && e_lo <= e_hi && e_hi <= 1.0) {
            return invalid("search.space.epsilon_end must satisfy 0 < low <= high <= 1");
        }
        if self.batch_sizes.is_empty()
            || self.buffer_capacities.is_empty()
            || self.target_sync_intervals.is_empty()
        {
            return invalid("search.space choice lists must not be empty");
        }
        if self
            .batch_sizes
            .iter()
            .chain(&self.buffer_capacities)
            .chain(&self.target_sync_intervals)
            .any(|&v| v == 0)
        {
            return invalid("search.space choices must be > 0");
        }
        let max_batch = self.batch_sizes.iter().copied().max().unwrap_or(0);
        let min_buffer = self.buffer_capacities.iter().copied().min().unwrap_or(0);
        if min_buffer < max_batch {
            return invalid("search.space buffer capacities must be >= every batch size");
        }
        Ok(())
    }

    /// Draw one config. Fields outside the space come from `base`, lowered
    /// where they would conflict with a sampled value.
    pub fn sample<R: Rng + ?Sized>(&self, base: &RunConfig, rng: &mut R) -> RunConfig {
        let learning_rate = log_uniform(rng, self.learning_rate);
        let learning_rate_decay = log_uniform(rng, self.learning_rate_decay);
        let [g_lo, g_hi] = self.gamma;
        let gamma = rng.random_range(g_lo..=g_hi);
        let [e_lo, e_hi] = self.epsilon_end;
        let epsilon_end =
            (log_uniform(rng, [f64::from(e_lo), f64::from(e_hi)]) as f32).clamp(e_lo, e_hi);
        let batch_size = pick(rng, &self.batch_sizes, base.batch_size);
        let buffer_capacity = pick(rng, &self.buffer_capacities, base.buffer_capacity);
        let target_sync_interval = pick(rng, &self.target_sync_intervals, base.target_sync_interval);

        let min_learning_rate = if base.min_learning_rate > learning_rate {
            debug!(
                "min_learning_rate {:.2e} lowered to sampled learning_rate {:.2e}",
                base.min_learning_rate, learning_rate
            );
            learning_rate
        } else {
            base.min_learning_rate
        };
        let epsilon_end = if epsilon_end > base.epsilon_start {
            debug!(
                "sampled epsilon_end {:.3} lowered to epsilon_start {:.3}",
                epsilon_end, base.epsilon_start
            );
            base.epsilon_start
        } else {
            epsilon_end
        };
        let min_replay_size = if base.min_replay_size > buffer_capacity {
            debug!(
                "min_replay_size {} lowered to sampled buffer_capacity {}",
                base.min_replay_size, buffer_capacity
            );
            buffer_capacity
        } else {
            base.min_replay_size
        };

        RunConfig {
            learning_rate,
            learning_rate_decay: learning_rate_decay.min(1.0),
            min_learning_rate,
            gamma,
            epsilon_end,
            batch_size,
            buffer_capacity,
            min_replay_size,
            target_sync_interval,
            ..base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_samples_stay_in_range() {
        let space = SearchSpace::default();
        space.validate().unwrap();
        let base = RunConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let config = space.sample(&base, &mut rng);
            assert!((4e-5..=8e-4).contains(&config.learning_rate));
            assert!((0.99..=0.999).contains(&config.gamma));
            assert!((0.05..=0.2).contains(&config.epsilon_end));
            assert!(space.batch_sizes.contains(&config.batch_size));
            assert!(space.buffer_capacities.contains(&config.buffer_capacity));
            assert!(space.target_sync_intervals.contains(&config.target_sync_interval));
            assert_eq!(config.seed, base.seed);
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_conflicting_base_values_are_lowered() {
        let space = SearchSpace {
            batch_sizes: vec![8],
            buffer_capacities: vec![64],
            ..SearchSpace::default()
        };
        let base = RunConfig {
            min_learning_rate: 1e-3,
            epsilon_start: 0.06,
            min_replay_size: 1000,
            ..RunConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let config = space.sample(&base, &mut rng);
            assert_eq!(config.min_learning_rate, config.learning_rate);
            assert!(config.epsilon_end <= 0.06);
            assert_eq!(config.min_replay_size, 64);
            config.validate().unwrap();
        }

        let fitting = RunConfig {
            min_learning_rate: 1e-6,
            min_replay_size: 32,
            ..RunConfig::default()
        };
        let config = space.sample(&fitting, &mut rng);
        assert_eq!(config.min_learning_rate, 1e-6);
        assert_eq!(config.min_replay_size, 32);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let space = SearchSpace::default();
        let base = RunConfig::default();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..5).map(|_| space.sample(&base, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
        assert_ne!(draw(11), draw(12));
    }

    #[test]
    fn test_learning_rate_is_log_uniform() {
        let space = SearchSpace::default();
        let base = RunConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        // Geometric midpoint of [4e-5, 8e-4].
        let midpoint = (4e-5f64 * 8e-4).sqrt();
        let below = (0..2000)
            .filter(|_| space.sample(&base, &mut rng).learning_rate < midpoint)
            .count();
        assert!((850..=1150).contains(&below), "{below} draws below midpoint");
    }

    #[test]
    fn test_rejects_bad_space() {
        let bad = [
            SearchSpace {
                learning_rate: [1e-3, 1e-4],
                ..SearchSpace::default()
            },
            SearchSpace {
                batch_sizes: Vec::new(),
                ..SearchSpace::default()
            },
            SearchSpace {
                buffer_capacities: vec![16],
                ..SearchSpace::default()
            },
            SearchSpace {
                gamma: [0.9, 1.1],
                ..SearchSpace::default()
            },
        ];
        for space in bad {
            assert!(space.validate().is_err(), "{space:?}");
        }
    }
}

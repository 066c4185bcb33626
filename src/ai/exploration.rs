use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::game::COLS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Linear,
    Exponential,
}

/// Epsilon as a function of the environment step count. Non-increasing in `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    pub kind: ScheduleKind,
    pub start: f32,
    pub end: f32,
    pub decay_steps: usize,
    pub decay_rate: f32,
}

impl EpsilonSchedule {
    pub fn linear(start: f32, end: f32, decay_steps: usize) -> Self {
        EpsilonSchedule {
            kind: ScheduleKind::Linear,
            start,
            end,
            decay_steps,
            decay_rate: 1.0,
        }
    }

    pub fn exponential(start: f32, end: f32, decay_rate: f32) -> Self {
        EpsilonSchedule {
            kind: ScheduleKind::Exponential,
            start,
            end,
            decay_steps: 0,
            decay_rate,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        EpsilonSchedule {
            kind: config.epsilon_schedule,
            start: config.epsilon_start,
            end: config.epsilon_end,
            decay_steps: config.epsilon_decay_steps,
            decay_rate: config.epsilon_decay_rate,
        }
    }

    pub fn epsilon(&self, t: usize) -> f32 {
        match self.kind {
            ScheduleKind::Linear => {
                if t >= self.decay_steps {
                    return self.end;
                }
                let progress = t as f32 / self.decay_steps as f32;
                (self.start - progress * (self.start - self.end)).max(self.end)
            }
            ScheduleKind::Exponential => (self.start * self.decay_rate.powf(t as f32)).max(self.end),
        }
    }
}

/// Highest-valued legal column. Illegal columns and NaN values are masked to
/// -inf before the argmax and ties go to the lowest column index.
pub fn greedy_action(values: &[f32; COLS], legal: &[usize]) -> Option<usize> {
    let mut masked = [f32::NEG_INFINITY; COLS];
    for &col in legal.iter().filter(|&&c| c < COLS) {
        if !values[col].is_nan() {
            masked[col] = values[col];
        }
    }

    let mut best = *legal.iter().filter(|&&c| c < COLS).min()?;
    for (col, &value) in masked.iter().enumerate() {
        if value > masked[best] {
            best = col;
        }
    }
    Some(best)
}

/// Epsilon-greedy selection over legal columns. `None` only when `legal` is empty.
pub fn select_action<R: Rng + ?Sized>(
    values: &[f32; COLS],
    legal: &[usize],
    epsilon: f32,
    rng: &mut R,
) -> Option<usize> {
    if legal.is_empty() {
        return None;
    }
    if epsilon > 0.0 && rng.random::<f32>() < epsilon {
        return Some(legal[rng.random_range(0..legal.len())]);
    }
    greedy_action(values, legal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_endpoints() {
        let s = EpsilonSchedule::linear(1.0, 0.1, 1000);
        assert_eq!(s.epsilon(0), 1.0);
        assert_eq!(s.epsilon(1000), 0.1);
        assert_eq!(s.epsilon(50_000), 0.1);
        assert!((s.epsilon(500) - 0.55).abs() < 1e-5);
    }

    #[test]
    fn test_linear_non_increasing() {
        let s = EpsilonSchedule::linear(0.9, 0.05, 777);
        let mut prev = s.epsilon(0);
        for t in 1..=1000 {
            let e = s.epsilon(t);
            assert!(e <= prev, "epsilon rose at t={t}: {prev} -> {e}");
            prev = e;
        }
    }

    #[test]
    fn test_zero_decay_steps_jumps_to_end() {
        let s = EpsilonSchedule::linear(1.0, 0.05, 0);
        assert_eq!(s.epsilon(0), 0.05);
    }

    #[test]
    fn test_exponential_schedule() {
        let s = EpsilonSchedule::exponential(1.0, 0.1, 0.5);
        assert_eq!(s.epsilon(0), 1.0);
        assert!((s.epsilon(1) - 0.5).abs() < 1e-6);
        assert!((s.epsilon(2) - 0.25).abs() < 1e-6);
        assert_eq!(s.epsilon(10), 0.1);

        let mut prev = s.epsilon(0);
        for t in 1..100 {
            assert!(s.epsilon(t) <= prev);
            prev = s.epsilon(t);
        }
    }

    #[test]
    fn test_greedy_masks_illegal_columns() {
        let values = [0.0, 9.0, 0.5, 0.2, 0.0, 0.0, 0.0];
        assert_eq!(greedy_action(&values, &[0, 2, 3]), Some(2));
    }

    #[test]
    fn test_greedy_ties_break_to_lowest_index() {
        let values = [0.3, 0.7, 0.7, 0.1, 0.7, 0.0, 0.0];
        assert_eq!(greedy_action(&values, &[0, 1, 2, 3, 4, 5, 6]), Some(1));
        assert_eq!(greedy_action(&values, &[4, 2]), Some(2));
    }

    #[test]
    fn test_greedy_handles_non_finite_values() {
        let values = [f32::NEG_INFINITY; COLS];
        assert_eq!(greedy_action(&values, &[5, 6]), Some(5));
        let values = [f32::NAN; COLS];
        assert_eq!(greedy_action(&values, &[3, 4]), Some(3));
        assert_eq!(greedy_action(&values, &[]), None);
    }

    #[test]
    fn test_greedy_skips_nan_in_lowest_legal_column() {
        let values = [f32::NAN, 1.0, 0.5, -2.0, 0.0, 0.0, 0.0];
        assert_eq!(greedy_action(&values, &[0, 1, 2, 3, 4, 5, 6]), Some(1));
        let values = [0.0, 0.0, f32::NAN, -1.0, -3.0, 0.0, 0.0];
        assert_eq!(greedy_action(&values, &[2, 3, 4]), Some(3));
    }

    #[test]
    fn test_zero_epsilon_is_greedy() {
        let mut rng = StdRng::seed_from_u64(0);
        let values = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        for _ in 0..50 {
            assert_eq!(select_action(&values, &[0, 3, 6], 0.0, &mut rng), Some(6));
        }
    }

    #[test]
    fn test_full_epsilon_stays_legal_and_explores() {
        let mut rng = StdRng::seed_from_u64(0);
        let values = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let legal = [1, 4, 6];
        let mut seen = [false; COLS];
        for _ in 0..200 {
            let col = select_action(&values, &legal, 1.0, &mut rng).unwrap();
            assert!(legal.contains(&col));
            seen[col] = true;
        }
        assert!(seen[1] && seen[4] && seen[6]);
    }
}

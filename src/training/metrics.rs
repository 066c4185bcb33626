use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Game result from the learner's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

/// Result of a single training episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeResult {
    pub outcome: Outcome,
    pub game_length: usize,
}

/// Rolling-window statistics over recent episodes and updates.
pub struct TrainingMetrics {
    episode_results: VecDeque<EpisodeResult>,
    update_losses: VecDeque<f32>,
    capacity: usize,
    total_episodes: usize, // lifetime count, never capped
}

impl TrainingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TrainingMetrics {
            episode_results: VecDeque::with_capacity(capacity),
            update_losses: VecDeque::with_capacity(capacity),
            capacity,
            total_episodes: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn record_episode(&mut self, result: EpisodeResult) {
        self.total_episodes += 1;
        self.episode_results.push_back(result);
        if self.episode_results.len() > self.capacity {
            self.episode_results.pop_front();
        }
    }

    pub fn record_update(&mut self, loss: f32) {
        self.update_losses.push_back(loss);
        if self.update_losses.len() > self.capacity {
            self.update_losses.pop_front();
        }
    }

    fn rate(&self, last_n: usize, outcome: Outcome) -> f32 {
        let n = self.episode_results.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let hits = self
            .episode_results
            .iter()
            .rev()
            .take(n)
            .filter(|r| r.outcome == outcome)
            .count();
        hits as f32 / n as f32
    }

    /// Learner win rate in the last N episodes.
    pub fn win_rate(&self, last_n: usize) -> f32 {
        self.rate(last_n, Outcome::Win)
    }

    pub fn draw_rate(&self, last_n: usize) -> f32 {
        self.rate(last_n, Outcome::Draw)
    }

    /// Average loss over the last N updates, `None` before the first update.
    pub fn average_loss(&self, last_n: usize) -> Option<f32> {
        let n = self.update_losses.len().min(last_n);
        if n == 0 {
            return None;
        }
        let sum: f32 = self.update_losses.iter().rev().take(n).sum();
        Some(sum / n as f32)
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.update_losses.back().copied()
    }

    pub fn average_game_length(&self, last_n: usize) -> f32 {
        let n = self.episode_results.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let total: usize = self
            .episode_results
            .iter()
            .rev()
            .take(n)
            .map(|r| r.game_length)
            .sum();
        total as f32 / n as f32
    }

    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Throughput window for the periodic log line. Evaluation and checkpoint
/// time is recorded as overhead and excluded.
pub struct TimingMetrics {
    update_micros: VecDeque<u32>,
    capacity: usize,
    window_start: Instant,
    window_count: usize,
    window_overhead_micros: u128,
}

impl TimingMetrics {
    pub fn with_capacity(capacity: usize) -> Self {
        TimingMetrics {
            update_micros: VecDeque::with_capacity(capacity),
            capacity,
            window_start: Instant::now(),
            window_count: 0,
            window_overhead_micros: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn record_episode(&mut self) {
        self.window_count += 1;
    }

    pub fn record_update_time(&mut self, d: Duration) {
        self.update_micros.push_back(d.as_micros() as u32);
        if self.update_micros.len() > self.capacity {
            self.update_micros.pop_front();
        }
    }

    pub fn record_overhead(&mut self, d: Duration) {
        self.window_overhead_micros += d.as_micros();
    }

    /// Mean of the last `last_n` update times in milliseconds.
    pub fn avg_update_ms(&self, last_n: usize) -> f32 {
        let n = self.update_micros.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let mean = self
            .update_micros
            .iter()
            .rev()
            .take(n)
            .map(|&v| v as f64)
            .sum::<f64>()
            / n as f64;
        (mean / 1000.0) as f32
    }

    pub fn episodes_per_sec(&self) -> f32 {
        let total_micros = self.window_start.elapsed().as_micros();
        let net_micros = total_micros.saturating_sub(self.window_overhead_micros);
        if net_micros == 0 {
            return 0.0;
        }
        self.window_count as f32 / (net_micros as f32 / 1_000_000.0)
    }

    pub fn reset_window(&mut self) {
        self.window_start = Instant::now();
        self.window_count = 0;
        self.window_overhead_micros = 0;
    }
}

impl Default for TimingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

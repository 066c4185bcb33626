use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use log::debug;

#[derive(Debug, Default)]
struct PrunerState {
    /// Intermediate scores per trial, indexed by evaluation number.
    scores: HashMap<usize, Vec<f32>>,
    finished: HashSet<usize>,
}

/// Stops a trial whose intermediate score falls below the median of the
/// finished trials at the same evaluation.
///
/// Shared by every trial of a search, so reports may arrive concurrently.
#[derive(Debug)]
pub struct MedianPruner {
    startup_trials: usize,
    warmup_evaluations: usize,
    state: Mutex<PrunerState>,
}

impl MedianPruner {
    /// Nothing is pruned until `startup_trials` trials have finished, and no
    /// trial is pruned on its first `warmup_evaluations` evaluations.
    pub fn new(startup_trials: usize, warmup_evaluations: usize) -> Self {
        MedianPruner {
            startup_trials,
            warmup_evaluations,
            state: Mutex::new(PrunerState::default()),
        }
    }

    /// Record `score` for `trial` at evaluation `step`. Returns true when the
    /// trial should stop.
    pub fn report(&self, trial: usize, step: usize, score: f32) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let history = state.scores.entry(trial).or_default();
        history.truncate(step);
        history.push(score);

        if state.finished.len() < self.startup_trials || step < self.warmup_evaluations {
            return false;
        }
        let mut peers: Vec<f32> = state
            .finished
            .iter()
            .filter_map(|id| state.scores.get(id)?.get(step).copied())
            .collect();
        let Some(median) = median(&mut peers) else {
            return false;
        };
        let prune = score < median;
        if prune {
            debug!("pruning trial {trial}: {score:.3} < median {median:.3} at evaluation {step}");
        }
        prune
    }

    /// Mark a trial as finished so its scores count toward the median.
    pub fn trial_finished(&self, trial: usize) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.finished.insert(trial);
    }

    pub fn finished_trials(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished
            .len()
    }
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(pruner: &MedianPruner, trial: usize, scores: &[f32]) {
        for (step, &score) in scores.iter().enumerate() {
            pruner.report(trial, step, score);
        }
        pruner.trial_finished(trial);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [0.3, 0.1, 0.2]), Some(0.2));
        let even = median(&mut [0.4, 0.2]).unwrap();
        assert!((even - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_no_pruning_during_startup() {
        let pruner = MedianPruner::new(2, 0);
        finish(&pruner, 0, &[0.9, 0.9]);
        assert!(!pruner.report(1, 0, 0.0));
        assert_eq!(pruner.finished_trials(), 1);
    }

    #[test]
    fn test_prunes_below_median() {
        let pruner = MedianPruner::new(2, 1);
        finish(&pruner, 0, &[0.4, 0.6]);
        finish(&pruner, 1, &[0.6, 0.8]);

        // Warmup evaluation is never pruned.
        assert!(!pruner.report(2, 0, 0.1));
        assert!(pruner.report(2, 1, 0.5));
        assert!(!pruner.report(3, 0, 0.1));
        assert!(!pruner.report(3, 1, 0.75));
    }

    #[test]
    fn test_unfinished_trials_do_not_count() {
        let pruner = MedianPruner::new(1, 0);
        finish(&pruner, 0, &[0.5]);
        pruner.report(1, 0, 0.9);
        // Median is still 0.5 from the single finished trial.
        assert!(pruner.report(2, 0, 0.4));
        assert!(!pruner.report(3, 0, 0.6));
    }

    #[test]
    fn test_step_beyond_peer_history() {
        let pruner = MedianPruner::new(1, 0);
        finish(&pruner, 0, &[0.5]);
        assert!(!pruner.report(1, 3, 0.0));
    }
}

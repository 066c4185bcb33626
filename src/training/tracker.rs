use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::search::TrialResult;

/// One line of the per-episode metric log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f32>,
    pub epsilon: f32,
    pub learning_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_winrate: Option<f32>,
}

/// A persisted checkpoint handed to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub episode: usize,
    pub path: PathBuf,
    pub score: f32,
}

/// Sink for run parameters, metrics, artifacts and trial results.
///
/// Passed explicitly to each run. Implementations must tolerate concurrent
/// calls from parallel trials.
pub trait ExperimentTracker: Send + Sync {
    fn log_params(&self, run_id: &str, config: &RunConfig) -> io::Result<()>;

    fn log_episode(&self, run_id: &str, record: &EpisodeRecord) -> io::Result<()>;

    fn log_artifact(&self, run_id: &str, record: &ArtifactRecord) -> io::Result<()>;

    fn log_trial(&self, result: &TrialResult) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            enabled: true,
            dir: PathBuf::from("runs"),
        }
    }
}

impl TrackingConfig {
    pub fn build(&self) -> io::Result<Arc<dyn ExperimentTracker>> {
        if self.enabled {
            Ok(Arc::new(FileTracker::new(&self.dir)?))
        } else {
            Ok(Arc::new(NullTracker))
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTracker;

impl ExperimentTracker for NullTracker {
    fn log_params(&self, _run_id: &str, _config: &RunConfig) -> io::Result<()> {
        Ok(())
    }

    fn log_episode(&self, _run_id: &str, _record: &EpisodeRecord) -> io::Result<()> {
        Ok(())
    }

    fn log_artifact(&self, _run_id: &str, _record: &ArtifactRecord) -> io::Result<()> {
        Ok(())
    }

    fn log_trial(&self, _result: &TrialResult) -> io::Result<()> {
        Ok(())
    }
}

/// JSON files under a root directory:
///
/// ```text
/// <root>/<run_id>/params.json
/// <root>/<run_id>/metrics.jsonl
/// <root>/<run_id>/artifacts.jsonl
/// <root>/trials.jsonl
/// ```
pub struct FileTracker {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTracker {
    pub fn new(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        Ok(FileTracker {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> io::Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())
    }
}

impl ExperimentTracker for FileTracker {
    fn log_params(&self, run_id: &str, config: &RunConfig) -> io::Result<()> {
        let dir = self.run_dir(run_id);
        let json = serde_json::to_string_pretty(config)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("params.json"), json)
    }

    fn log_episode(&self, run_id: &str, record: &EpisodeRecord) -> io::Result<()> {
        self.append_line(&self.run_dir(run_id).join("metrics.jsonl"), record)
    }

    fn log_artifact(&self, run_id: &str, record: &ArtifactRecord) -> io::Result<()> {
        self.append_line(&self.run_dir(run_id).join("artifacts.jsonl"), record)
    }

    fn log_trial(&self, result: &TrialResult) -> io::Result<()> {
        self.append_line(&self.root.join("trials.jsonl"), result)
    }
}

/// Keeps everything in memory. Useful for inspecting what a run reported.
#[derive(Default)]
pub struct MemoryTracker {
    params: Mutex<Vec<(String, RunConfig)>>,
    episodes: Mutex<Vec<(String, EpisodeRecord)>>,
    artifacts: Mutex<Vec<(String, ArtifactRecord)>>,
    trials: Mutex<Vec<TrialResult>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> Vec<(String, RunConfig)> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn episodes(&self) -> Vec<(String, EpisodeRecord)> {
        self.episodes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn artifacts(&self) -> Vec<(String, ArtifactRecord)> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn trials(&self) -> Vec<TrialResult> {
        self.trials.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ExperimentTracker for MemoryTracker {
    fn log_params(&self, run_id: &str, config: &RunConfig) -> io::Result<()> {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((run_id.to_string(), config.clone()));
        Ok(())
    }

    fn log_episode(&self, run_id: &str, record: &EpisodeRecord) -> io::Result<()> {
        self.episodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((run_id.to_string(), record.clone()));
        Ok(())
    }

    fn log_artifact(&self, run_id: &str, record: &ArtifactRecord) -> io::Result<()> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((run_id.to_string(), record.clone()));
        Ok(())
    }

    fn log_trial(&self, result: &TrialResult) -> io::Result<()> {
        self.trials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::TrialStatus;

    fn record(episode: usize) -> EpisodeRecord {
        EpisodeRecord {
            episode,
            loss: Some(0.25),
            epsilon: 0.5,
            learning_rate: 5e-4,
            eval_winrate: None,
        }
    }

    #[test]
    fn test_file_tracker_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(dir.path()).unwrap();

        tracker.log_params("run-1", &RunConfig::default()).unwrap();
        tracker.log_episode("run-1", &record(1)).unwrap();
        tracker.log_episode("run-1", &record(2)).unwrap();
        tracker
            .log_artifact(
                "run-1",
                &ArtifactRecord {
                    episode: 2,
                    path: PathBuf::from("checkpoints/checkpoint_0000002"),
                    score: 0.75,
                },
            )
            .unwrap();

        let params: RunConfig = serde_json::from_str(
            &fs::read_to_string(dir.path().join("run-1/params.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(params, RunConfig::default());

        let metrics = fs::read_to_string(dir.path().join("run-1/metrics.jsonl")).unwrap();
        let lines: Vec<EpisodeRecord> = metrics
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![record(1), record(2)]);
        assert!(!metrics.contains("eval_winrate"));

        let artifacts = fs::read_to_string(dir.path().join("run-1/artifacts.jsonl")).unwrap();
        assert_eq!(artifacts.lines().count(), 1);
    }

    #[test]
    fn test_file_tracker_trials_from_many_threads() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = FileTracker::new(dir.path()).unwrap();
        std::thread::scope(|s| {
            for id in 0..8 {
                let tracker = &tracker;
                s.spawn(move || {
                    tracker
                        .log_trial(&TrialResult {
                            trial_id: id,
                            config: RunConfig::default(),
                            objective: Some(0.5),
                            pruned: false,
                            status: TrialStatus::Completed,
                        })
                        .unwrap();
                });
            }
        });
        let content = fs::read_to_string(dir.path().join("trials.jsonl")).unwrap();
        let mut ids: Vec<usize> = content
            .lines()
            .map(|l| serde_json::from_str::<TrialResult>(l).unwrap().trial_id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_disabled_tracking_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackingConfig {
            enabled: false,
            dir: dir.path().join("runs"),
        };
        let tracker = config.build().unwrap();
        tracker.log_episode("run", &record(1)).unwrap();
        assert!(!dir.path().join("runs").exists());
    }

    #[test]
    fn test_memory_tracker_collects() {
        let tracker = MemoryTracker::new();
        tracker.log_episode("a", &record(3)).unwrap();
        assert_eq!(tracker.episodes(), vec![("a".to_string(), record(3))]);
        assert!(tracker.trials().is_empty());
    }
}

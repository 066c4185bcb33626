//! Training engine: self-play episodes, experience replay, evaluation,
//! experiment tracking and the orchestrator that ties them together.

pub mod concurrent;
pub mod episode;
pub mod evaluator;
pub mod metrics;
pub mod orchestrator;
pub mod replay_buffer;
pub mod tracker;

pub use concurrent::{CancellationToken, SharedReplayBuffer, SnapshotCell};
pub use evaluator::{EvaluationReport, Evaluator, MatchResult};
pub use metrics::{EpisodeResult, Outcome, TimingMetrics, TrainingMetrics};
pub use orchestrator::{EvalObserver, Orchestrator, Phase, RunStatus, RunSummary, TrainingConfig};
pub use replay_buffer::ReplayBuffer;
pub use tracker::{ExperimentTracker, FileTracker, MemoryTracker, NullTracker, TrackingConfig};

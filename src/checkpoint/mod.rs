//! Versioned checkpoints: atomic directory writes, a `latest` pointer, and
//! retention pruning.

mod manager;
mod metadata;

pub use manager::{CheckpointManager, CheckpointManagerConfig};
pub use metadata::{
    Checkpoint, CheckpointMetadata, CheckpointMetrics, TrainingProgress, FORMAT_VERSION,
};

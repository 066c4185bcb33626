use std::path::PathBuf;

/// A move the game engine refused. Inside training this is a contract violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMoveError {
    #[error("column {0} is out of range")]
    ColumnOutOfRange(usize),

    #[error("column {0} is full")]
    ColumnFull(usize),

    #[error("game is already over")]
    GameOver,
}

/// The replay buffer holds fewer transitions than a batch needs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("replay buffer holds {available} transitions, batch needs {requested}")]
pub struct InsufficientDataError {
    pub requested: usize,
    pub available: usize,
}

/// Failures inside the function approximator backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to record model state: {0}")]
    Record(String),

    #[error("unexpected tensor shape: {0}")]
    Shape(String),
}

/// An agent could not produce a move.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no legal moves: {0}")]
    NoLegalMoves(#[from] InvalidMoveError),

    #[error("policy inference failed: {0}")]
    Model(#[from] ModelError),
}

/// Errors that can occur during a learner update.
#[derive(Debug, thiserror::Error)]
pub enum LearnerError {
    #[error("non-finite loss {loss} ({consecutive} consecutive)")]
    NumericalInstability { loss: f32, consecutive: usize },

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("no 'latest' checkpoint recorded in {0}")]
    NoLatestCheckpoint(PathBuf),

    #[error("failed to read metadata from {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that abort a training run.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("engine rejected move: {source}\n{board}")]
    InvalidMove {
        board: String,
        source: InvalidMoveError,
    },

    #[error("agent failure: {0}")]
    Agent(#[from] AgentError),

    #[error("learner failure: {0}")]
    Learner(#[from] LearnerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("self-play worker failed: {0}")]
    Worker(String),
}

/// Errors that stop a whole hyperparameter search (single trial failures do not).
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("tracker error: {0}")]
    Tracker(#[from] std::io::Error),

    #[error("failed to start trial workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::NoLatestCheckpoint(PathBuf::from("checkpoints"));
        assert_eq!(
            err.to_string(),
            "no 'latest' checkpoint recorded in checkpoints"
        );
    }

    #[test]
    fn test_insufficient_data_display() {
        let err = InsufficientDataError {
            requested: 64,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "replay buffer holds 10 transitions, batch needs 64"
        );
    }

    #[test]
    fn test_training_error_includes_board() {
        let err = TrainingError::InvalidMove {
            board: ".......\nXO.....".to_string(),
            source: InvalidMoveError::ColumnFull(3),
        };
        let text = err.to_string();
        assert!(text.starts_with("engine rejected move: column 3 is full"));
        assert!(text.ends_with("XO....."));
    }

    #[test]
    fn test_learner_error_converts_to_training_error() {
        let err: TrainingError = LearnerError::NumericalInstability {
            loss: f32::NAN,
            consecutive: 3,
        }
        .into();
        assert!(matches!(
            err,
            TrainingError::Learner(LearnerError::NumericalInstability { consecutive: 3, .. })
        ));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("run.learning_rate must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: run.learning_rate must be > 0"
        );
    }
}

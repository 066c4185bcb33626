//! # c4_selfplay
//!
//! Self-play Q-learning for Connect Four: a DQN learner trained against a
//! weighted pool of scripted and frozen opponents, with periodic evaluation,
//! versioned checkpoints and hyperparameter search.
//!
//! ## Modules
//!
//! - [`game`]: Board, players and the game state machine
//! - [`ai`]: Agents, opponent pool, exploration, Q-network and learner
//! - [`training`]: Replay buffer, episodes, evaluation, tracking, orchestrator
//! - [`checkpoint`]: Versioned checkpoints with retention
//! - [`search`]: Hyperparameter search controller and pruner
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types
//! - [`logging`]: Logger setup for the binaries

#![recursion_limit = "256"]

pub mod ai;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod game;
pub mod logging;
pub mod search;
pub mod training;

//! Hyperparameter search over independent training runs.

pub mod controller;
pub mod pruner;
pub mod space;

pub use controller::{best, Objective, SearchConfig, SearchController, TrialResult, TrialStatus};
pub use pruner::MedianPruner;
pub use space::SearchSpace;

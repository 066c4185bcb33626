mod agent;
pub mod approximator;
pub mod exploration;
mod frozen;
pub mod learner;
pub mod networks;
mod opponent_pool;
mod random;
mod rule_based;
pub mod state_encoding;

pub use agent::{Agent, Transition};
pub use approximator::{
    ActionValueFunction, BurnQFunction, InferBackend, LossKind, QNetworkSnapshot, TrainBackend,
    TrainableActionValue, TrainingSample,
};
pub use exploration::{EpsilonSchedule, ScheduleKind};
pub use frozen::{FrozenSnapshotAgent, GreedyAgent};
pub use learner::Learner;
pub use networks::{QNetwork, QNetworkConfig};
pub use opponent_pool::{Opponent, OpponentKind, OpponentPool};
pub use random::RandomAgent;
pub use rule_based::RuleBasedAgent;

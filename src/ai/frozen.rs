use super::agent::{require_legal_moves, Agent};
use super::approximator::{ActionValueFunction, QNetworkSnapshot};
use super::exploration::greedy_action;
use super::networks::QNetworkConfig;
use crate::checkpoint::Checkpoint;
use crate::error::{AgentError, ModelError};
use crate::game::GameState;

/// Pure greedy play from a borrowed value function.
pub struct GreedyAgent<'a, F: ?Sized> {
    values: &'a F,
    name: String,
}

impl<'a, F: ActionValueFunction + ?Sized> GreedyAgent<'a, F> {
    pub fn new(values: &'a F, name: impl Into<String>) -> Self {
        GreedyAgent {
            values,
            name: name.into(),
        }
    }
}

impl<F: ActionValueFunction + ?Sized> Agent for GreedyAgent<'_, F> {
    fn propose_move(&mut self, state: &GameState) -> Result<usize, AgentError> {
        choose_greedy(self.values, state)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A past policy that no longer trains. Plays greedily.
#[derive(Debug, Clone)]
pub struct FrozenSnapshotAgent<P = QNetworkSnapshot> {
    policy: P,
    name: String,
}

impl<P: ActionValueFunction> FrozenSnapshotAgent<P> {
    pub fn new(policy: P, name: impl Into<String>) -> Self {
        FrozenSnapshotAgent {
            policy,
            name: name.into(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

impl FrozenSnapshotAgent<QNetworkSnapshot> {
    /// Load the weights stored in a checkpoint.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, ModelError> {
        let config = QNetworkConfig::new().with_hidden_size(checkpoint.run_config.hidden_size);
        let policy = QNetworkSnapshot::from_bytes(&config, &checkpoint.network_weights)?;
        Ok(Self::new(
            policy,
            format!("Snapshot@{}", checkpoint.episode_count),
        ))
    }
}

impl<P: ActionValueFunction> Agent for FrozenSnapshotAgent<P> {
    fn propose_move(&mut self, state: &GameState) -> Result<usize, AgentError> {
        choose_greedy(&self.policy, state)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn choose_greedy<F: ActionValueFunction + ?Sized>(
    values: &F,
    state: &GameState,
) -> Result<usize, AgentError> {
    let legal = require_legal_moves(state)?;
    let predicted = values.predict(state)?;
    Ok(greedy_action(&predicted, &legal).unwrap_or(legal[0]))
}

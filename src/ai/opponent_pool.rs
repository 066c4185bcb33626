use std::fmt;

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::agent::Agent;
use super::approximator::{ActionValueFunction, QNetworkSnapshot};
use super::frozen::FrozenSnapshotAgent;
use super::random::RandomAgent;
use super::rule_based::RuleBasedAgent;
use crate::config::OpponentWeights;
use crate::error::{AgentError, ConfigError};
use crate::game::GameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentKind {
    Random,
    RuleBased,
    Frozen,
}

impl fmt::Display for OpponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpponentKind::Random => write!(f, "random"),
            OpponentKind::RuleBased => write!(f, "rule_based"),
            OpponentKind::Frozen => write!(f, "frozen"),
        }
    }
}

/// The closed set of opponents the learner trains and evaluates against.
#[derive(Debug, Clone)]
pub enum Opponent<P = QNetworkSnapshot> {
    Random(RandomAgent),
    RuleBased(RuleBasedAgent),
    Frozen(FrozenSnapshotAgent<P>),
}

impl<P> Opponent<P> {
    pub fn kind(&self) -> OpponentKind {
        match self {
            Opponent::Random(_) => OpponentKind::Random,
            Opponent::RuleBased(_) => OpponentKind::RuleBased,
            Opponent::Frozen(_) => OpponentKind::Frozen,
        }
    }
}

impl<P: ActionValueFunction> Agent for Opponent<P> {
    fn propose_move(&mut self, state: &GameState) -> Result<usize, AgentError> {
        match self {
            Opponent::Random(a) => a.propose_move(state),
            Opponent::RuleBased(a) => a.propose_move(state),
            Opponent::Frozen(a) => a.propose_move(state),
        }
    }

    fn name(&self) -> &str {
        match self {
            Opponent::Random(a) => a.name(),
            Opponent::RuleBased(a) => a.name(),
            Opponent::Frozen(a) => a.name(),
        }
    }
}

/// Weighted pool of opponents.
///
/// Member 0 is the random agent, member 1 the rule-based agent, and the rest
/// are frozen snapshots (oldest first) sharing the `frozen` weight equally.
pub struct OpponentPool<P = QNetworkSnapshot> {
    members: Vec<Opponent<P>>,
    weights: OpponentWeights,
    max_snapshots: usize,
    dist: WeightedIndex<f64>,
    rng: StdRng,
}

impl<P: ActionValueFunction> OpponentPool<P> {
    pub fn new(weights: OpponentWeights, max_snapshots: usize, seed: u64) -> Result<Self, ConfigError> {
        let members = vec![
            Opponent::Random(RandomAgent::with_seed(seed.wrapping_add(1))),
            Opponent::RuleBased(RuleBasedAgent::with_seed(seed.wrapping_add(2))),
        ];
        let dist = build_distribution(&weights, 0)?;
        Ok(OpponentPool {
            members,
            weights,
            max_snapshots,
            dist,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Draw the opponent for the next episode.
    pub fn sample(&mut self) -> &mut Opponent<P> {
        let idx = self.sample_index();
        &mut self.members[idx]
    }

    /// Draw a member index. Stays valid until the next `add_snapshot`.
    pub fn sample_index(&mut self) -> usize {
        self.dist.sample(&mut self.rng)
    }

    /// Panics if `idx` is out of range.
    pub fn member_mut(&mut self, idx: usize) -> &mut Opponent<P> {
        &mut self.members[idx]
    }

    /// Add a frozen policy, evicting the oldest snapshot beyond `max_snapshots`.
    pub fn add_snapshot(&mut self, agent: FrozenSnapshotAgent<P>) -> Result<(), ConfigError> {
        if self.max_snapshots == 0 {
            return Ok(());
        }
        if self.snapshot_count() >= self.max_snapshots {
            self.members.remove(2);
        }
        self.members.push(Opponent::Frozen(agent));
        self.dist = build_distribution(&self.weights, self.snapshot_count())?;
        Ok(())
    }

    pub fn snapshot_count(&self) -> usize {
        self.members.len() - 2
    }

    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut Opponent<P>> {
        self.members.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn build_distribution(weights: &OpponentWeights, snapshots: usize) -> Result<WeightedIndex<f64>, ConfigError> {
    let mut w = vec![weights.random, weights.rule_based];
    if snapshots > 0 {
        w.extend(std::iter::repeat(weights.frozen / snapshots as f64).take(snapshots));
    }
    WeightedIndex::new(&w)
        .map_err(|e| ConfigError::Validation(format!("opponent weights {w:?}: {e}")))
}

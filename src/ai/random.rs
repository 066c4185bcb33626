use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

use super::agent::{require_legal_moves, Agent};
use crate::error::AgentError;
use crate::game::GameState;

/// An agent that selects uniformly at random from legal moves.
#[derive(Debug, Clone)]
pub struct RandomAgent {
    rng: StdRng,
}

impl RandomAgent {
    pub fn new() -> Self {
        RandomAgent {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        RandomAgent {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for RandomAgent {
    fn propose_move(&mut self, state: &GameState) -> Result<usize, AgentError> {
        let legal = require_legal_moves(state)?;
        Ok(*legal
            .choose(&mut self.rng)
            .unwrap_or(&legal[0]))
    }

    fn name(&self) -> &str {
        "Random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_agent_selects_legal_action() {
        let mut agent = RandomAgent::with_seed(1);
        let state = GameState::from_moves(&[3, 3, 3, 3, 3, 3]).unwrap();
        let legal = state.legal_moves();

        for _ in 0..100 {
            let action = agent.propose_move(&state).unwrap();
            assert!(legal.contains(&action), "Action {} is not legal", action);
        }
    }

    #[test]
    fn test_random_agent_plays_full_game() {
        let mut agent1 = RandomAgent::with_seed(2);
        let mut agent2 = RandomAgent::with_seed(3);
        let mut state = GameState::initial();

        let mut turn = 0;
        while !state.is_terminal() {
            let action = if turn % 2 == 0 {
                agent1.propose_move(&state).unwrap()
            } else {
                agent2.propose_move(&state).unwrap()
            };
            state = state.apply(action).unwrap();
            turn += 1;
        }

        assert!(agent1.propose_move(&state).is_err());
    }

    #[test]
    fn test_same_seed_same_moves() {
        let state = GameState::initial();
        let mut a = RandomAgent::with_seed(9);
        let mut b = RandomAgent::with_seed(9);
        for _ in 0..20 {
            assert_eq!(a.propose_move(&state).unwrap(), b.propose_move(&state).unwrap());
        }
    }
}

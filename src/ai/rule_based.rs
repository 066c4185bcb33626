use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

use super::agent::{require_legal_moves, Agent};
use crate::error::AgentError;
use crate::game::{GameState, COLS};

const CENTER: usize = COLS / 2;

/// Scripted opponent. Priority: complete our own four, block the opponent's
/// four, take the center column, otherwise a random legal column.
#[derive(Debug, Clone)]
pub struct RuleBasedAgent {
    rng: StdRng,
}

impl RuleBasedAgent {
    pub fn new() -> Self {
        RuleBasedAgent {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        RuleBasedAgent {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RuleBasedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for RuleBasedAgent {
    fn propose_move(&mut self, state: &GameState) -> Result<usize, AgentError> {
        let legal = require_legal_moves(state)?;
        let board = state.board();
        let me = state.current_player().to_cell();
        let them = state.current_player().other().to_cell();

        if let Some(&col) = legal.iter().find(|&&c| board.is_winning_drop(c, me)) {
            return Ok(col);
        }
        if let Some(&col) = legal.iter().find(|&&c| board.is_winning_drop(c, them)) {
            return Ok(col);
        }
        if legal.contains(&CENTER) {
            return Ok(CENTER);
        }
        Ok(*legal.choose(&mut self.rng).unwrap_or(&legal[0]))
    }

    fn name(&self) -> &str {
        "RuleBased"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_takes_immediate_win() {
        // Red has three in column 0 and Yellow threatens column 1 as well.
        let state = GameState::from_moves(&[0, 1, 0, 1, 0, 1]).unwrap();
        let mut agent = RuleBasedAgent::with_seed(0);
        assert_eq!(agent.propose_move(&state).unwrap(), 0);
    }

    #[test]
    fn test_blocks_opponent_win() {
        // Yellow to move, Red threatens a vertical four in column 0.
        let state = GameState::from_moves(&[0, 6, 0, 5, 0]).unwrap();
        let mut agent = RuleBasedAgent::with_seed(0);
        assert_eq!(agent.propose_move(&state).unwrap(), 0);
    }

    #[test]
    fn test_prefers_center() {
        let mut agent = RuleBasedAgent::with_seed(0);
        assert_eq!(agent.propose_move(&GameState::initial()).unwrap(), CENTER);
    }

    #[test]
    fn test_random_when_center_full() {
        let state = GameState::from_moves(&[3, 3, 3, 3, 3, 3]).unwrap();
        let mut agent = RuleBasedAgent::with_seed(4);
        for _ in 0..20 {
            let col = agent.propose_move(&state).unwrap();
            assert_ne!(col, CENTER);
            assert!(state.is_legal(col));
        }
    }
}

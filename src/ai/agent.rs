use crate::error::{AgentError, InvalidMoveError};
use crate::game::GameState;

/// One learner decision: the position it faced, the column it chose, and what
/// followed once the opponent replied.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Position with the learner to move.
    pub state: GameState,
    pub action: usize,
    /// +1 win, -1 loss, 0 draw or non-terminal.
    pub reward: f32,
    /// Next position with the learner to move, or the terminal position.
    pub next_state: GameState,
    pub done: bool,
}

/// Anything that can pick a column for the side to move.
pub trait Agent {
    /// Choose a legal column. Fails only when the game is already over or the
    /// underlying policy cannot be evaluated.
    fn propose_move(&mut self, state: &GameState) -> Result<usize, AgentError>;

    fn name(&self) -> &str;
}

/// Legal moves of a position, or an error when there are none.
pub(crate) fn require_legal_moves(state: &GameState) -> Result<Vec<usize>, AgentError> {
    let legal = state.legal_moves();
    if legal.is_empty() {
        return Err(InvalidMoveError::GameOver.into());
    }
    Ok(legal)
}

use serde::{Deserialize, Serialize};

use super::board::{Board, COLS};
use super::player::Player;
use crate::error::InvalidMoveError;

/// Terminal status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Terminal {
    Ongoing,
    Won(Player),
    Draw,
}

/// Immutable Connect Four position. Every transition goes through [`GameState::apply`],
/// which changes exactly one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameState {
    board: Board,
    current_player: Player,
    terminal: Terminal,
    plies: u8,
}

impl GameState {
    /// Empty board, Red to move.
    pub fn initial() -> Self {
        GameState {
            board: Board::new(),
            current_player: Player::Red,
            terminal: Terminal::Ongoing,
            plies: 0,
        }
    }

    /// Replay a column sequence from the initial position.
    pub fn from_moves(columns: &[usize]) -> Result<Self, InvalidMoveError> {
        columns
            .iter()
            .try_fold(GameState::initial(), |state, &col| state.apply(col))
    }

    pub fn current_player(&self) -> Player {
        self.current_player
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn plies(&self) -> usize {
        self.plies as usize
    }

    pub fn terminal(&self) -> Terminal {
        self.terminal
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal != Terminal::Ongoing
    }

    /// Columns with a free top cell. Empty once the game is over.
    pub fn legal_moves(&self) -> Vec<usize> {
        if self.is_terminal() {
            return Vec::new();
        }
        (0..COLS)
            .filter(|&col| !self.board.is_column_full(col))
            .collect()
    }

    pub fn is_legal(&self, column: usize) -> bool {
        !self.is_terminal() && !self.board.is_column_full(column)
    }

    /// Drop the current player's piece into `column` and return the successor.
    pub fn apply(&self, column: usize) -> Result<GameState, InvalidMoveError> {
        if self.is_terminal() {
            return Err(InvalidMoveError::GameOver);
        }

        let mut board = self.board;
        let row = board.drop_piece(column, self.current_player.to_cell())?;

        let terminal = if board.check_win(row, column) {
            Terminal::Won(self.current_player)
        } else if board.is_full() {
            Terminal::Draw
        } else {
            Terminal::Ongoing
        };

        Ok(GameState {
            board,
            current_player: self.current_player.other(),
            terminal,
            plies: self.plies + 1,
        })
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::initial()
    }
}

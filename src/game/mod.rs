//! Connect Four rules: board representation, players, and an immutable game
//! state with legal-move enumeration and terminal detection.

mod board;
mod player;
mod state;

pub use board::{Board, Cell, COLS, ROWS};
pub use player::Player;
pub use state::{GameState, Terminal};

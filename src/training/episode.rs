use log::error;
use rand::Rng;

use crate::ai::exploration::select_action;
use crate::ai::{ActionValueFunction, Agent, Transition};
use crate::error::{InvalidMoveError, TrainingError};
use crate::game::{GameState, Player, Terminal};
use crate::training::metrics::{EpisodeResult, Outcome};

/// A committed learner ply and the position the learner faces next.
#[derive(Debug, Clone)]
pub struct PlyOutcome {
    pub transition: Transition,
    pub next: GameState,
}

/// Transitions of one finished episode plus its summary.
#[derive(Debug, Clone)]
pub struct EpisodeTrace {
    pub transitions: Vec<Transition>,
    pub result: EpisodeResult,
}

/// The learner moves first on even episodes.
pub fn learner_side(episode: usize) -> Player {
    if episode % 2 == 0 {
        Player::Red
    } else {
        Player::Yellow
    }
}

/// Empty board, with the opponent's opening already played when the learner
/// is the second player.
pub fn start_episode(opponent: &mut dyn Agent, learner: Player) -> Result<GameState, TrainingError> {
    let state = GameState::initial();
    if state.current_player() == learner {
        return Ok(state);
    }
    let column = opponent.propose_move(&state)?;
    apply_checked(&state, column)
}

/// Epsilon-greedy column for the learner.
pub fn choose_action<F, R>(
    values: &F,
    state: &GameState,
    epsilon: f32,
    rng: &mut R,
) -> Result<usize, TrainingError>
where
    F: ActionValueFunction + ?Sized,
    R: Rng + ?Sized,
{
    let legal = state.legal_moves();
    let predicted = values.predict(state)?;
    select_action(&predicted, &legal, epsilon, rng).ok_or_else(|| TrainingError::InvalidMove {
        board: state.board().to_string(),
        source: InvalidMoveError::GameOver,
    })
}

/// Play the learner's `action`, then the opponent's reply if the game goes on.
///
/// The transition is committed after the reply, so `next_state` is either a
/// terminal position or one with the learner to move again.
pub fn learner_ply(
    state: &GameState,
    action: usize,
    opponent: &mut dyn Agent,
) -> Result<PlyOutcome, TrainingError> {
    let learner = state.current_player();
    let after_learner = apply_checked(state, action)?;

    let next = if after_learner.is_terminal() {
        after_learner
    } else {
        let reply = opponent.propose_move(&after_learner)?;
        apply_checked(&after_learner, reply)?
    };

    let reward = match next.terminal() {
        Terminal::Won(p) if p == learner => 1.0,
        Terminal::Won(_) => -1.0,
        Terminal::Draw | Terminal::Ongoing => 0.0,
    };

    Ok(PlyOutcome {
        transition: Transition {
            state: *state,
            action,
            reward,
            next_state: next,
            done: next.is_terminal(),
        },
        next,
    })
}

/// Learner-relative outcome of a finished game.
pub fn outcome_for(state: &GameState, learner: Player) -> Outcome {
    match state.terminal() {
        Terminal::Won(p) if p == learner => Outcome::Win,
        Terminal::Won(_) => Outcome::Loss,
        Terminal::Draw | Terminal::Ongoing => Outcome::Draw,
    }
}

/// Play a whole episode with a fixed exploration rate. Used by self-play
/// workers that act from a published policy snapshot.
pub fn play_episode<F, R>(
    values: &F,
    opponent: &mut dyn Agent,
    learner: Player,
    epsilon: f32,
    rng: &mut R,
) -> Result<EpisodeTrace, TrainingError>
where
    F: ActionValueFunction + ?Sized,
    R: Rng + ?Sized,
{
    let mut state = start_episode(opponent, learner)?;
    let mut transitions = Vec::new();
    while !state.is_terminal() {
        let action = choose_action(values, &state, epsilon, rng)?;
        let ply = learner_ply(&state, action, opponent)?;
        transitions.push(ply.transition);
        state = ply.next;
    }
    Ok(EpisodeTrace {
        transitions,
        result: EpisodeResult {
            outcome: outcome_for(&state, learner),
            game_length: state.plies(),
        },
    })
}

/// Apply a move the engine must accept. A refusal is a broken contract: it is
/// logged with the full board and surfaces as a fatal error.
pub fn apply_checked(state: &GameState, column: usize) -> Result<GameState, TrainingError> {
    state.apply(column).map_err(|source| {
        let board = state.board().to_string();
        error!(
            "engine rejected column {} for {}: {}\n{}",
            column,
            state.current_player().name(),
            source,
            board
        );
        TrainingError::InvalidMove { board, source }
    })
}

/// Derive a deterministic seed for a given episode index.
pub fn episode_seed(base_seed: u64, episode_index: usize) -> u64 {
    // FNV-1a style mixing
    let mut hash = base_seed ^ 0x517cc1b727220a95;
    let index = episode_index as u64;
    hash = hash.wrapping_mul(0x100000001b3);
    hash ^= index;
    hash = hash.wrapping_mul(0x100000001b3);
    hash ^= index >> 32;
    hash
}

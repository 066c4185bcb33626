use burn::prelude::*;
use burn::tensor::TensorData;

use crate::game::{GameState, COLS, ROWS};

/// Number of input planes.
pub const CHANNELS: usize = 3;

const PLANE: usize = ROWS * COLS;

/// Encode a game state as a tensor of shape [3, 6, 7] (player-relative).
///
/// Channel 0: Current player's pieces (1.0 where placed)
/// Channel 1: Opponent's pieces (1.0 where placed)
/// Channel 2: Landing cell of every legal column
pub fn encode_state<B: Backend>(state: &GameState, device: &B::Device) -> Tensor<B, 3> {
    let data = encode_state_flat(state);
    Tensor::<B, 1>::from_data(TensorData::from(data.as_slice()), device)
        .reshape([CHANNELS, ROWS, COLS])
}

/// Encode multiple game states as a batched tensor of shape [batch, 3, 6, 7].
pub fn encode_states_batch<B: Backend>(states: &[GameState], device: &B::Device) -> Tensor<B, 4> {
    let mut flat = Vec::with_capacity(states.len() * CHANNELS * PLANE);
    for state in states {
        flat.extend_from_slice(&encode_state_flat(state));
    }
    Tensor::<B, 1>::from_data(TensorData::from(flat.as_slice()), device)
        .reshape([states.len(), CHANNELS, ROWS, COLS])
}

/// The flat [126] f32 encoding of a single state.
pub fn encode_state_flat(state: &GameState) -> [f32; CHANNELS * PLANE] {
    let mut data = [0.0f32; CHANNELS * PLANE];
    let board = state.board();
    let own = state.current_player().to_cell();
    let other = state.current_player().other().to_cell();

    for row in 0..ROWS {
        for col in 0..COLS {
            let cell = board.get(row, col);
            let idx = row * COLS + col;
            if cell == own {
                data[idx] = 1.0;
            } else if cell == other {
                data[PLANE + idx] = 1.0;
            }
        }
    }

    for col in state.legal_moves() {
        if let Some(row) = board.landing_row(col) {
            data[2 * PLANE + row * COLS + col] = 1.0;
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_encode_initial_state_shape() {
        let device = Default::default();
        let tensor = encode_state::<TestBackend>(&GameState::initial(), &device);
        assert_eq!(tensor.shape().dims, [3, 6, 7]);
    }

    #[test]
    fn test_encode_initial_state_values() {
        let data = encode_state_flat(&GameState::initial());

        for (i, &v) in data.iter().enumerate().take(2 * PLANE) {
            assert_eq!(v, 0.0, "Channel 0/1 index {} should be 0", i);
        }
        for col in 0..COLS {
            assert_eq!(data[2 * PLANE + 5 * COLS + col], 1.0, "landing cell col {col}");
        }
    }

    #[test]
    fn test_encoding_is_player_relative() {
        // Red played column 3, Yellow to move.
        let state = GameState::initial().apply(3).unwrap();
        let data = encode_state_flat(&state);

        assert_eq!(data[5 * COLS + 3], 0.0);
        assert_eq!(data[PLANE + 5 * COLS + 3], 1.0);
        assert_eq!(data[2 * PLANE + 4 * COLS + 3], 1.0);
        assert_eq!(data[2 * PLANE + 5 * COLS + 3], 0.0);

        // After Yellow replies, Red's piece is back in channel 0.
        let data = encode_state_flat(&state.apply(0).unwrap());
        assert_eq!(data[5 * COLS + 3], 1.0);
        assert_eq!(data[PLANE + 5 * COLS], 1.0);
    }

    #[test]
    fn test_terminal_state_has_no_landing_cells() {
        let state = GameState::from_moves(&[0, 1, 0, 1, 0, 1, 0]).unwrap();
        let data = encode_state_flat(&state);
        assert!(data[2 * PLANE..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_encode_batch() {
        let s1 = GameState::initial();
        let s2 = s1.apply(3).unwrap();
        let device = Default::default();
        let batch = encode_states_batch::<TestBackend>(&[s1, s2], &device);
        assert_eq!(batch.shape().dims, [2, 3, 6, 7]);

        let flat: Vec<f32> = batch.into_data().to_vec().unwrap();
        assert_eq!(&flat[..CHANNELS * PLANE], &encode_state_flat(&s1)[..]);
    }
}

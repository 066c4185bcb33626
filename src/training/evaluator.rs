use log::debug;
use serde::{Deserialize, Serialize};

use crate::ai::{ActionValueFunction, Agent, OpponentKind, OpponentPool};
use crate::error::TrainingError;
use crate::game::{GameState, Player};
use crate::training::episode::{apply_checked, outcome_for};
use crate::training::metrics::Outcome;

/// Win/loss/draw tally of a match, from the evaluated agent's side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
}

impl MatchResult {
    pub fn games(&self) -> usize {
        self.wins + self.losses + self.draws
    }

    pub fn win_rate(&self) -> f32 {
        match self.games() {
            0 => 0.0,
            n => self.wins as f32 / n as f32,
        }
    }

    pub fn draw_rate(&self) -> f32 {
        match self.games() {
            0 => 0.0,
            n => self.draws as f32 / n as f32,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Draw => self.draws += 1,
        }
    }
}

/// Play one game to the end. Returns the result for `agent` and the ply count.
pub fn play_game(
    agent: &mut dyn Agent,
    opponent: &mut dyn Agent,
    agent_side: Player,
) -> Result<(Outcome, usize), TrainingError> {
    let mut state = GameState::initial();
    while !state.is_terminal() {
        let column = if state.current_player() == agent_side {
            agent.propose_move(&state)?
        } else {
            opponent.propose_move(&state)?
        };
        state = apply_checked(&state, column)?;
    }
    Ok((outcome_for(&state, agent_side), state.plies()))
}

/// Play `n_games`, with `agent` moving first in even-numbered games.
pub fn play_match(
    agent: &mut dyn Agent,
    opponent: &mut dyn Agent,
    n_games: usize,
) -> Result<MatchResult, TrainingError> {
    let mut result = MatchResult::default();
    for game in 0..n_games {
        let side = if game % 2 == 0 {
            Player::Red
        } else {
            Player::Yellow
        };
        let (outcome, _) = play_game(agent, opponent, side)?;
        result.record(outcome);
    }
    Ok(result)
}

/// One opponent's line in an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentResult {
    pub name: String,
    pub kind: OpponentKind,
    pub result: MatchResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub per_opponent: Vec<OpponentResult>,
    /// Mean win rate against the scripted opponents.
    pub score: f32,
    /// Win rate against the last promoted snapshot, once there is one.
    pub previous_best_win_rate: Option<f32>,
}

impl EvaluationReport {
    pub fn draw_rate(&self) -> f32 {
        let total: MatchResult = self.per_opponent.iter().fold(MatchResult::default(), |acc, r| {
            MatchResult {
                wins: acc.wins + r.result.wins,
                losses: acc.losses + r.result.losses,
                draws: acc.draws + r.result.draws,
            }
        });
        total.draw_rate()
    }
}

/// Plays greedy benchmark matches against every pool member.
#[derive(Debug, Clone)]
pub struct Evaluator {
    games_per_opponent: usize,
    min_promotion_score: f32,
}

impl Evaluator {
    pub fn new(games_per_opponent: usize, min_promotion_score: f32) -> Self {
        Evaluator {
            games_per_opponent,
            min_promotion_score,
        }
    }

    /// Play every pool member, then `previous_best` if given. Frozen pool
    /// members sharing the previous best's name are played once.
    pub fn evaluate<P: ActionValueFunction>(
        &self,
        agent: &mut dyn Agent,
        pool: &mut OpponentPool<P>,
        previous_best: Option<&mut dyn Agent>,
    ) -> Result<EvaluationReport, TrainingError> {
        let previous_name = previous_best.as_ref().map(|best| best.name().to_string());
        let mut per_opponent = Vec::with_capacity(pool.len() + 1);
        let mut scripted = Vec::new();

        for opponent in pool.members_mut() {
            let kind = opponent.kind();
            if kind == OpponentKind::Frozen && previous_name.as_deref() == Some(opponent.name()) {
                continue;
            }
            let result = play_match(agent, opponent, self.games_per_opponent)?;
            debug!(
                "eval vs {}: {}W/{}L/{}D",
                opponent.name(),
                result.wins,
                result.losses,
                result.draws
            );
            if kind != OpponentKind::Frozen {
                scripted.push(result.win_rate());
            }
            per_opponent.push(OpponentResult {
                name: opponent.name().to_string(),
                kind,
                result,
            });
        }

        let mut previous_best_win_rate = None;
        if let Some(best) = previous_best {
            let result = play_match(agent, best, self.games_per_opponent)?;
            debug!(
                "eval vs previous best {}: {}W/{}L/{}D",
                best.name(),
                result.wins,
                result.losses,
                result.draws
            );
            previous_best_win_rate = Some(result.win_rate());
            per_opponent.push(OpponentResult {
                name: best.name().to_string(),
                kind: OpponentKind::Frozen,
                result,
            });
        }

        let score = if scripted.is_empty() {
            0.0
        } else {
            scripted.iter().sum::<f32>() / scripted.len() as f32
        };
        Ok(EvaluationReport {
            per_opponent,
            score,
            previous_best_win_rate,
        })
    }

    /// A new best must beat the previous best and the promotion floor, and
    /// must win the majority of games against the previous best snapshot.
    pub fn promotes(&self, report: &EvaluationReport, best_score: f32) -> bool {
        let beats_previous = report.previous_best_win_rate.map_or(true, |r| r > 0.5);
        report.score > best_score.max(self.min_promotion_score) && beats_previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{FrozenSnapshotAgent, RandomAgent, RuleBasedAgent};
    use crate::config::OpponentWeights;
    use crate::error::ModelError;
    use crate::game::COLS;

    #[derive(Debug, Clone)]
    struct Flat;

    impl ActionValueFunction for Flat {
        fn predict_batch(&self, states: &[GameState]) -> Result<Vec<[f32; COLS]>, ModelError> {
            Ok(vec![[0.0; COLS]; states.len()])
        }

        fn save_weights(&self) -> Result<Vec<u8>, ModelError> {
            Ok(Vec::new())
        }
    }

    fn report(score: f32, latest: Option<f32>) -> EvaluationReport {
        EvaluationReport {
            per_opponent: Vec::new(),
            score,
            previous_best_win_rate: latest,
        }
    }

    #[test]
    fn test_random_vs_random_is_balanced() {
        let mut a = RandomAgent::with_seed(1);
        let mut b = RandomAgent::with_seed(2);
        let result = play_match(&mut a, &mut b, 2000).unwrap();
        assert_eq!(result.games(), 2000);
        let decisive = (result.wins + result.losses) as f32;
        let share = result.wins as f32 / decisive;
        assert!((0.45..=0.55).contains(&share), "win share {share}");
    }

    #[test]
    fn test_rule_based_beats_random() {
        let mut rules = RuleBasedAgent::with_seed(3);
        let mut random = RandomAgent::with_seed(4);
        let result = play_match(&mut rules, &mut random, 200).unwrap();
        assert!(result.win_rate() > 0.7, "win rate {}", result.win_rate());
    }

    #[test]
    fn test_evaluate_covers_every_member() {
        let mut pool: OpponentPool<Flat> = OpponentPool::new(OpponentWeights::default(), 2, 0).unwrap();
        pool.add_snapshot(FrozenSnapshotAgent::new(Flat, "snap")).unwrap();
        let evaluator = Evaluator::new(10, 0.5);

        let mut agent = RuleBasedAgent::with_seed(9);
        let report = evaluator.evaluate(&mut agent, &mut pool, None).unwrap();
        assert_eq!(report.per_opponent.len(), 3);
        assert!(report.per_opponent.iter().all(|r| r.result.games() == 10));
        assert!(report.previous_best_win_rate.is_none());

        let scripted: Vec<f32> = report.per_opponent[..2]
            .iter()
            .map(|r| r.result.win_rate())
            .collect();
        assert!((report.score - (scripted[0] + scripted[1]) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_previous_best_is_played_without_a_pool_snapshot() {
        // Default weights never sample frozen members during training.
        let mut pool: OpponentPool<Flat> = OpponentPool::new(OpponentWeights::default(), 0, 0).unwrap();
        let evaluator = Evaluator::new(10, 0.5);
        let mut best = FrozenSnapshotAgent::new(Flat, "Snapshot@100");

        let mut agent = RuleBasedAgent::with_seed(9);
        let report = evaluator.evaluate(&mut agent, &mut pool, Some(&mut best)).unwrap();
        assert_eq!(report.per_opponent.len(), 3);
        let last = report.per_opponent.last().unwrap();
        assert_eq!(last.name, "Snapshot@100");
        assert_eq!(last.kind, OpponentKind::Frozen);
        assert_eq!(last.result.games(), 10);
        assert_eq!(report.previous_best_win_rate, Some(last.result.win_rate()));
    }

    #[test]
    fn test_previous_best_in_pool_is_played_once() {
        let mut pool: OpponentPool<Flat> = OpponentPool::new(OpponentWeights::default(), 2, 0).unwrap();
        pool.add_snapshot(FrozenSnapshotAgent::new(Flat, "Snapshot@100")).unwrap();
        let evaluator = Evaluator::new(4, 0.5);
        let mut best = FrozenSnapshotAgent::new(Flat, "Snapshot@100");

        let mut agent = RuleBasedAgent::with_seed(9);
        let report = evaluator.evaluate(&mut agent, &mut pool, Some(&mut best)).unwrap();
        let names: Vec<&str> = report.per_opponent.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "Snapshot@100").count(), 1);
        assert!(report.previous_best_win_rate.is_some());
    }

    #[test]
    fn test_promotion_rule() {
        let evaluator = Evaluator::new(10, 0.5);
        assert!(evaluator.promotes(&report(0.6, None), 0.0));
        assert!(!evaluator.promotes(&report(0.45, None), 0.0));
        assert!(!evaluator.promotes(&report(0.6, None), 0.7));
        assert!(!evaluator.promotes(&report(0.8, Some(0.4)), 0.6));
        assert!(evaluator.promotes(&report(0.8, Some(0.6)), 0.6));
    }
}

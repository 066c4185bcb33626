use crate::ai::agent::Transition;
use crate::ai::approximator::{ActionValueFunction, LossKind, TrainableActionValue, TrainingSample};
use crate::config::RunConfig;
use crate::error::{LearnerError, ModelError};
use crate::game::GameState;

/// Online/target value-function pair and the temporal-difference update.
///
/// The target is a frozen snapshot replaced wholesale on [`Learner::sync`];
/// gradient steps only ever touch the online function.
pub struct Learner<Q: TrainableActionValue> {
    online: Q,
    target: Q::Snapshot,
    gamma: f32,
    learning_rate: f64,
    loss: LossKind,
    steps: usize,
    syncs: usize,
    consecutive_instabilities: usize,
}

impl<Q: TrainableActionValue> Learner<Q> {
    pub fn new(online: Q, gamma: f32, learning_rate: f64, loss: LossKind) -> Self {
        let target = online.snapshot();
        Learner {
            online,
            target,
            gamma,
            learning_rate,
            loss,
            steps: 0,
            syncs: 0,
            consecutive_instabilities: 0,
        }
    }

    pub fn from_run_config(online: Q, config: &RunConfig) -> Self {
        Self::new(online, config.gamma, config.learning_rate, config.loss)
    }

    /// Bellman targets: `r` for terminal transitions, otherwise
    /// `r + gamma * max` of the target values over the next state's legal moves.
    pub fn targets(&self, batch: &[Transition]) -> Result<Vec<f32>, ModelError> {
        let bootstrap: Vec<GameState> = batch
            .iter()
            .filter(|t| !t.done)
            .map(|t| t.next_state)
            .collect();
        let mut next_values = self.target.predict_batch(&bootstrap)?.into_iter();

        let mut targets = Vec::with_capacity(batch.len());
        for transition in batch {
            if transition.done {
                targets.push(transition.reward);
                continue;
            }
            let values = next_values
                .next()
                .ok_or_else(|| ModelError::Shape("missing target prediction".to_string()))?;
            let max_q = transition
                .next_state
                .legal_moves()
                .iter()
                .map(|&col| values[col])
                .fold(f32::NEG_INFINITY, f32::max);
            let max_q = if max_q.is_finite() { max_q } else { 0.0 };
            targets.push(transition.reward + self.gamma * max_q);
        }
        Ok(targets)
    }

    /// Exactly one gradient update on the online function.
    ///
    /// A non-finite loss leaves the weights untouched and fails with
    /// [`LearnerError::NumericalInstability`] carrying the running count of
    /// consecutive failures. Any finite step resets the count.
    ///
    /// Gradients are not inspected separately: a finite loss over finite
    /// weights and targets is taken to imply finite gradients, which the
    /// optimizer then clips to `max_grad_norm`. Weights corrupted by an
    /// overflowing update surface as a non-finite loss on the next step.
    pub fn train_step(&mut self, batch: &[Transition]) -> Result<f32, LearnerError> {
        let targets = self.targets(batch)?;
        let samples: Vec<TrainingSample> = batch
            .iter()
            .zip(targets)
            .map(|(t, target)| TrainingSample {
                state: t.state,
                action: t.action,
                target,
            })
            .collect();

        let loss = self
            .online
            .train_step(&samples, self.learning_rate, self.loss)?;
        if !loss.is_finite() {
            self.consecutive_instabilities += 1;
            return Err(LearnerError::NumericalInstability {
                loss,
                consecutive: self.consecutive_instabilities,
            });
        }

        self.consecutive_instabilities = 0;
        self.steps += 1;
        Ok(loss)
    }

    /// Hard copy of the online weights into the target.
    pub fn sync(&mut self) {
        self.target = self.online.snapshot();
        self.syncs += 1;
    }

    pub fn online(&self) -> &Q {
        &self.online
    }

    pub fn target(&self) -> &Q::Snapshot {
        &self.target
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn syncs(&self) -> usize {
        self.syncs
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn consecutive_instabilities(&self) -> usize {
        self.consecutive_instabilities
    }

    /// Weights and optimizer state as byte streams.
    pub fn export(&self) -> Result<(Vec<u8>, Vec<u8>), ModelError> {
        Ok((self.online.save_weights()?, self.online.optimizer_state()?))
    }

    /// Restore weights, optimizer state and step counter, then sync the target.
    pub fn restore(
        &mut self,
        weights: &[u8],
        optimizer_state: &[u8],
        steps: usize,
    ) -> Result<(), ModelError> {
        self.online.load_weights(weights)?;
        self.online.load_optimizer_state(optimizer_state)?;
        self.steps = steps;
        self.consecutive_instabilities = 0;
        self.sync();
        Ok(())
    }
}

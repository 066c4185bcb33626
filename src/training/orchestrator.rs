use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::ai::{
    ActionValueFunction, Agent, BurnQFunction, EpsilonSchedule, FrozenSnapshotAgent, GreedyAgent,
    Learner, OpponentPool, TrainableActionValue, Transition,
};
use crate::checkpoint::{
    Checkpoint, CheckpointManager, CheckpointMetrics, TrainingProgress,
};
use crate::config::{AppConfig, OpponentWeights, RunConfig};
use crate::error::{CheckpointError, ConfigError, LearnerError, ModelError, TrainingError};
use crate::training::concurrent::{CancellationToken, SharedReplayBuffer, SnapshotCell};
use crate::training::episode::{
    choose_action, episode_seed, learner_ply, learner_side, outcome_for, play_episode,
    start_episode,
};
use crate::training::evaluator::{EvaluationReport, Evaluator};
use crate::training::metrics::{EpisodeResult, TimingMetrics, TrainingMetrics};
use crate::training::replay_buffer::ReplayBuffer;
use crate::training::tracker::{ArtifactRecord, EpisodeRecord, ExperimentTracker};

/// Loop settings that are not hyperparameters of the learner itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Episodes between evaluations.
    pub eval_interval: usize,
    /// Games per pool member in each evaluation.
    pub eval_games: usize,
    pub log_interval: usize,
    /// Evaluation score a checkpoint must exceed to be promoted.
    pub min_promotion_score: f32,
    /// Consecutive non-finite losses that abort the run.
    pub max_consecutive_instabilities: usize,
    /// Learning-rate multiplier applied after each skipped batch.
    pub instability_lr_factor: f64,
    pub checkpoint_retries: usize,
    /// Initial retry delay, doubled after every failed attempt.
    pub checkpoint_backoff_ms: u64,
    /// Frozen snapshots kept in the opponent pool.
    pub max_snapshots: usize,
    /// Self-play workers used by `run_concurrent`.
    pub workers: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            eval_interval: 1000,
            eval_games: 100,
            log_interval: 100,
            min_promotion_score: 0.5,
            max_consecutive_instabilities: 5,
            instability_lr_factor: 0.5,
            checkpoint_retries: 3,
            checkpoint_backoff_ms: 200,
            max_snapshots: 3,
            workers: 1,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));
        if self.eval_interval == 0 {
            return invalid("training.eval_interval must be > 0");
        }
        if self.eval_games == 0 {
            return invalid("training.eval_games must be > 0");
        }
        if self.log_interval == 0 {
            return invalid("training.log_interval must be > 0");
        }
        if !(0.0..=1.0).contains(&self.min_promotion_score) {
            return invalid("training.min_promotion_score must be in [0, 1]");
        }
        if self.max_consecutive_instabilities == 0 {
            return invalid("training.max_consecutive_instabilities must be >= 1");
        }
        if !(self.instability_lr_factor > 0.0 && self.instability_lr_factor <= 1.0) {
            return invalid("training.instability_lr_factor must be in (0, 1]");
        }
        if self.workers == 0 {
            return invalid("training.workers must be >= 1");
        }
        Ok(())
    }
}

/// Where the run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    EpisodeRunning,
    LearningStep,
    Evaluating,
    Checkpointing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The episode budget was used up.
    Completed,
    /// The cancellation token fired.
    Cancelled,
    /// An evaluation observer asked to stop.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub episodes: usize,
    pub learner_steps: usize,
    pub env_steps: usize,
    pub best_eval_score: f32,
    pub final_eval_score: Option<f32>,
    /// (episode, score) for every evaluation of this run.
    pub eval_history: Vec<(usize, f32)>,
}

/// Called after every evaluation. `Break` ends the run early.
pub trait EvalObserver {
    fn on_evaluation(&mut self, episode: usize, score: f32) -> ControlFlow<()>;
}

impl<F: FnMut(usize, f32) -> ControlFlow<()>> EvalObserver for F {
    fn on_evaluation(&mut self, episode: usize, score: f32) -> ControlFlow<()> {
        self(episode, score)
    }
}

/// Drives self-play, learning, evaluation and checkpointing for one run.
pub struct Orchestrator<Q: TrainableActionValue> {
    run_config: RunConfig,
    config: TrainingConfig,
    learner: Learner<Q>,
    buffer: ReplayBuffer,
    pool: OpponentPool<Q::Snapshot>,
    schedule: EpsilonSchedule,
    evaluator: Evaluator,
    checkpoints: Option<CheckpointManager>,
    tracker: Arc<dyn ExperimentTracker>,
    run_id: String,
    cancel: CancellationToken,
    rng: StdRng,
    metrics: TrainingMetrics,
    timing: TimingMetrics,
    phase: Phase,
    episode: usize,
    env_steps: usize,
    best_eval_score: f32,
    /// Last promoted policy, the bar a new best must also clear.
    best_snapshot: Option<FrozenSnapshotAgent<Q::Snapshot>>,
    eval_history: Vec<(usize, f32)>,
}

impl Orchestrator<BurnQFunction> {
    /// Burn-backed run with checkpointing set up from the application config.
    pub fn from_app_config(
        app: &AppConfig,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Result<Self, TrainingError> {
        app.validate()?;
        let online = BurnQFunction::from_run_config(&app.run);
        let checkpoints = CheckpointManager::new(app.checkpoint.clone())?;
        Ok(Self::new(app.run.clone(), app.training.clone(), online, tracker)?
            .with_checkpoints(checkpoints))
    }
}

impl<Q: TrainableActionValue> Orchestrator<Q> {
    pub fn new(
        run_config: RunConfig,
        config: TrainingConfig,
        online: Q,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Result<Self, TrainingError> {
        run_config.validate()?;
        config.validate()?;

        let seed = run_config.seed;
        let pool = OpponentPool::new(
            run_config.opponents.clone(),
            config.max_snapshots,
            seed.wrapping_add(10),
        )?;
        Ok(Orchestrator {
            learner: Learner::from_run_config(online, &run_config),
            buffer: ReplayBuffer::with_seed(run_config.buffer_capacity, seed.wrapping_add(3)),
            pool,
            schedule: EpsilonSchedule::from_config(&run_config),
            evaluator: Evaluator::new(config.eval_games, config.min_promotion_score),
            checkpoints: None,
            tracker,
            run_id: format!("run-{seed}"),
            cancel: CancellationToken::new(),
            rng: StdRng::seed_from_u64(seed),
            metrics: TrainingMetrics::with_capacity(config.log_interval),
            timing: TimingMetrics::with_capacity(config.log_interval),
            phase: Phase::Init,
            episode: 0,
            env_steps: 0,
            best_eval_score: 0.0,
            best_snapshot: None,
            eval_history: Vec::new(),
            run_config,
            config,
        })
    }

    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn episode(&self) -> usize {
        self.episode
    }

    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    pub fn learner(&self) -> &Learner<Q> {
        &self.learner
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    pub fn best_eval_score(&self) -> f32 {
        self.best_eval_score
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current exploration rate.
    pub fn epsilon(&self) -> f32 {
        self.schedule.epsilon(self.env_steps)
    }

    fn set_phase(&mut self, next: Phase) {
        if self.phase == next {
            return;
        }
        match next {
            Phase::EpisodeRunning | Phase::LearningStep => {
                trace!("phase {:?} -> {:?}", self.phase, next)
            }
            _ => debug!("phase {:?} -> {:?}", self.phase, next),
        }
        self.phase = next;
    }

    /// Snapshot of the trainable state at the current episode.
    pub fn checkpoint(&self) -> Result<Checkpoint, ModelError> {
        let (weights, optimizer) = self.learner.export()?;
        Ok(Checkpoint::new(
            weights,
            optimizer,
            self.episode,
            self.best_eval_score,
            self.run_config.clone(),
            TrainingProgress {
                learner_steps: self.learner.steps(),
                env_steps: self.env_steps,
                learning_rate: self.learner.learning_rate(),
            },
        ))
    }

    /// Continue from a checkpoint. The replay buffer starts empty and refills
    /// through the usual warmup.
    pub fn resume(&mut self, checkpoint: &Checkpoint) -> Result<(), TrainingError> {
        if checkpoint.run_config != self.run_config {
            warn!("Resuming with a run config that differs from the checkpoint's");
        }
        self.learner.restore(
            &checkpoint.network_weights,
            &checkpoint.optimizer_state,
            checkpoint.progress.learner_steps,
        )?;
        self.learner
            .set_learning_rate(checkpoint.progress.learning_rate);
        self.episode = checkpoint.episode_count;
        self.env_steps = checkpoint.progress.env_steps;
        self.best_eval_score = checkpoint.best_eval_score;

        let snapshot = self
            .learner
            .online()
            .snapshot_from_bytes(&checkpoint.network_weights)?;
        self.keep_best_snapshot(snapshot, format!("Snapshot@{}", checkpoint.episode_count))?;

        info!(
            "Resumed at episode {} (best score {:.3}, {} learner steps, lr {:.2e})",
            self.episode,
            self.best_eval_score,
            self.learner.steps(),
            self.learner.learning_rate()
        );
        Ok(())
    }

    fn start(&mut self) {
        self.set_phase(Phase::Init);
        info!(
            "Starting run {} for episodes {}..{} ({} opponents in pool)",
            self.run_id,
            self.episode + 1,
            self.run_config.episode_budget,
            self.pool.len()
        );
        if let Err(e) = self.tracker.log_params(&self.run_id, &self.run_config) {
            warn!("Tracker failed to record params: {e}");
        }
    }

    fn abort(&mut self, err: TrainingError) -> TrainingError {
        self.set_phase(Phase::Aborted);
        error!("Run {} aborted at episode {}: {}", self.run_id, self.episode, err);
        err
    }

    fn finish(&mut self, status: RunStatus) -> RunSummary {
        self.set_phase(Phase::Done);
        info!(
            "Run {} finished ({:?}) after {} episodes, {} learner steps, best score {:.3}",
            self.run_id,
            status,
            self.episode,
            self.learner.steps(),
            self.best_eval_score
        );
        RunSummary {
            status,
            episodes: self.episode,
            learner_steps: self.learner.steps(),
            env_steps: self.env_steps,
            best_eval_score: self.best_eval_score,
            final_eval_score: self.eval_history.last().map(|&(_, s)| s),
            eval_history: self.eval_history.clone(),
        }
    }

    pub fn run(&mut self) -> Result<RunSummary, TrainingError> {
        self.run_observed(&mut |_: usize, _: f32| ControlFlow::Continue(()))
    }

    /// Single-threaded run: one episode, one learner step at a time.
    pub fn run_observed(
        &mut self,
        observer: &mut dyn EvalObserver,
    ) -> Result<RunSummary, TrainingError> {
        self.start();
        let mut status = RunStatus::Completed;

        while self.episode < self.run_config.episode_budget {
            if self.cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            let result = match self.run_episode() {
                Ok(Some(result)) => result,
                Ok(None) => {
                    status = RunStatus::Cancelled;
                    break;
                }
                Err(e) => return Err(self.abort(e)),
            };
            match self.complete_episode(result, observer) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    status = RunStatus::Stopped;
                    break;
                }
                Err(e) => return Err(self.abort(e)),
            }
        }

        Ok(self.finish(status))
    }

    /// Play one episode against a sampled opponent, learning between plies.
    /// `None` when cancelled mid-episode.
    fn run_episode(&mut self) -> Result<Option<EpisodeResult>, TrainingError> {
        self.set_phase(Phase::EpisodeRunning);
        let side = learner_side(self.episode);
        let opponent = self.pool.sample_index();
        let warmup = self.run_config.warmup_size();
        let mut rng = StdRng::seed_from_u64(episode_seed(self.run_config.seed, self.episode));

        let mut state = start_episode(self.pool.member_mut(opponent), side)?;
        while !state.is_terminal() {
            let epsilon = self.schedule.epsilon(self.env_steps);
            let action = choose_action(self.learner.online(), &state, epsilon, &mut rng)?;
            let ply = learner_ply(&state, action, self.pool.member_mut(opponent))?;
            self.buffer.insert(ply.transition);
            self.env_steps += 1;
            state = ply.next;

            if self.buffer.len() >= warmup && self.env_steps % self.run_config.train_every == 0 {
                if self.cancel.is_cancelled() {
                    return Ok(None);
                }
                match self.buffer.sample(self.run_config.batch_size) {
                    Ok(batch) => {
                        self.learn_on(&batch)?;
                    }
                    Err(e) => debug!("Skipping learning step: {e}"),
                }
                self.set_phase(Phase::EpisodeRunning);
            }
        }

        Ok(Some(EpisodeResult {
            outcome: outcome_for(&state, side),
            game_length: state.plies(),
        }))
    }

    /// One learner update on `batch`. Returns true when the target was synced.
    fn learn_on(&mut self, batch: &[Transition]) -> Result<bool, TrainingError> {
        self.set_phase(Phase::LearningStep);
        let started = Instant::now();
        match self.learner.train_step(batch) {
            Ok(loss) => {
                self.metrics.record_update(loss);
                self.timing.record_update_time(started.elapsed());
                if self.learner.steps() % self.run_config.target_sync_interval == 0 {
                    self.learner.sync();
                    debug!("Target synced at learner step {}", self.learner.steps());
                    return Ok(true);
                }
                Ok(false)
            }
            Err(LearnerError::NumericalInstability { loss, consecutive })
                if consecutive < self.config.max_consecutive_instabilities =>
            {
                let lr = (self.learner.learning_rate() * self.config.instability_lr_factor)
                    .max(self.run_config.min_learning_rate);
                self.learner.set_learning_rate(lr);
                warn!(
                    "Non-finite loss {} ({}/{}), batch skipped, learning rate now {:.2e}",
                    loss, consecutive, self.config.max_consecutive_instabilities, lr
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Per-episode bookkeeping shared by both run modes.
    fn complete_episode(
        &mut self,
        result: EpisodeResult,
        observer: &mut dyn EvalObserver,
    ) -> Result<ControlFlow<()>, TrainingError> {
        self.episode += 1;
        self.metrics.record_episode(result);
        self.timing.record_episode();

        if self.episode % self.run_config.lr_decay_interval == 0 {
            let lr = (self.learner.learning_rate() * self.run_config.learning_rate_decay)
                .max(self.run_config.min_learning_rate);
            self.learner.set_learning_rate(lr);
        }

        let eval_score = if self.episode % self.config.eval_interval == 0 {
            Some(self.evaluate_and_promote()?.score)
        } else {
            None
        };

        let record = EpisodeRecord {
            episode: self.episode,
            loss: self.metrics.last_loss(),
            epsilon: self.epsilon(),
            learning_rate: self.learner.learning_rate(),
            eval_winrate: eval_score,
        };
        if let Err(e) = self.tracker.log_episode(&self.run_id, &record) {
            warn!("Tracker failed to record episode {}: {e}", self.episode);
        }

        if self.episode % self.config.log_interval == 0 {
            let window = self.config.log_interval;
            info!(
                "Episode {}/{} | eps: {:.3} | loss: {} | win({}): {:.1}% | draw: {:.1}% | len: {:.1} | {:.1} ep/s | update {:.2} ms",
                self.episode,
                self.run_config.episode_budget,
                self.epsilon(),
                self.metrics
                    .average_loss(window)
                    .map_or_else(|| "-".to_string(), |l| format!("{l:.4}")),
                window,
                self.metrics.win_rate(window) * 100.0,
                self.metrics.draw_rate(window) * 100.0,
                self.metrics.average_game_length(window),
                self.timing.episodes_per_sec(),
                self.timing.avg_update_ms(window),
            );
            self.timing.reset_window();
        }

        Ok(match eval_score {
            Some(score) => observer.on_evaluation(self.episode, score),
            None => ControlFlow::Continue(()),
        })
    }

    fn evaluate_and_promote(&mut self) -> Result<EvaluationReport, TrainingError> {
        self.set_phase(Phase::Evaluating);
        let started = Instant::now();

        let report = {
            let mut agent = GreedyAgent::new(self.learner.online(), "Learner");
            let previous_best = self.best_snapshot.as_mut().map(|best| best as &mut dyn Agent);
            self.evaluator.evaluate(&mut agent, &mut self.pool, previous_best)?
        };
        let summary: Vec<String> = report
            .per_opponent
            .iter()
            .map(|r| format!("{} {:.0}%", r.name, r.result.win_rate() * 100.0))
            .collect();
        info!(
            "  >> Eval at episode {}: score {:.3} (best {:.3}) | {}",
            self.episode,
            report.score,
            self.best_eval_score,
            summary.join(", ")
        );
        self.eval_history.push((self.episode, report.score));

        if self.evaluator.promotes(&report, self.best_eval_score) {
            self.best_eval_score = report.score;
            self.promote(&report)?;
        }

        self.timing.record_overhead(started.elapsed());
        Ok(report)
    }

    /// Record a new best: keep it as the evaluation bar, add it to the
    /// opponent pool when snapshots are sampled, and persist a checkpoint.
    /// A checkpoint that cannot be written after all retries is logged and
    /// training continues from the in-memory state.
    fn promote(&mut self, report: &EvaluationReport) -> Result<(), TrainingError> {
        self.set_phase(Phase::Checkpointing);
        info!("  >> New best score {:.3} at episode {}", report.score, self.episode);

        let snapshot = self.learner.online().snapshot();
        self.keep_best_snapshot(snapshot, format!("Snapshot@{}", self.episode))?;

        let Some(manager) = &self.checkpoints else {
            return Ok(());
        };
        let checkpoint = self.checkpoint()?;
        let window = self.config.log_interval;
        let metrics = CheckpointMetrics {
            eval_score: report.score,
            draw_rate: report.draw_rate(),
            average_game_length: self.metrics.average_game_length(window),
            average_loss: self.metrics.average_loss(window),
        };
        match save_with_retry(
            manager,
            &checkpoint,
            &metrics,
            self.config.checkpoint_retries,
            self.config.checkpoint_backoff_ms,
        ) {
            Ok(path) => {
                let record = ArtifactRecord {
                    episode: self.episode,
                    path,
                    score: report.score,
                };
                if let Err(e) = self.tracker.log_artifact(&self.run_id, &record) {
                    warn!("Tracker failed to record checkpoint: {e}");
                }
            }
            Err(e) => warn!(
                "Checkpoint at episode {} failed after {} attempts: {}",
                self.episode,
                self.config.checkpoint_retries + 1,
                e
            ),
        }
        Ok(())
    }

    fn keep_best_snapshot(&mut self, snapshot: Q::Snapshot, name: String) -> Result<(), TrainingError> {
        if self.run_config.opponents.frozen > 0.0 {
            self.pool
                .add_snapshot(FrozenSnapshotAgent::new(snapshot.clone(), name.clone()))?;
        }
        self.best_snapshot = Some(FrozenSnapshotAgent::new(snapshot, name));
        Ok(())
    }

    /// Throughput mode: self-play workers fill a shared buffer while this
    /// thread trains, evaluates and checkpoints.
    ///
    /// Workers act greedily-with-exploration from the latest published online
    /// snapshot and face the scripted members of the pool only.
    pub fn run_concurrent(&mut self) -> Result<RunSummary, TrainingError> {
        self.run_concurrent_observed(&mut |_: usize, _: f32| ControlFlow::Continue(()))
    }

    pub fn run_concurrent_observed(
        &mut self,
        observer: &mut dyn EvalObserver,
    ) -> Result<RunSummary, TrainingError> {
        self.start();

        let placeholder = ReplayBuffer::with_seed(1, 0);
        let shared = SharedReplayBuffer::new(std::mem::replace(&mut self.buffer, placeholder));
        let policy = SnapshotCell::new(self.learner.online().snapshot());
        let next_episode = AtomicUsize::new(self.episode);
        let env_steps = AtomicUsize::new(self.env_steps);
        let stop = CancellationToken::new();
        let (tx, rx) = mpsc::channel();

        let workers: Vec<WorkerContext> = (0..self.config.workers)
            .map(|w| WorkerContext {
                id: w,
                run_seed: self.run_config.seed,
                pool_seed: episode_seed(self.run_config.seed, usize::MAX - w),
                weights: self.run_config.opponents.clone(),
                schedule: self.schedule,
                budget: self.run_config.episode_budget,
                stop: stop.clone(),
                cancel: self.cancel.clone(),
            })
            .collect();

        let outcome = std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers.len());
            for ctx in workers {
                let tx = tx.clone();
                let (shared, policy, next_episode, env_steps) =
                    (&shared, &policy, &next_episode, &env_steps);
                let id = ctx.id;
                let handle = s.spawn(move || {
                    let stop = ctx.stop.clone();
                    if let Err(e) = self_play_worker(ctx, shared, policy, next_episode, env_steps, &tx) {
                        error!("Self-play worker {id} failed: {e}");
                        stop.cancel();
                        let _ = tx.send(Err(e));
                    }
                });
                handles.push((id, handle));
            }
            drop(tx);
            let result = self.drive_learner(rx, &shared, &policy, &env_steps, observer);
            stop.cancel();

            let mut panicked = None;
            for (id, handle) in handles {
                if handle.join().is_err() {
                    panicked.get_or_insert(id);
                }
            }
            match (result, panicked) {
                (Ok(_), Some(id)) => Err(TrainingError::Worker(format!("self-play worker {id} panicked"))),
                (result, _) => result,
            }
        });

        self.buffer = shared.into_inner();
        match outcome {
            Ok(status) => Ok(self.finish(status)),
            Err(e) => Err(self.abort(e)),
        }
    }

    fn drive_learner(
        &mut self,
        rx: mpsc::Receiver<Result<EpisodeResult, TrainingError>>,
        shared: &SharedReplayBuffer,
        policy: &SnapshotCell<Q::Snapshot>,
        env_steps: &AtomicUsize,
        observer: &mut dyn EvalObserver,
    ) -> Result<RunStatus, TrainingError> {
        const MAX_UPDATES_PER_TICK: usize = 8;
        let warmup = self.run_config.warmup_size();
        let train_every = self.run_config.train_every;
        let mut scheduled = self.env_steps / train_every;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }

            let due = self.env_steps / train_every;
            let timeout = if due > scheduled && shared.len() >= warmup {
                Duration::ZERO
            } else {
                Duration::from_millis(20)
            };
            match rx.recv_timeout(timeout) {
                Ok(Ok(result)) => {
                    self.set_phase(Phase::EpisodeRunning);
                    if self.complete_episode(result, observer)?.is_break() {
                        return Ok(RunStatus::Stopped);
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(RunStatus::Completed),
            }

            self.env_steps = env_steps.load(Ordering::SeqCst);
            let due = self.env_steps / train_every;
            if shared.len() < warmup {
                scheduled = due;
                continue;
            }
            let mut updates = 0;
            while scheduled < due && updates < MAX_UPDATES_PER_TICK {
                if self.cancel.is_cancelled() {
                    return Ok(RunStatus::Cancelled);
                }
                let batch = match shared.sample(self.run_config.batch_size, &mut self.rng) {
                    Ok(batch) => batch,
                    Err(e) => {
                        debug!("Skipping learning step: {e}");
                        break;
                    }
                };
                if self.learn_on(&batch)? {
                    policy.publish(self.learner.online().snapshot());
                }
                scheduled += 1;
                updates += 1;
            }
        }
    }
}

/// Everything a self-play worker owns.
struct WorkerContext {
    id: usize,
    run_seed: u64,
    pool_seed: u64,
    weights: OpponentWeights,
    schedule: EpsilonSchedule,
    budget: usize,
    stop: CancellationToken,
    cancel: CancellationToken,
}

fn self_play_worker<P>(
    ctx: WorkerContext,
    shared: &SharedReplayBuffer,
    policy: &SnapshotCell<P>,
    next_episode: &AtomicUsize,
    env_steps: &AtomicUsize,
    tx: &Sender<Result<EpisodeResult, TrainingError>>,
) -> Result<(), TrainingError>
where
    P: ActionValueFunction + Clone,
{
    let mut pool: OpponentPool<P> = OpponentPool::new(ctx.weights, 0, ctx.pool_seed)?;
    let (mut version, mut values) = policy.load();
    debug!("Self-play worker {} started", ctx.id);

    while !ctx.stop.is_cancelled() && !ctx.cancel.is_cancelled() {
        let episode = next_episode.fetch_add(1, Ordering::SeqCst);
        if episode >= ctx.budget {
            break;
        }
        if policy.version() != version {
            (version, values) = policy.load();
        }

        let epsilon = ctx.schedule.epsilon(env_steps.load(Ordering::SeqCst));
        let mut rng = StdRng::seed_from_u64(episode_seed(ctx.run_seed, episode));
        let trace = play_episode(&values, pool.sample(), learner_side(episode), epsilon, &mut rng)?;
        env_steps.fetch_add(trace.transitions.len(), Ordering::SeqCst);
        shared.insert_all(trace.transitions);
        if tx.send(Ok(trace.result)).is_err() {
            break;
        }
    }
    debug!("Self-play worker {} stopped", ctx.id);
    Ok(())
}

/// Save, retrying with exponential backoff.
pub fn save_with_retry(
    manager: &CheckpointManager,
    checkpoint: &Checkpoint,
    metrics: &CheckpointMetrics,
    retries: usize,
    backoff_ms: u64,
) -> Result<PathBuf, CheckpointError> {
    let mut attempt = 0;
    loop {
        match manager.save(checkpoint, metrics.clone()) {
            Ok(path) => return Ok(path),
            Err(e) if attempt < retries => {
                let delay = backoff_ms.saturating_mul(1u64 << attempt.min(16));
                warn!(
                    "Checkpoint save failed (attempt {}/{}): {}; retrying in {} ms",
                    attempt + 1,
                    retries + 1,
                    e,
                    delay
                );
                std::thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

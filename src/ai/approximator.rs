use burn::backend::{Autodiff, NdArray};
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use crate::ai::networks::{QNetwork, QNetworkConfig};
use crate::ai::state_encoding::encode_states_batch;
use crate::config::RunConfig;
use crate::error::ModelError;
use crate::game::{GameState, COLS};

pub type InferBackend = NdArray<f32>;
pub type TrainBackend = Autodiff<InferBackend>;

type Device = <InferBackend as Backend>::Device;
type QOptimizer = OptimizerAdaptor<Adam, QNetwork<TrainBackend>, TrainBackend>;

const HUBER_DELTA: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Mse,
    #[default]
    Huber,
}

/// Regression target for the value of `action` in `state`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSample {
    pub state: GameState,
    pub action: usize,
    pub target: f32,
}

/// Read-only access to per-column action values.
pub trait ActionValueFunction {
    fn predict_batch(&self, states: &[GameState]) -> Result<Vec<[f32; COLS]>, ModelError>;

    fn predict(&self, state: &GameState) -> Result<[f32; COLS], ModelError> {
        self.predict_batch(std::slice::from_ref(state))?
            .pop()
            .ok_or_else(|| ModelError::Shape("empty prediction batch".to_string()))
    }

    /// Serialize the weights to a byte stream.
    fn save_weights(&self) -> Result<Vec<u8>, ModelError>;
}

/// An action-value function that can be trained and frozen into snapshots.
pub trait TrainableActionValue: ActionValueFunction {
    /// Frozen, inference-only copy of the weights.
    type Snapshot: ActionValueFunction + Clone + Send + 'static;

    /// One optimizer update toward the sample targets. Returns the batch loss.
    /// A non-finite loss is returned as-is and no update is applied.
    fn train_step(
        &mut self,
        batch: &[TrainingSample],
        learning_rate: f64,
        loss: LossKind,
    ) -> Result<f32, ModelError>;

    fn snapshot(&self) -> Self::Snapshot;

    fn snapshot_from_bytes(&self, bytes: &[u8]) -> Result<Self::Snapshot, ModelError>;

    fn load_weights(&mut self, bytes: &[u8]) -> Result<(), ModelError>;

    fn optimizer_state(&self) -> Result<Vec<u8>, ModelError>;

    fn load_optimizer_state(&mut self, bytes: &[u8]) -> Result<(), ModelError>;
}

/// Online Q-network trained with Adam on the autodiff backend.
pub struct BurnQFunction {
    model: QNetwork<TrainBackend>,
    optimizer: QOptimizer,
    network_config: QNetworkConfig,
    max_grad_norm: f32,
    device: Device,
}

impl BurnQFunction {
    pub fn new(network_config: QNetworkConfig, max_grad_norm: f32) -> Self {
        let device = Device::default();
        let model = network_config.init::<TrainBackend>(&device);
        BurnQFunction {
            model,
            optimizer: new_optimizer(max_grad_norm),
            network_config,
            max_grad_norm,
            device,
        }
    }

    /// Seed the backend before initializing weights.
    pub fn seeded(network_config: QNetworkConfig, max_grad_norm: f32, seed: u64) -> Self {
        <TrainBackend as Backend>::seed(seed);
        Self::new(network_config, max_grad_norm)
    }

    pub fn from_run_config(config: &RunConfig) -> Self {
        Self::seeded(
            QNetworkConfig::new().with_hidden_size(config.hidden_size),
            config.max_grad_norm,
            config.seed,
        )
    }
}

fn new_optimizer(max_grad_norm: f32) -> QOptimizer {
    AdamConfig::new()
        .with_grad_clipping(Some(GradientClippingConfig::Norm(max_grad_norm)))
        .init::<TrainBackend, QNetwork<TrainBackend>>()
}

impl ActionValueFunction for BurnQFunction {
    fn predict_batch(&self, states: &[GameState]) -> Result<Vec<[f32; COLS]>, ModelError> {
        predict_with(&self.model.valid(), states, &self.device)
    }

    fn save_weights(&self) -> Result<Vec<u8>, ModelError> {
        weights_to_bytes(self.model.valid())
    }
}

impl TrainableActionValue for BurnQFunction {
    type Snapshot = QNetworkSnapshot;

    fn train_step(
        &mut self,
        batch: &[TrainingSample],
        learning_rate: f64,
        loss_kind: LossKind,
    ) -> Result<f32, ModelError> {
        if batch.is_empty() {
            return Err(ModelError::Shape("empty training batch".to_string()));
        }
        let batch_size = batch.len();

        // One-hot action mask [B, 7] to extract Q(s, a)
        let mut mask_data = vec![0.0f32; batch_size * COLS];
        for (i, sample) in batch.iter().enumerate() {
            if sample.action >= COLS {
                return Err(ModelError::Shape(format!(
                    "action {} out of range",
                    sample.action
                )));
            }
            mask_data[i * COLS + sample.action] = 1.0;
        }
        let states: Vec<GameState> = batch.iter().map(|s| s.state).collect();
        let target_data: Vec<f32> = batch.iter().map(|s| s.target).collect();

        let q_all = self
            .model
            .forward(encode_states_batch::<TrainBackend>(&states, &self.device));
        let mask = Tensor::<TrainBackend, 1>::from_data(
            TensorData::from(mask_data.as_slice()),
            &self.device,
        )
        .reshape([batch_size, COLS]);
        let q_taken = (q_all * mask).sum_dim(1);
        let targets = Tensor::<TrainBackend, 1>::from_data(
            TensorData::from(target_data.as_slice()),
            &self.device,
        )
        .reshape([batch_size, 1]);

        let diff = q_taken - targets;
        let loss = match loss_kind {
            LossKind::Mse => (diff.clone() * diff).mean(),
            LossKind::Huber => huber(diff),
        };

        let loss_val = loss
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ModelError::Shape(format!("{e:?}")))?
            .first()
            .copied()
            .ok_or_else(|| ModelError::Shape("empty loss tensor".to_string()))?;
        if !loss_val.is_finite() {
            return Ok(loss_val);
        }

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(learning_rate, self.model.clone(), grads);

        Ok(loss_val)
    }

    fn snapshot(&self) -> QNetworkSnapshot {
        QNetworkSnapshot {
            network: self.model.valid(),
            config: self.network_config.clone(),
            device: self.device.clone(),
        }
    }

    fn snapshot_from_bytes(&self, bytes: &[u8]) -> Result<QNetworkSnapshot, ModelError> {
        QNetworkSnapshot::from_bytes(&self.network_config, bytes)
    }

    fn load_weights(&mut self, bytes: &[u8]) -> Result<(), ModelError> {
        self.model = network_from_bytes::<TrainBackend>(&self.network_config, bytes, &self.device)?;
        Ok(())
    }

    fn optimizer_state(&self) -> Result<Vec<u8>, ModelError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        Recorder::<TrainBackend>::record(&recorder, self.optimizer.to_record(), ())
            .map_err(|e| ModelError::Record(e.to_string()))
    }

    fn load_optimizer_state(&mut self, bytes: &[u8]) -> Result<(), ModelError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<TrainBackend>::load(&recorder, bytes.to_vec(), &self.device)
            .map_err(|e| ModelError::Record(e.to_string()))?;
        self.optimizer = new_optimizer(self.max_grad_norm).load_record(record);
        Ok(())
    }
}

/// Frozen inference-only Q-network. Used as the target network, as frozen
/// opponents and by anything serving a trained policy.
#[derive(Debug, Clone)]
pub struct QNetworkSnapshot {
    network: QNetwork<InferBackend>,
    config: QNetworkConfig,
    device: Device,
}

impl QNetworkSnapshot {
    pub fn from_bytes(config: &QNetworkConfig, bytes: &[u8]) -> Result<Self, ModelError> {
        let device = Device::default();
        Ok(QNetworkSnapshot {
            network: network_from_bytes::<InferBackend>(config, bytes, &device)?,
            config: config.clone(),
            device,
        })
    }

    pub fn config(&self) -> &QNetworkConfig {
        &self.config
    }
}

impl ActionValueFunction for QNetworkSnapshot {
    fn predict_batch(&self, states: &[GameState]) -> Result<Vec<[f32; COLS]>, ModelError> {
        predict_with(&self.network, states, &self.device)
    }

    fn save_weights(&self) -> Result<Vec<u8>, ModelError> {
        weights_to_bytes(self.network.clone())
    }
}

fn huber<B: Backend>(diff: Tensor<B, 2>) -> Tensor<B, 1> {
    let abs = diff.abs();
    let quadratic = abs.clone().clamp_max(HUBER_DELTA);
    let linear = abs - quadratic.clone();
    ((quadratic.clone() * quadratic).mul_scalar(0.5) + linear.mul_scalar(HUBER_DELTA)).mean()
}

fn predict_with<B: Backend>(
    network: &QNetwork<B>,
    states: &[GameState],
    device: &B::Device,
) -> Result<Vec<[f32; COLS]>, ModelError> {
    if states.is_empty() {
        return Ok(Vec::new());
    }
    let output = network.forward(encode_states_batch::<B>(states, device));
    let flat: Vec<f32> = output
        .into_data()
        .to_vec()
        .map_err(|e| ModelError::Shape(format!("{e:?}")))?;
    if flat.len() != states.len() * COLS {
        return Err(ModelError::Shape(format!(
            "expected {} values, got {}",
            states.len() * COLS,
            flat.len()
        )));
    }
    Ok(flat
        .chunks_exact(COLS)
        .map(|chunk| {
            let mut row = [0.0f32; COLS];
            row.copy_from_slice(chunk);
            row
        })
        .collect())
}

fn weights_to_bytes<B: Backend>(network: QNetwork<B>) -> Result<Vec<u8>, ModelError> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, network.into_record(), ())
        .map_err(|e| ModelError::Record(e.to_string()))
}

fn network_from_bytes<B: Backend>(
    config: &QNetworkConfig,
    bytes: &[u8],
    device: &B::Device,
) -> Result<QNetwork<B>, ModelError> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, bytes.to_vec(), device)
        .map_err(|e| ModelError::Record(e.to_string()))?;
    Ok(config.init::<B>(device).load_record(record))
}

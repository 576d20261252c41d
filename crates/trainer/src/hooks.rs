//! Capability set a model implementation provides to the worker
//!
//! The state machine only talks to these traits; network definitions,
//! optimizers and dataset decoding live behind them.

use async_trait::async_trait;
use data_shard::SubsetRange;
use runtime_core::{InvocationConfig, LayerName, ModelSnapshot, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::device::Device;
use crate::predictions::InferOutput;

/// Local optimizer whose state can be parked in the tensor store
///
/// Momentum buffers and other accumulators are per worker. The worker writes
/// them after every interval and reads them back before the next one.
pub trait ModelOptimizer: Send {
    /// Serializable optimizer state (stored as an opaque blob)
    type State: Serialize + DeserializeOwned;

    fn state(&self) -> Self::State;

    fn load_state(&mut self, state: Self::State) -> Result<()>;
}

/// User-supplied model hooks
pub trait Model: Send {
    /// One training or validation example
    type Item: Send;

    type Optimizer: ModelOptimizer;

    /// Parameter names in model order
    ///
    /// These are the per-layer keys of the job namespace.
    fn layer_names(&self) -> Vec<LayerName>;

    /// Current parameters
    fn snapshot(&self) -> ModelSnapshot;

    /// Replace the parameters with `snapshot`
    fn load_snapshot(&mut self, snapshot: &ModelSnapshot) -> Result<()>;

    /// Move the model to `device`; CPU-only models can keep the default
    fn to_device(&mut self, _device: Device) -> Result<()> {
        Ok(())
    }

    /// Build a fresh optimizer (zero state) for this invocation
    fn configure_optimizer(&self, invocation: &InvocationConfig) -> Result<Self::Optimizer>;

    /// Produce the initial weights
    fn initialize_weights(&mut self) -> Result<()>;

    /// One optimization step on `batch`; returns the batch loss
    fn train_step(
        &mut self,
        optimizer: &mut Self::Optimizer,
        batch: &[Self::Item],
        batch_index: usize,
    ) -> Result<f64>;

    /// Evaluate `batch`; returns `(accuracy, loss)`
    fn validate_step(&mut self, batch: &[Self::Item], batch_index: usize) -> Result<(f64, f64)>;

    /// Forward pass on request data
    fn infer_step(&mut self, data: &serde_json::Value) -> Result<InferOutput>;
}

/// Access to the subset-partitioned dataset
#[async_trait]
pub trait Dataset: Send + Sync {
    type Item: Send;

    /// Number of training subsets in the whole dataset
    fn train_subsets(&self) -> u64;

    /// Number of validation subsets in the whole dataset
    fn validation_subsets(&self) -> u64;

    /// Load every training item of `range`
    async fn load_train(&self, range: SubsetRange) -> Result<Vec<Self::Item>>;

    /// Load every validation item of `range`
    async fn load_validation(&self, range: SubsetRange) -> Result<Vec<Self::Item>>;
}

//! Per-invocation state machine
//!
//! One [`Worker`] call runs one task to completion. Training walks the
//! worker's interval plan in order:
//!
//! ```text
//! START -> [ LOAD -> LOCAL_TRAIN -> SAVE -> BARRIER ]* -> LOAD -> LOCAL_TRAIN -> SAVE -> END
//! ```
//!
//! The last interval skips the barrier; the caller's response is the
//! cohort's signal that this worker finished the epoch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use barrier::{Barrier, HttpBarrierClient};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use data_shard::{assigned_range, MiniBatches, ShuffleKey, SubsetRange, WorkerPlan};
use runtime_core::config::StoreBackend;
use runtime_core::{Error, InvocationConfig, LayerName, Result, WorkerConfig};
use serde::{Deserialize, Serialize};
use storage::{LocalStorage, MemoryStorage, StorageBackend};
use tensor_store::TensorStoreClient;
use tracing::{debug, error, info, instrument};

use crate::device::Device;
use crate::hooks::{Dataset, Model, ModelOptimizer};
use crate::predictions::into_predictions;

/// Outcome of a training invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    /// Mean loss over every mini-batch of the invocation
    pub mean_loss: f64,

    /// Intervals completed
    pub intervals: usize,

    /// Mini-batches trained
    pub batches: usize,

    /// Items seen
    pub items: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Outcome of a validation invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Mean accuracy over batches
    pub accuracy: f64,

    /// Mean loss over batches
    pub loss: f64,

    /// Items evaluated
    pub items: usize,
}

/// Wall time spent in each phase of one interval
#[derive(Debug, Default)]
struct PhaseTimings {
    data_load: Duration,
    model_load: Duration,
    optimizer_load: Duration,
    training: Duration,
    model_save: Duration,
    optimizer_save: Duration,
    barrier_wait: Duration,
}

impl PhaseTimings {
    fn log(&self, job_id: &str, worker: u32, interval: usize) {
        debug!(
            job_id,
            worker,
            interval,
            data_load_ms = self.data_load.as_millis() as u64,
            model_load_ms = self.model_load.as_millis() as u64,
            optimizer_load_ms = self.optimizer_load.as_millis() as u64,
            training_ms = self.training.as_millis() as u64,
            model_save_ms = self.model_save.as_millis() as u64,
            optimizer_save_ms = self.optimizer_save.as_millis() as u64,
            barrier_wait_ms = self.barrier_wait.as_millis() as u64,
            "Interval phase timings"
        );
    }
}

/// Training worker bound to a model, its dataset and the two collaborators
pub struct Worker<M, D>
where
    M: Model,
    D: Dataset<Item = M::Item>,
{
    model: M,
    dataset: D,
    store: Arc<dyn StorageBackend>,
    barrier: Arc<dyn Barrier>,
    config: WorkerConfig,
}

impl<M, D> Worker<M, D>
where
    M: Model,
    D: Dataset<Item = M::Item>,
{
    pub fn new(
        model: M,
        dataset: D,
        store: Arc<dyn StorageBackend>,
        barrier: Arc<dyn Barrier>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            model,
            dataset,
            store,
            barrier,
            config,
        }
    }

    /// Build the store backend and HTTP barrier client described by `config`
    pub fn from_config(model: M, dataset: D, config: WorkerConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn StorageBackend> = match config.store.backend {
            StoreBackend::Local => Arc::new(LocalStorage::new(&config.store.base_path)),
            StoreBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        let barrier = Arc::new(HttpBarrierClient::new(&config.barrier)?);

        Ok(Self::new(model, dataset, store, barrier, config))
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn select_device(&mut self, invocation: &InvocationConfig) -> Result<Device> {
        let device = Device::for_worker(&self.config.device, invocation.worker_index);
        self.model.to_device(device)?;
        debug!(%device, worker = invocation.worker_index, "Model placed on device");
        Ok(device)
    }

    /// Initialize the weights and publish them as the first canonical snapshot
    ///
    /// Returns the layer names in model order.
    #[instrument(skip_all, fields(job_id = %invocation.job_id))]
    pub async fn init(&mut self, invocation: &InvocationConfig) -> Result<Vec<LayerName>> {
        invocation.validate()?;

        self.model.initialize_weights()?;
        let snapshot = self.model.snapshot();

        let store = TensorStoreClient::connect(self.store.clone()).await?;
        store.save_canonical(&invocation.job_id, &snapshot).await?;

        info!(layers = snapshot.len(), "Published initial model");
        Ok(snapshot.layer_names())
    }

    /// Train on this worker's share of the epoch
    #[instrument(
        skip_all,
        fields(job_id = %invocation.job_id, worker = invocation.worker_index, epoch = invocation.epoch)
    )]
    pub async fn train(&mut self, invocation: &InvocationConfig) -> Result<TrainReport> {
        invocation.validate()?;
        let started_at = Utc::now();
        let job_id = invocation.job_id.as_str();
        let worker = invocation.worker_index;

        self.select_device(invocation)?;
        let mut optimizer = self.model.configure_optimizer(invocation)?;

        let plan = WorkerPlan::derive(
            self.dataset.train_subsets(),
            invocation.worker_count,
            worker,
            invocation.sync_frequency,
            invocation.batch_size,
            self.config.partition.items_per_subset,
        )?;
        info!(
            assigned_start = plan.assigned.start,
            assigned_stop = plan.assigned.stop,
            subsets_per_interval = plan.subsets_per_interval,
            rounds = plan.rounds,
            intervals = plan.intervals.len(),
            "Starting training"
        );

        let mut loss_sum = 0.0;
        let mut batches = 0usize;
        let mut items = 0usize;

        if plan.intervals.is_empty() {
            info!("Empty assigned range, nothing to train");
            return Ok(TrainReport {
                mean_loss: 0.0,
                intervals: 0,
                batches,
                items,
                started_at,
                finished_at: Utc::now(),
            });
        }

        let store = TensorStoreClient::connect(self.store.clone()).await?;
        let layers = self.model.layer_names();
        let last = plan.intervals.len() - 1;

        for (index, interval) in plan.intervals.iter().copied().enumerate() {
            let mut timings = PhaseTimings::default();

            // LOAD
            let t = Instant::now();
            let snapshot = store.load_canonical(job_id, &layers).await?;
            self.model.load_snapshot(&snapshot)?;
            timings.model_load = t.elapsed();

            let t = Instant::now();
            match store.get_blob(job_id, worker).await? {
                Some(blob) => {
                    let state = bincode::deserialize(&blob).map_err(|e| {
                        Error::storage(format!(
                            "Optimizer state of worker {} in job {} does not decode: {}",
                            worker, job_id, e
                        ))
                    })?;
                    optimizer.load_state(state)?;
                }
                None => {
                    debug!(interval = index, "No optimizer state stored, starting fresh");
                    optimizer = self.model.configure_optimizer(invocation)?;
                }
            }
            timings.optimizer_load = t.elapsed();

            // LOCAL_TRAIN
            let t = Instant::now();
            let loaded = self.dataset.load_train(interval).await?;
            timings.data_load = t.elapsed();

            let mini_batches = self.mini_batches(loaded, invocation, interval);
            items += mini_batches.item_count();

            let t = Instant::now();
            for batch in &mini_batches {
                loss_sum += self.model.train_step(&mut optimizer, batch, batches)?;
                batches += 1;
            }
            timings.training = t.elapsed();

            // SAVE
            let t = Instant::now();
            store
                .save_worker_snapshot(job_id, &self.model.snapshot(), worker)
                .await?;
            timings.model_save = t.elapsed();

            let t = Instant::now();
            let blob = bincode::serialize(&optimizer.state())
                .map_err(|e| Error::hook("optimizer_state", e))?;
            store.set_blob(job_id, worker, Bytes::from(blob)).await?;
            timings.optimizer_save = t.elapsed();

            // BARRIER
            if index < last {
                let t = Instant::now();
                if let Err(e) = self.barrier.notify_interval_done(job_id, worker).await {
                    error!(interval = index, error = %e, "Barrier failed, aborting invocation");
                    return Err(e);
                }
                timings.barrier_wait = t.elapsed();
            }

            timings.log(job_id, worker, index);
            info!(
                interval = index,
                start = interval.start,
                stop = interval.stop,
                batches,
                "Interval complete"
            );
        }

        let mean_loss = if batches == 0 {
            0.0
        } else {
            loss_sum / batches as f64
        };

        info!(mean_loss, batches, items, "Training complete");
        Ok(TrainReport {
            mean_loss,
            intervals: plan.intervals.len(),
            batches,
            items,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn mini_batches(
        &self,
        items: Vec<M::Item>,
        invocation: &InvocationConfig,
        interval: SubsetRange,
    ) -> MiniBatches<M::Item> {
        let batch_size = invocation.batch_size as usize;
        if !self.config.partition.shuffle {
            return MiniBatches::sequential(items, batch_size);
        }
        MiniBatches::shuffled(
            items,
            batch_size,
            ShuffleKey {
                seed: self.config.partition.seed,
                job_id: &invocation.job_id,
                epoch: invocation.epoch,
                worker_index: invocation.worker_index,
                interval,
            },
        )
    }

    /// Evaluate the canonical model on this worker's validation share
    #[instrument(skip_all, fields(job_id = %invocation.job_id, worker = invocation.worker_index))]
    pub async fn validate(&mut self, invocation: &InvocationConfig) -> Result<ValidationReport> {
        invocation.validate()?;
        self.select_device(invocation)?;

        let range = assigned_range(
            self.dataset.validation_subsets(),
            invocation.worker_count,
            invocation.worker_index,
        )?;
        let mut report = ValidationReport {
            accuracy: 0.0,
            loss: 0.0,
            items: 0,
        };
        if range.is_empty() {
            info!("Empty validation range");
            return Ok(report);
        }

        let store = TensorStoreClient::connect(self.store.clone()).await?;
        let snapshot = store
            .load_canonical(&invocation.job_id, &self.model.layer_names())
            .await?;
        self.model.load_snapshot(&snapshot)?;

        let loaded = self.dataset.load_validation(range).await?;
        let mini_batches = MiniBatches::sequential(loaded, invocation.batch_size as usize);

        let mut accuracy_sum = 0.0;
        let mut loss_sum = 0.0;
        for (index, batch) in mini_batches.iter().enumerate() {
            let (accuracy, loss) = self.model.validate_step(batch, index)?;
            accuracy_sum += accuracy;
            loss_sum += loss;
        }

        if !mini_batches.is_empty() {
            let n = mini_batches.len() as f64;
            report.accuracy = accuracy_sum / n;
            report.loss = loss_sum / n;
            report.items = mini_batches.item_count();
        }

        info!(
            accuracy = report.accuracy,
            loss = report.loss,
            items = report.items,
            "Validation complete"
        );
        Ok(report)
    }

    /// Run the canonical model on request data
    ///
    /// A missing or empty payload is rejected before the store or any hook
    /// is touched.
    #[instrument(skip_all, fields(job_id = %invocation.job_id))]
    pub async fn infer(
        &mut self,
        invocation: &InvocationConfig,
        payload: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let data = match payload {
            Some(data) if !is_blank(data) => data,
            _ => {
                return Err(Error::MalformedRequest {
                    message: "inference requires a non-empty payload".to_string(),
                })
            }
        };
        invocation.validate()?;
        self.select_device(invocation)?;

        let store = TensorStoreClient::connect(self.store.clone()).await?;
        let snapshot = store
            .load_canonical(&invocation.job_id, &self.model.layer_names())
            .await?;
        self.model.load_snapshot(&snapshot)?;
        drop(store);

        let output = self.model.infer_step(data)?;
        into_predictions(output)
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

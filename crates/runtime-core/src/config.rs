//! Worker and invocation configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Epoch, Error, JobId, Result, TaskKind, WorkerIndex};

/// Environment-level worker configuration
///
/// Fixed for the lifetime of the worker process; everything that varies per
/// call lives in [`InvocationConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Tensor store settings
    pub store: StoreConfig,

    /// Barrier endpoint settings
    pub barrier: BarrierConfig,

    /// Device selection
    pub device: DeviceConfig,

    /// Subset partitioning and batching
    pub partition: PartitionConfig,
}

impl WorkerConfig {
    /// Build a configuration from defaults overridden by environment variables
    ///
    /// Recognised: `TENSOR_STORE_PATH`, `BARRIER_ENDPOINT`, `WORKER_PLATFORM`
    /// (`cpu` | `gpu`), `WORKER_GPUS`, `ITEMS_PER_SUBSET`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkerConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = WorkerConfig::default();

        if let Some(path) = lookup("TENSOR_STORE_PATH") {
            config.store.backend = StoreBackend::Local;
            config.store.base_path = path;
        }

        if let Some(endpoint) = lookup("BARRIER_ENDPOINT") {
            config.barrier.endpoint_template = endpoint;
        }

        if let Some(platform) = lookup("WORKER_PLATFORM") {
            config.device.platform = match platform.to_ascii_lowercase().as_str() {
                "cpu" => Platform::Cpu,
                "gpu" => Platform::Gpu,
                other => {
                    return Err(Error::invalid_config(format!(
                        "WORKER_PLATFORM must be cpu or gpu, got {:?}",
                        other
                    )))
                }
            };
        }

        if let Some(gpus) = lookup("WORKER_GPUS") {
            config.device.gpu_count = parse_var("WORKER_GPUS", &gpus)?;
        }

        if let Some(items) = lookup("ITEMS_PER_SUBSET") {
            config.partition.items_per_subset = parse_var("ITEMS_PER_SUBSET", &items)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition.items_per_subset == 0 {
            return Err(Error::invalid_config("items_per_subset must be at least 1"));
        }
        if self.device.platform == Platform::Gpu && self.device.gpu_count == 0 {
            return Err(Error::invalid_config("gpu platform needs gpu_count >= 1"));
        }
        if !self.barrier.endpoint_template.contains("{worker}") {
            return Err(Error::invalid_config(
                "barrier endpoint template must contain {worker}",
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_config(format!("{} is not a valid number: {:?}", name, value)))
}

/// Tensor store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage backend type
    pub backend: StoreBackend,

    /// Base path for the local backend
    pub base_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            base_path: "./tensor-store".to_string(),
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreBackend {
    /// Local (or mounted shared) filesystem
    Local,

    /// In-process map; only meaningful when the whole cohort shares a process
    Memory,
}

/// Barrier endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// URL template; `{job_id}` and `{worker}` are substituted per call
    pub endpoint_template: String,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout; `None` waits as long as the coordinator holds
    /// the request open
    #[serde(with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            endpoint_template: "http://job-{job_id}.serverless/next/{worker}".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Compute platform
    pub platform: Platform,

    /// Number of accelerators visible to the worker host
    pub gpu_count: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Cpu,
            gpu_count: 0,
        }
    }
}

/// Compute platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Platform {
    Cpu,
    Gpu,
}

/// Subset partitioning and batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Training items stored in one dataset subset
    pub items_per_subset: u64,

    /// Shuffle training batches within an interval
    pub shuffle: bool,

    /// Base seed for deterministic shuffling
    pub seed: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            items_per_subset: 64,
            shuffle: true,
            seed: 42,
        }
    }
}

/// Parameters of a single worker invocation
///
/// Constructed once per call and passed by reference to every step; nothing
/// in it is mutated while the invocation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Job identifier
    pub job_id: JobId,

    /// Task to perform
    pub task: TaskKind,

    /// Index of this worker in the cohort
    pub worker_index: WorkerIndex,

    /// Cohort size N
    pub worker_count: u32,

    /// Target number of synchronizations per epoch (k)
    pub sync_frequency: u32,

    /// Current epoch
    pub epoch: Epoch,

    /// Mini-batch size
    pub batch_size: u32,

    /// Learning rate handed to the optimizer hook
    pub learning_rate: f64,
}

impl InvocationConfig {
    /// Check the invariants the state machine relies on
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(Error::invalid_config("job_id must not be empty"));
        }
        if self.worker_count == 0 {
            return Err(Error::invalid_config("worker_count must be at least 1"));
        }
        if self.worker_index >= self.worker_count {
            return Err(Error::invalid_config(format!(
                "worker_index {} out of range for {} workers",
                self.worker_index, self.worker_count
            )));
        }
        if self.task == TaskKind::Train && self.sync_frequency == 0 {
            return Err(Error::invalid_config("sync_frequency must be at least 1"));
        }
        if matches!(self.task, TaskKind::Train | TaskKind::Validate) && self.batch_size == 0 {
            return Err(Error::invalid_config("batch_size must be at least 1"));
        }
        if !self.learning_rate.is_finite() {
            return Err(Error::invalid_config("learning_rate must be finite"));
        }
        Ok(())
    }
}

/// Duration serialization helper (milliseconds on the wire)
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

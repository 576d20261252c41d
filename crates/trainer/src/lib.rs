//! Synchronous serverless training worker
//!
//! A job's model is trained by a cohort of N stateless workers. Every
//! invocation runs one task; training splits the worker's share of the epoch
//! into intervals and meets the rest of the cohort at a barrier after each
//! one, while the job coordinator averages the worker-local snapshots into the
//! canonical model.
//!
//! # Example
//!
//! ```ignore
//! use trainer::{TaskRequest, Worker};
//! use runtime_core::WorkerConfig;
//!
//! let mut worker = Worker::from_config(MyModel::new(), MyDataset::open()?, WorkerConfig::from_env()?)?;
//! let request = TaskRequest::from_json(&body)?;
//! let response = worker.handle(&request).await?;
//! ```

pub mod device;
pub mod hooks;
pub mod predictions;
pub mod task;
pub mod worker;

pub use device::Device;
pub use hooks::{Dataset, Model, ModelOptimizer};
pub use predictions::{into_predictions, InferOutput};
pub use task::{status_code, ErrorResponse, TaskRequest, TaskResponse};
pub use worker::{TrainReport, ValidationReport, Worker};

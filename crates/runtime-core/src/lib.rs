//! Runtime Core - Foundation for synchronous serverless training workers
//!
//! Provides the shared vocabulary of the workspace: identifiers, tensors and
//! model snapshots, the closed error enumeration, worker configuration and
//! tracing setup.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod tensor;
pub mod types;

pub use config::{InvocationConfig, WorkerConfig};
pub use error::{Error, ErrorKind, Result};
pub use tensor::{ModelSnapshot, Tensor};
pub use types::*;

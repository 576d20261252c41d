//! Barrier client
//!
//! At the end of every synchronization interval except the last, a worker
//! tells the job coordinator it has published its weights and then blocks
//! until the coordinator answers. The answer means every cohort member has
//! arrived and the averaged canonical snapshot is in the store; it is the only
//! happens-before edge between workers, so a failed call ends the invocation.

mod http;

pub use http::HttpBarrierClient;

use async_trait::async_trait;
use runtime_core::{Result, WorkerIndex};

/// End-of-interval rendezvous
#[async_trait]
pub trait Barrier: Send + Sync {
    /// Signal that `worker` finished its interval and wait for the release
    ///
    /// Returns only once the coordinator acknowledged; any other outcome is
    /// `Error::BarrierFault`.
    async fn notify_interval_done(&self, job_id: &str, worker: WorkerIndex) -> Result<()>;
}

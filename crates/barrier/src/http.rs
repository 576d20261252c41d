//! HTTP barrier client

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use runtime_core::config::BarrierConfig;
use runtime_core::{Error, Result, WorkerIndex};
use tracing::{debug, error, instrument};

use crate::Barrier;

/// Barrier backed by a blocking `POST` to the job coordinator
///
/// The coordinator holds each request open until the whole cohort has
/// arrived and the averaged model is published, then answers 2xx.
#[derive(Debug, Clone)]
pub struct HttpBarrierClient {
    client: Client,
    endpoint_template: String,
}

impl HttpBarrierClient {
    pub fn new(config: &BarrierConfig) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| Error::invalid_config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint_template: config.endpoint_template.clone(),
        })
    }

    /// Resolve the endpoint for one worker of one job
    pub fn endpoint(&self, job_id: &str, worker: WorkerIndex) -> String {
        self.endpoint_template
            .replace("{job_id}", job_id)
            .replace("{worker}", &worker.to_string())
    }
}

#[async_trait]
impl Barrier for HttpBarrierClient {
    #[instrument(skip(self))]
    async fn notify_interval_done(&self, job_id: &str, worker: WorkerIndex) -> Result<()> {
        let url = self.endpoint(job_id, worker);
        let start = Instant::now();
        debug!(%url, "Sending interval-done signal");

        let fault = |reason: String| Error::BarrierFault {
            job_id: job_id.to_string(),
            worker,
            reason,
        };

        let response = self.client.post(&url).send().await.map_err(|e| {
            error!(%url, error = %e, "Could not reach the job coordinator");
            fault(format!("request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            error!(%url, %status, %body, "Coordinator rejected interval-done signal");
            return Err(fault(format!("HTTP {}: {}", status, body)));
        }

        debug!(
            %url,
            waited_ms = start.elapsed().as_millis() as u64,
            "Barrier released"
        );
        Ok(())
    }
}

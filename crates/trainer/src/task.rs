//! Task contract between the serverless shell and the worker
//!
//! The shell deserializes a [`TaskRequest`] from the invocation payload, hands
//! it to [`Worker::handle`] and serializes either the [`TaskResponse`] or an
//! [`ErrorResponse`] carrying the transport status from [`status_code`].

use runtime_core::{Epoch, Error, ErrorKind, InvocationConfig, JobId, Result, TaskKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::hooks::{Dataset, Model};
use crate::worker::Worker;

/// One invocation as received from the shell
///
/// Cohort position is always required. Interval and batch parameters are
/// required only by the tasks that use them; a train or validate request
/// without them is malformed rather than run with guessed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Task name (`init`, `train`, `val`, `validate`, `infer`)
    pub task: String,

    pub job_id: JobId,

    pub worker_index: u32,

    pub worker_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_frequency: Option<u32>,

    #[serde(default)]
    pub epoch: Epoch,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Inference input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

fn default_learning_rate() -> f64 {
    0.01
}

impl TaskRequest {
    /// Parse a request from its JSON body
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Resolve the task kind and build the immutable invocation parameters
    pub fn invocation(&self) -> Result<InvocationConfig> {
        let task: TaskKind = self.task.parse()?;

        let require = |value: Option<u32>, field: &str| {
            value.ok_or_else(|| Error::MalformedRequest {
                message: format!("{} task requires {}", task, field),
            })
        };
        let (sync_frequency, batch_size) = match task {
            TaskKind::Train => (
                require(self.sync_frequency, "sync_frequency")?,
                require(self.batch_size, "batch_size")?,
            ),
            TaskKind::Validate => (
                self.sync_frequency.unwrap_or(1),
                require(self.batch_size, "batch_size")?,
            ),
            TaskKind::Init | TaskKind::Infer => (
                self.sync_frequency.unwrap_or(1),
                self.batch_size.unwrap_or(1),
            ),
        };

        let invocation = InvocationConfig {
            job_id: self.job_id.clone(),
            task,
            worker_index: self.worker_index,
            worker_count: self.worker_count,
            sync_frequency,
            epoch: self.epoch,
            batch_size,
            learning_rate: self.learning_rate,
        };
        invocation.validate()?;
        Ok(invocation)
    }
}

/// Successful result of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskResponse {
    /// Layer names published by `init`
    Layers(Vec<String>),

    Train {
        loss: f64,
    },

    Validate {
        accuracy: f64,
        loss: f64,
        length: usize,
    },

    Infer {
        predictions: Value,
    },
}

/// Error body returned to the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub status: u16,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            error: err.to_string(),
            kind: format!("{:?}", err.kind()),
            status: status_code(err),
        }
    }
}

/// Transport status for an error kind
pub fn status_code(err: &Error) -> u16 {
    match err.kind() {
        ErrorKind::MalformedRequest
        | ErrorKind::UnrecognizedTask
        | ErrorKind::InvalidConfig
        | ErrorKind::Serialization => 400,
        ErrorKind::BarrierFault => 502,
        ErrorKind::StorageFault | ErrorKind::UnsupportedOutputFormat | ErrorKind::Hook => 500,
    }
}

impl<M, D> Worker<M, D>
where
    M: Model,
    D: Dataset<Item = M::Item>,
{
    /// Dispatch one shell request
    ///
    /// The task name is resolved before anything else, so an unknown task
    /// never reaches the store or a hook.
    pub async fn handle(&mut self, request: &TaskRequest) -> Result<TaskResponse> {
        let invocation = match request.invocation() {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(task = %request.task, job_id = %request.job_id, error = %e, "Rejected request");
                return Err(e);
            }
        };
        info!(
            task = %invocation.task,
            job_id = %invocation.job_id,
            worker = invocation.worker_index,
            "Handling task"
        );

        match invocation.task {
            TaskKind::Init => self.init(&invocation).await.map(TaskResponse::Layers),
            TaskKind::Train => {
                let report = self.train(&invocation).await?;
                Ok(TaskResponse::Train {
                    loss: report.mean_loss,
                })
            }
            TaskKind::Validate => {
                let report = self.validate(&invocation).await?;
                Ok(TaskResponse::Validate {
                    accuracy: report.accuracy,
                    loss: report.loss,
                    length: report.items,
                })
            }
            TaskKind::Infer => {
                let predictions = self.infer(&invocation, request.payload.as_ref()).await?;
                Ok(TaskResponse::Infer { predictions })
            }
        }
    }

    /// Handle a raw JSON body and always produce a JSON reply with its status
    pub async fn handle_json(&mut self, body: &str) -> (u16, Value) {
        let outcome = match TaskRequest::from_json(body) {
            Ok(request) => self.handle(&request).await,
            Err(e) => Err(e),
        };

        let reply = outcome.and_then(|response| Ok(serde_json::to_value(response)?));
        match reply {
            Ok(value) => (200, value),
            Err(e) => {
                let body = ErrorResponse::from(&e);
                let status = body.status;
                let value = serde_json::to_value(body)
                    .unwrap_or_else(|_| Value::String(e.to_string()));
                (status, value)
            }
        }
    }
}

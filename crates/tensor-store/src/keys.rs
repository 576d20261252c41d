//! Key schema of the shared store

use runtime_core::{Error, Result, WorkerIndex};

/// Segment marking optimizer blobs in the job namespace
pub const OPTIMIZER_SEGMENT: &str = "optimizer";

/// Prefix shared by every key of a job
pub fn job_prefix(job_id: &str) -> String {
    format!("{}:", job_id)
}

/// `{job}:{name}`
pub fn tensor_key(job_id: &str, name: &str) -> String {
    format!("{}:{}", job_id, name)
}

/// Name of a worker-local copy of `layer`: `{layer}/{worker}`
pub fn worker_layer_name(layer: &str, worker: WorkerIndex) -> String {
    format!("{}/{}", layer, worker)
}

/// `{job}:optimizer:{worker}`
pub fn optimizer_key(job_id: &str, worker: WorkerIndex) -> String {
    format!("{}:{}:{}", job_id, OPTIMIZER_SEGMENT, worker)
}

/// Classification of a key inside a job namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind<'a> {
    Canonical { layer: &'a str },
    WorkerLocal { layer: &'a str, worker: WorkerIndex },
    Optimizer { worker: WorkerIndex },
}

/// Parse a key of `job_id`'s namespace; `None` if it belongs to another job
pub fn classify<'a>(job_id: &str, key: &'a str) -> Option<KeyKind<'a>> {
    let name = key.strip_prefix(job_id)?.strip_prefix(':')?;
    Some(classify_name(name))
}

/// Classify the part of a key after `{job}:`
fn classify_name(name: &str) -> KeyKind<'_> {
    if let Some(worker) = name
        .strip_prefix(OPTIMIZER_SEGMENT)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|w| w.parse().ok())
    {
        return KeyKind::Optimizer { worker };
    }

    if let Some((layer, worker)) = name.rsplit_once('/') {
        if let Ok(worker) = worker.parse() {
            return KeyKind::WorkerLocal { layer, worker };
        }
    }

    KeyKind::Canonical { layer: name }
}

/// Reject layer names whose canonical key would read back as another kind
///
/// Names ending in `/<digits>` and names of the form `optimizer:<digits>` are
/// reserved for worker-local tensors and optimizer blobs.
pub fn check_layer_name(name: &str) -> Result<()> {
    match classify_name(name) {
        KeyKind::Canonical { .. } if !name.is_empty() => Ok(()),
        KeyKind::Canonical { .. } => Err(Error::invalid_config("layer name must not be empty")),
        _ => Err(Error::invalid_config(format!(
            "layer name {:?} collides with the reserved key schema",
            name
        ))),
    }
}

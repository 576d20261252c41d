//! Tensor store client scoped to one worker invocation

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use runtime_core::{Error, LayerName, ModelSnapshot, Result, Tensor, WorkerIndex};
use storage::StorageBackend;
use tracing::{debug, instrument, warn};

use crate::keys::{self, KeyKind};

/// Which copy of the model a snapshot operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    /// The averaged model shared by the cohort (`{job}:{layer}`)
    Canonical,

    /// One worker's pre-averaging contribution (`{job}:{layer}/{worker}`)
    Worker(WorkerIndex),
}

impl SnapshotScope {
    fn layer_name(&self, layer: &str) -> String {
        match self {
            SnapshotScope::Canonical => layer.to_string(),
            SnapshotScope::Worker(worker) => keys::worker_layer_name(layer, *worker),
        }
    }
}

/// Typed client over a [`StorageBackend`]
///
/// Created with [`TensorStoreClient::connect`] at the start of an invocation.
/// The backend lease is released when the client is dropped, which also covers
/// early returns through `?`.
pub struct TensorStoreClient {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for TensorStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorStoreClient").finish_non_exhaustive()
    }
}

impl TensorStoreClient {
    /// Acquire a lease on `backend` for one invocation
    pub async fn connect(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        backend.acquire().await?;
        debug!("Tensor store connection acquired");
        Ok(Self { backend })
    }

    /// Fetch `{job}:{name}`
    #[instrument(skip(self))]
    pub async fn get_tensor(&self, job_id: &str, name: &str) -> Result<Option<Tensor>> {
        let key = keys::tensor_key(job_id, name);
        match self.backend.read(&key).await? {
            Some(bytes) => decode_tensor(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Store `{job}:{name}`
    #[instrument(skip(self, tensor), fields(numel = tensor.numel()))]
    pub async fn set_tensor(&self, job_id: &str, name: &str, tensor: &Tensor) -> Result<()> {
        let key = keys::tensor_key(job_id, name);
        let bytes = bincode::serialize(tensor)
            .map_err(|e| Error::storage(format!("Failed to encode {}: {}", key, e)))?;
        self.backend.write(&key, Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Fetch a worker's optimizer state; `None` means cold start
    #[instrument(skip(self))]
    pub async fn get_blob(&self, job_id: &str, worker: WorkerIndex) -> Result<Option<Bytes>> {
        self.backend.read(&keys::optimizer_key(job_id, worker)).await
    }

    /// Store a worker's optimizer state
    #[instrument(skip(self, blob), fields(size = blob.len()))]
    pub async fn set_blob(&self, job_id: &str, worker: WorkerIndex, blob: Bytes) -> Result<()> {
        self.backend
            .write(&keys::optimizer_key(job_id, worker), blob)
            .await?;
        Ok(())
    }

    /// Load every layer in `layers` from `scope`
    ///
    /// A missing layer is a storage fault: the caller asked for a namespace
    /// the job is supposed to have.
    pub async fn load_snapshot(
        &self,
        job_id: &str,
        layers: &[LayerName],
        scope: SnapshotScope,
    ) -> Result<ModelSnapshot> {
        let start = Instant::now();
        let mut snapshot = ModelSnapshot::new();

        for layer in layers {
            let name = scope.layer_name(layer);
            let tensor = self.get_tensor(job_id, &name).await?.ok_or_else(|| {
                warn!(job_id, layer = %name, "Layer missing from tensor store");
                Error::storage(format!(
                    "{} is absent from the tensor store",
                    keys::tensor_key(job_id, &name)
                ))
            })?;
            snapshot.insert(layer.clone(), tensor);
        }

        debug!(
            job_id,
            ?scope,
            layers = snapshot.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded model snapshot"
        );
        Ok(snapshot)
    }

    /// Write every layer of `snapshot` under `scope`
    pub async fn save_snapshot(
        &self,
        job_id: &str,
        snapshot: &ModelSnapshot,
        scope: SnapshotScope,
    ) -> Result<()> {
        let start = Instant::now();

        // nothing is written unless every name is valid
        for (layer, _) in snapshot.iter() {
            keys::check_layer_name(layer)?;
        }
        for (layer, tensor) in snapshot.iter() {
            self.set_tensor(job_id, &scope.layer_name(layer), tensor)
                .await?;
        }

        debug!(
            job_id,
            ?scope,
            layers = snapshot.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Saved model snapshot"
        );
        Ok(())
    }

    pub async fn load_canonical(&self, job_id: &str, layers: &[LayerName]) -> Result<ModelSnapshot> {
        self.load_snapshot(job_id, layers, SnapshotScope::Canonical)
            .await
    }

    pub async fn save_canonical(&self, job_id: &str, snapshot: &ModelSnapshot) -> Result<()> {
        self.save_snapshot(job_id, snapshot, SnapshotScope::Canonical)
            .await
    }

    pub async fn load_worker_snapshot(
        &self,
        job_id: &str,
        layers: &[LayerName],
        worker: WorkerIndex,
    ) -> Result<ModelSnapshot> {
        self.load_snapshot(job_id, layers, SnapshotScope::Worker(worker))
            .await
    }

    pub async fn save_worker_snapshot(
        &self,
        job_id: &str,
        snapshot: &ModelSnapshot,
        worker: WorkerIndex,
    ) -> Result<()> {
        self.save_snapshot(job_id, snapshot, SnapshotScope::Worker(worker))
            .await
    }

    /// Canonical layer names currently stored for a job, sorted
    pub async fn canonical_layers(&self, job_id: &str) -> Result<Vec<LayerName>> {
        let listed = self.backend.list(&keys::job_prefix(job_id)).await?;
        Ok(listed
            .iter()
            .filter_map(|key| match keys::classify(job_id, key) {
                Some(KeyKind::Canonical { layer }) => Some(layer.to_string()),
                _ => None,
            })
            .collect())
    }

    /// Delete every key of a job; returns how many were removed
    #[instrument(skip(self))]
    pub async fn purge_job(&self, job_id: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.backend.list(&keys::job_prefix(job_id)).await? {
            if keys::classify(job_id, &key).is_some() && self.backend.delete(&key).await? {
                removed += 1;
            }
        }
        debug!(job_id, removed, "Purged job namespace");
        Ok(removed)
    }
}

impl Drop for TensorStoreClient {
    fn drop(&mut self) {
        self.backend.release();
        debug!("Tensor store connection released");
    }
}

fn decode_tensor(key: &str, bytes: &[u8]) -> Result<Tensor> {
    let tensor: Tensor = bincode::deserialize(bytes)
        .map_err(|e| Error::storage(format!("Failed to decode {}: {}", key, e)))?;
    if !tensor.is_consistent() {
        return Err(Error::storage(format!(
            "{} holds a tensor whose data does not match its shape",
            key
        )));
    }
    Ok(tensor)
}

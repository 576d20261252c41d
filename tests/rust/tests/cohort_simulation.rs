//! Cohort training simulation
//!
//! Runs N workers concurrently against a shared local tensor store and an
//! HTTP job coordinator that, once the whole cohort has reported an interval,
//! averages the worker-local snapshots into the canonical model and releases
//! everyone. The final interval of an epoch has no barrier; the coordinator
//! merges it after every invocation has returned.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Router,
};
use common::{Linear, Ramp, ITEMS_PER_SUBSET};
use data_shard::WorkerPlan;
use runtime_core::{LayerName, ModelSnapshot, Tensor, WorkerConfig};
use serde_json::json;
use storage::{LocalStorage, StorageBackend};
use tensor_store::TensorStoreClient;
use tokio::sync::{watch, Mutex};
use trainer::{Model, TaskRequest, TaskResponse, Worker};

const WORKERS: u32 = 3;
const SUBSETS: u64 = 13;

struct Coordinator {
    store: Arc<dyn StorageBackend>,
    layers: Vec<LayerName>,
    workers: u32,
    arrived: Mutex<Vec<u32>>,
    rounds: watch::Sender<u64>,
    merges: Mutex<HashMap<String, u64>>,
}

impl Coordinator {
    /// Average every worker's snapshot into the canonical model
    async fn merge(&self, job_id: &str) -> runtime_core::Result<()> {
        let store = TensorStoreClient::connect(self.store.clone()).await?;

        let mut sums: Vec<Vec<f32>> = Vec::new();
        let mut shapes = Vec::new();
        for worker in 0..self.workers {
            let snapshot = store
                .load_worker_snapshot(job_id, &self.layers, worker)
                .await?;
            for (i, (_, tensor)) in snapshot.iter().enumerate() {
                if sums.len() <= i {
                    sums.push(vec![0.0; tensor.numel()]);
                    shapes.push(tensor.shape().to_vec());
                }
                for (acc, x) in sums[i].iter_mut().zip(tensor.data()) {
                    *acc += x;
                }
            }
        }

        let mut averaged = ModelSnapshot::new();
        for ((layer, sum), shape) in self.layers.iter().zip(sums).zip(shapes) {
            let data = sum.into_iter().map(|x| x / self.workers as f32).collect();
            averaged.insert(layer.clone(), Tensor::new(shape, data)?);
        }
        store.save_canonical(job_id, &averaged).await?;

        *self.merges.lock().await.entry(job_id.to_string()).or_default() += 1;
        Ok(())
    }
}

async fn next(
    State(coordinator): State<Arc<Coordinator>>,
    Path((job_id, worker)): Path<(String, u32)>,
) -> (StatusCode, String) {
    let mut rounds = coordinator.rounds.subscribe();
    let round = *rounds.borrow_and_update();

    {
        let mut arrived = coordinator.arrived.lock().await;
        arrived.push(worker);
        if arrived.len() as u32 == coordinator.workers {
            arrived.clear();
            if let Err(e) = coordinator.merge(&job_id).await {
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
            coordinator.rounds.send_replace(round + 1);
            return (StatusCode::OK, String::new());
        }
    }

    let released = rounds.wait_for(|r| *r > round).await.is_ok();
    if released {
        (StatusCode::OK, String::new())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "coordinator gone".to_string())
    }
}

async fn start_coordinator(store: Arc<dyn StorageBackend>) -> Result<(String, Arc<Coordinator>)> {
    let (rounds, _) = watch::channel(0);
    let coordinator = Arc::new(Coordinator {
        store,
        layers: Linear::default().layer_names(),
        workers: WORKERS,
        arrived: Mutex::new(Vec::new()),
        rounds,
        merges: Mutex::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/job/:job_id/next/:worker", post(next))
        .with_state(coordinator.clone());

    let port = portpicker::pick_unused_port().expect("No ports free");
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Ok((
        format!("http://127.0.0.1:{}/job/{{job_id}}/next/{{worker}}", port),
        coordinator,
    ))
}

fn config(store_path: &std::path::Path, endpoint: &str) -> Result<WorkerConfig> {
    let items = ITEMS_PER_SUBSET.to_string();
    let path = store_path.to_string_lossy().to_string();
    let vars = HashMap::from([
        ("TENSOR_STORE_PATH", path),
        ("BARRIER_ENDPOINT", endpoint.to_string()),
        ("ITEMS_PER_SUBSET", items),
    ]);
    Ok(WorkerConfig::from_lookup(|key| vars.get(key).cloned())?)
}

fn request(task: &str, worker: u32, epoch: u64) -> TaskRequest {
    serde_json::from_value(json!({
        "task": task,
        "job_id": "sim",
        "worker_index": worker,
        "worker_count": WORKERS,
        "sync_frequency": 2,
        "epoch": epoch,
        "batch_size": 2,
        "learning_rate": 0.1,
    }))
    .unwrap()
}

type SimWorker = Worker<Linear, Ramp>;

fn cohort(config: &WorkerConfig) -> Result<Vec<SimWorker>> {
    (0..WORKERS)
        .map(|_| -> Result<SimWorker> {
            let dataset = Ramp {
                train: SUBSETS,
                validation: SUBSETS,
            };
            Ok(Worker::from_config(Linear::default(), dataset, config.clone())?)
        })
        .collect()
}

/// Run one epoch on every worker concurrently; returns the mean losses
async fn run_epoch(workers: Vec<SimWorker>, epoch: u64) -> Result<(Vec<SimWorker>, Vec<f64>)> {
    let handles: Vec<_> = workers
        .into_iter()
        .enumerate()
        .map(|(index, mut worker)| {
            tokio::spawn(async move {
                let response = worker.handle(&request("train", index as u32, epoch)).await;
                (worker, response)
            })
        })
        .collect();

    let mut workers = Vec::new();
    let mut losses = Vec::new();
    for handle in handles {
        let (worker, response) = handle.await?;
        match response? {
            TaskResponse::Train { loss } => losses.push(loss),
            other => anyhow::bail!("unexpected response {other:?}"),
        }
        workers.push(worker);
    }
    Ok((workers, losses))
}

#[tokio::test]
async fn test_cohort_trains_and_converges() -> Result<()> {
    runtime_core::telemetry::init_tracing("trainer=debug,tensor_store=info");

    let dir = tempfile::tempdir()?;
    let store: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(dir.path()));
    let (endpoint, coordinator) = start_coordinator(store.clone()).await?;
    let config = config(dir.path(), &endpoint)?;

    // ranges of 5, 4 and 4 subsets still step through the same 2 rounds
    let lengths: Vec<u64> = (0..WORKERS)
        .map(|worker| WorkerPlan::derive(SUBSETS, WORKERS, worker, 2, 2, ITEMS_PER_SUBSET))
        .map(|plan| -> Result<u64> {
            let plan = plan?;
            assert_eq!(plan.rounds, 2);
            assert_eq!(plan.barrier_signals(), 1);
            Ok(plan.assigned.len())
        })
        .collect::<Result<_>>()?;
    assert_eq!(lengths, vec![5, 4, 4]);

    let mut workers = cohort(&config)?;
    let layers = workers[0].handle(&request("init", 0, 0)).await?;
    assert_eq!(
        layers,
        TaskResponse::Layers(vec!["linear.weight".into(), "linear.bias".into()])
    );

    let mut epoch_losses = Vec::new();
    for epoch in 0..6 {
        let (next, losses) = run_epoch(workers, epoch).await?;
        workers = next;

        // the coordinator merges the final interval once every invocation returned
        coordinator.merge("sim").await?;
        epoch_losses.push(losses.iter().sum::<f64>() / losses.len() as f64);
    }

    assert_eq!(coordinator.merges.lock().await.get("sim"), Some(&12));
    assert!(
        epoch_losses[5] < epoch_losses[0],
        "loss did not decrease: {epoch_losses:?}"
    );

    // every worker left its contribution and optimizer state behind
    let client = TensorStoreClient::connect(store.clone()).await?;
    for worker in 0..WORKERS {
        assert!(client.get_blob("sim", worker).await?.is_some());
        client
            .load_worker_snapshot("sim", &coordinator.layers, worker)
            .await?;
    }
    let canonical = client.load_canonical("sim", &coordinator.layers).await?;
    let w = canonical.get("linear.weight").unwrap().data()[0];
    assert!(w > 0.0, "weight never moved: {w}");

    // validation and inference read the averaged model
    match workers[1].handle(&request("validate", 1, 6)).await? {
        TaskResponse::Validate { length, loss, .. } => {
            assert_eq!(length, 8);
            assert!(loss.is_finite());
        }
        other => anyhow::bail!("unexpected response {other:?}"),
    }

    let mut infer = request("infer", 0, 6);
    infer.payload = Some(json!([0.0, 0.5]));
    match workers[0].handle(&infer).await? {
        TaskResponse::Infer { predictions } => {
            assert_eq!(predictions.as_array().map(Vec::len), Some(2));
        }
        other => anyhow::bail!("unexpected response {other:?}"),
    }

    Ok(())
}

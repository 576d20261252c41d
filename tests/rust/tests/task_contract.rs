//! Shell-facing task contract against a real local store

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Linear, Ramp};
use runtime_core::config::StoreBackend;
use runtime_core::WorkerConfig;
use serde_json::{json, Value};
use storage::LocalStorage;
use tensor_store::TensorStoreClient;
use trainer::{Model, Worker};

fn worker_config(store: &std::path::Path, barrier_port: u16) -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.store.backend = StoreBackend::Local;
    config.store.base_path = store.to_string_lossy().to_string();
    config.barrier.endpoint_template =
        format!("http://127.0.0.1:{}/job/{{job_id}}/next/{{worker}}", barrier_port);
    config.partition.items_per_subset = 2;
    config
}

fn body(task: &str, extra: Value) -> String {
    let mut request = json!({
        "task": task,
        "job_id": "contract",
        "worker_index": 0,
        "worker_count": 2,
        "batch_size": 2,
        "sync_frequency": 2,
    });
    if let (Some(fields), Some(extra)) = (request.as_object_mut(), extra.as_object()) {
        fields.extend(extra.clone());
    }
    request.to_string()
}

#[tokio::test]
async fn test_barrier_fault_maps_to_bad_gateway() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let port = portpicker::pick_unused_port().expect("No ports free");
    let dataset = Ramp {
        train: 8,
        validation: 4,
    };
    let mut worker = Worker::from_config(Linear::default(), dataset, worker_config(dir.path(), port))?;

    let (status, reply) = worker.handle_json(&body("init", json!({}))).await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!(["linear.weight", "linear.bias"]));

    // nobody listens on the barrier port, so the first interval cannot be acknowledged
    let (status, reply) = worker
        .handle_json(&body("train", json!({"worker_index": 1})))
        .await;
    assert_eq!(status, 502);
    assert_eq!(reply["kind"], "BarrierFault");
    assert_eq!(reply["status"], 502);

    // the first interval's contribution was persisted before the barrier
    let client = TensorStoreClient::connect(Arc::new(LocalStorage::new(dir.path()))).await?;
    let layers = Linear::default().layer_names();
    client.load_worker_snapshot("contract", &layers, 1).await?;
    assert!(client.get_blob("contract", 1).await?.is_some());
    assert!(client.get_blob("contract", 0).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_request_errors_are_client_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let port = portpicker::pick_unused_port().expect("No ports free");
    let dataset = Ramp {
        train: 8,
        validation: 4,
    };
    let mut worker = Worker::from_config(Linear::default(), dataset, worker_config(dir.path(), port))?;

    let (status, reply) = worker.handle_json(&body("fit", json!({}))).await;
    assert_eq!(status, 400);
    assert_eq!(reply["kind"], "UnrecognizedTask");

    let (status, reply) = worker
        .handle_json(&body("train", json!({"worker_index": 2})))
        .await;
    assert_eq!(status, 400);
    assert_eq!(reply["kind"], "InvalidConfig");

    let (status, reply) = worker
        .handle_json(&body("infer", json!({"payload": null})))
        .await;
    assert_eq!(status, 400);
    assert_eq!(reply["kind"], "MalformedRequest");

    // nothing above reached the store
    let client = TensorStoreClient::connect(Arc::new(LocalStorage::new(dir.path()))).await?;
    assert!(client.canonical_layers("contract").await?.is_empty());

    // a payload the model cannot read is a hook failure
    worker.handle_json(&body("init", json!({}))).await;
    let (status, reply) = worker
        .handle_json(&body("infer", json!({"payload": ["not a number"]})))
        .await;
    assert_eq!(status, 500);
    assert_eq!(reply["kind"], "Hook");

    let (status, reply) = worker
        .handle_json(&body("infer", json!({"payload": [0.0, 1.0]})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!({"predictions": [0.0, 0.0]}));

    assert_eq!(client.purge_job("contract").await?, 2);
    Ok(())
}

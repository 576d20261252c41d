//! Linear regression model and ramp dataset shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use data_shard::SubsetRange;
use runtime_core::{Error, InvocationConfig, LayerName, ModelSnapshot, Result, Tensor};
use serde::{Deserialize, Serialize};
use trainer::{Dataset, InferOutput, Model, ModelOptimizer};

pub const ITEMS_PER_SUBSET: u64 = 2;

/// Target function the cohort learns
pub fn target(x: f32) -> f32 {
    3.0 * x + 1.0
}

/// SGD with momentum; the velocity is the state that survives invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Momentum {
    pub learning_rate: f32,
    pub beta: f32,
    pub velocity: [f32; 2],
}

impl ModelOptimizer for Momentum {
    type State = Momentum;

    fn state(&self) -> Momentum {
        self.clone()
    }

    fn load_state(&mut self, state: Momentum) -> Result<()> {
        *self = state;
        Ok(())
    }
}

/// `y = w * x + b`
#[derive(Debug, Default)]
pub struct Linear {
    pub w: f32,
    pub b: f32,
}

impl Linear {
    fn predict(&self, x: f32) -> f32 {
        self.w * x + self.b
    }

    fn mse(&self, batch: &[(f32, f32)]) -> f64 {
        let sum: f32 = batch.iter().map(|(x, y)| (self.predict(*x) - y).powi(2)).sum();
        (sum / batch.len() as f32) as f64
    }
}

impl Model for Linear {
    type Item = (f32, f32);
    type Optimizer = Momentum;

    fn layer_names(&self) -> Vec<LayerName> {
        vec!["linear.weight".to_string(), "linear.bias".to_string()]
    }

    fn snapshot(&self) -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::new();
        snapshot.insert("linear.weight", Tensor::scalar(self.w));
        snapshot.insert("linear.bias", Tensor::scalar(self.b));
        snapshot
    }

    fn load_snapshot(&mut self, snapshot: &ModelSnapshot) -> Result<()> {
        let read = |name: &str| {
            snapshot
                .get(name)
                .and_then(|t| t.data().first().copied())
                .ok_or_else(|| Error::hook("load_snapshot", format!("{} missing", name)))
        };
        self.w = read("linear.weight")?;
        self.b = read("linear.bias")?;
        Ok(())
    }

    fn configure_optimizer(&self, invocation: &InvocationConfig) -> Result<Momentum> {
        Ok(Momentum {
            learning_rate: invocation.learning_rate as f32,
            beta: 0.5,
            velocity: [0.0; 2],
        })
    }

    fn initialize_weights(&mut self) -> Result<()> {
        self.w = 0.0;
        self.b = 0.0;
        Ok(())
    }

    fn train_step(
        &mut self,
        optimizer: &mut Momentum,
        batch: &[(f32, f32)],
        _batch_index: usize,
    ) -> Result<f64> {
        let loss = self.mse(batch);
        let n = batch.len() as f32;
        let (mut gw, mut gb) = (0.0, 0.0);
        for (x, y) in batch {
            let err = self.predict(*x) - y;
            gw += 2.0 * err * x / n;
            gb += 2.0 * err / n;
        }

        let v = &mut optimizer.velocity;
        v[0] = optimizer.beta * v[0] + gw;
        v[1] = optimizer.beta * v[1] + gb;
        self.w -= optimizer.learning_rate * v[0];
        self.b -= optimizer.learning_rate * v[1];
        Ok(loss)
    }

    fn validate_step(&mut self, batch: &[(f32, f32)], _batch_index: usize) -> Result<(f64, f64)> {
        let close = batch
            .iter()
            .filter(|(x, y)| (self.predict(*x) - y).abs() < 0.5)
            .count();
        let accuracy = 100.0 * close as f64 / batch.len() as f64;
        Ok((accuracy, self.mse(batch)))
    }

    fn infer_step(&mut self, data: &serde_json::Value) -> Result<InferOutput> {
        let xs: Vec<f64> = serde_json::from_value(data.clone())
            .map_err(|e| Error::hook("infer_step", e))?;
        Ok(InferOutput::List(
            xs.into_iter().map(|x| self.predict(x as f32) as f64).collect(),
        ))
    }
}

/// Points on the target line; subset `s` holds items `s * 2` and `s * 2 + 1`
#[derive(Debug, Clone)]
pub struct Ramp {
    pub train: u64,
    pub validation: u64,
}

impl Ramp {
    fn items(&self, range: SubsetRange) -> Vec<(f32, f32)> {
        let scale = (self.train.max(1) * ITEMS_PER_SUBSET) as f32;
        (range.start * ITEMS_PER_SUBSET..range.stop * ITEMS_PER_SUBSET)
            .map(|i| {
                let x = i as f32 / scale;
                (x, target(x))
            })
            .collect()
    }
}

#[async_trait]
impl Dataset for Ramp {
    type Item = (f32, f32);

    fn train_subsets(&self) -> u64 {
        self.train
    }

    fn validation_subsets(&self) -> u64 {
        self.validation
    }

    async fn load_train(&self, range: SubsetRange) -> Result<Vec<(f32, f32)>> {
        Ok(self.items(range))
    }

    async fn load_validation(&self, range: SubsetRange) -> Result<Vec<(f32, f32)>> {
        Ok(self.items(range))
    }
}

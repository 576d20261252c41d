//! Core type definitions for the training worker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Unique identifier types
pub type JobId = String;
pub type WorkerIndex = u32;
pub type LayerName = String;

/// Dataset subset index (a contiguous slice of the document index space)
pub type SubsetIndex = u64;

/// Training epoch counter
pub type Epoch = u64;

/// Task a worker invocation performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Initialize the weights and publish the first canonical snapshot
    Init,

    /// Train on the worker's share of the epoch
    Train,

    /// Evaluate the canonical snapshot on the worker's validation share
    #[serde(alias = "val")]
    Validate,

    /// Run a forward pass on request data
    Infer,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Init => "init",
            TaskKind::Train => "train",
            TaskKind::Validate => "val",
            TaskKind::Infer => "infer",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(TaskKind::Init),
            "train" => Ok(TaskKind::Train),
            "val" | "validate" => Ok(TaskKind::Validate),
            "infer" => Ok(TaskKind::Infer),
            other => Err(Error::UnrecognizedTask {
                task: other.to_string(),
            }),
        }
    }
}

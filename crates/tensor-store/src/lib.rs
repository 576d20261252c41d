//! Tensor store client
//!
//! Typed access to the shared key/value store that carries all state between
//! worker invocations:
//!
//! | Key                        | Value                          |
//! |----------------------------|--------------------------------|
//! | `{job}:{layer}`            | canonical (averaged) tensor    |
//! | `{job}:{layer}/{worker}`   | worker-local tensor            |
//! | `{job}:optimizer:{worker}` | opaque optimizer state blob    |
//!
//! A [`TensorStoreClient`] holds a connection lease on its backend for the
//! duration of one invocation and returns it when dropped.

pub mod client;
pub mod keys;

pub use client::{SnapshotScope, TensorStoreClient};

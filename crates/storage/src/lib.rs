//! Storage - Pluggable key/value backends for the shared tensor store
//!
//! Keys are flat strings such as `job-1:fc1.weight/3`; values are opaque
//! bytes. Two backends are provided:
//! - Local (or network-mounted) filesystem with atomic writes
//! - In-process memory, for cohorts simulated inside one process
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/mnt/tensor-store");
//! storage.acquire().await?;
//! storage.write("job-1:fc1.weight", Bytes::from(vec![1, 2, 3])).await?;
//! let data = storage.read("job-1:fc1.weight").await?;
//! assert!(data.is_some());
//! storage.release();
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;
mod memory;

pub use backend::StorageBackend;
pub use local::LocalStorage;
pub use memory::MemoryStorage;

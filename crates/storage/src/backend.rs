//! Storage backend trait definition
//!
//! Defines the async interface that all storage backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::Result;

/// Async trait for key/value storage backends
///
/// A missing key is never an error: reads return `Ok(None)` and only genuine
/// faults (I/O, connectivity) surface as `Error::StorageFault`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Acquire a connection lease for one worker invocation
    ///
    /// Called once before any other operation of the invocation. Fails with a
    /// storage fault if the backend is unreachable.
    async fn acquire(&self) -> Result<()> {
        Ok(())
    }

    /// Release a lease taken by [`StorageBackend::acquire`]
    ///
    /// Synchronous so that it can run from `Drop` on every exit path.
    fn release(&self) {}

    /// Read the value stored under `key`, or `None` if absent
    async fn read(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write `data` under `key`, replacing any previous value
    ///
    /// Returns the number of bytes written. A reader never observes a
    /// partially written value.
    async fn write(&self, key: &str, data: Bytes) -> Result<u64>;

    /// Delete `key`; returns whether a value was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List all keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

//! In-process memory backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use runtime_core::Result;
use tracing::trace;

use crate::StorageBackend;

/// Memory backend shared by every clone
///
/// Clones see the same keys, which lets a test or a single-process
/// simulation hand one store to a whole cohort.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Bytes>>,
    leases: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leases currently held
    pub fn open_leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn acquire(&self) -> Result<()> {
        self.leases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        // never underflow on an unbalanced release
        let _ = self
            .leases
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;
        trace!(key, size, "memory write");
        self.entries.insert(key.to_string(), data);
        Ok(size)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_entries() {
        let a = MemoryStorage::new();
        let b = a.clone();

        a.write("job:w", Bytes::from_static(b"xyz")).await.unwrap();
        assert_eq!(b.read("job:w").await.unwrap(), Some(Bytes::from_static(b"xyz")));
        assert_eq!(b.list("job:").await.unwrap(), vec!["job:w"]);
        assert!(b.delete("job:w").await.unwrap());
        assert!(a.is_empty());
    }

    #[tokio::test]
    async fn test_lease_counting() {
        let storage = MemoryStorage::new();
        storage.acquire().await.unwrap();
        storage.acquire().await.unwrap();
        assert_eq!(storage.open_leases(), 2);

        storage.release();
        storage.release();
        storage.release();
        assert_eq!(storage.open_leases(), 0);
    }
}

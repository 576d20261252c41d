//! Local filesystem storage backend
//!
//! Each key is one file directly under the base directory. Key characters
//! that have meaning to the filesystem are percent-escaped, so
//! `job:fc1.weight` and `job:fc1.weight/0` can live side by side.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::StorageBackend;

/// Local filesystem storage backend
///
/// Suitable for a shared volume mounted into every worker. Writes go to a
/// hidden temp file which is then renamed over the target.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Directory holding one file per key
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(escape_key(key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!(".{}.{}.tmp", escape_key(key), Uuid::new_v4()))
    }
}

/// Map a key to a single path component
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, c) in key.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_key`]; `None` for names this backend never writes
fn unescape_key(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            let byte = u8::from_str_radix(&hex, 16).ok()?;
            out.push(byte as char);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn fault(action: &str, key: &str, e: std::io::Error) -> Error {
    Error::storage(format!("Failed to {} {}: {}", action, key, e))
}

/// Write and sync `data` to `temp_path`, then rename it over `path`
///
/// The error carries the step that failed.
async fn stage_and_publish(
    temp_path: &Path,
    path: &Path,
    data: &[u8],
) -> std::result::Result<(), (&'static str, std::io::Error)> {
    let mut file = fs::File::create(temp_path)
        .await
        .map_err(|e| ("create temp file for", e))?;
    file.write_all(data).await.map_err(|e| ("write", e))?;
    file.sync_all().await.map_err(|e| ("sync", e))?;
    drop(file);

    fs::rename(temp_path, path).await.map_err(|e| ("publish", e))
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn acquire(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            Error::storage(format!(
                "Store directory {:?} is not available: {}",
                self.base_path, e
            ))
        })
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.key_path(key);
        debug!(?path, "Reading key");

        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(fault("read", key, e)),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let path = self.key_path(key);
        let temp_path = self.temp_path(key);
        let size = data.len() as u64;

        if let Err((action, e)) = stage_and_publish(&temp_path, &path, &data).await {
            // a partial temp file must never outlive a failed write
            let _ = fs::remove_file(&temp_path).await;
            return Err(fault(action, key, e));
        }

        debug!(?path, size, "Key written");
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(fault("delete", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.key_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(fault("stat", key, e)),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(fault("list", prefix, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fault("list", prefix, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            // in-flight temp files
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = unescape_key(&name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        debug!(count = keys.len(), "Listed keys");
        Ok(keys)
    }
}

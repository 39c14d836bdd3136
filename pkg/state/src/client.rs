use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::StoreError;

/// Persistent state store backed by SlateDB on a local filesystem.
/// In production this would use S3/R2/MinIO via the `object_store` crate.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self { db })
    }

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e))
            .map(|_| ())
    }

    /// Store a value only if the key is free; fails with `StoreError::AlreadyExists` otherwise.
    ///
    /// The check and the write are not atomic. A single controller owns the
    /// keys it creates, so the window only matters for external writers.
    pub async fn create(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        if self.get(key).await?.is_some() {
            return Err(StoreError::AlreadyExists(key.to_string()).into());
        }
        self.put(key, value).await
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e)),
        }
    }

    /// Delete a key; fails with `StoreError::NotFound` if it is absent.
    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        if self.get(key).await?.is_none() {
            return Err(StoreError::NotFound(key.to_string()).into());
        }
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB delete failed: {}", e))
            .map(|_| ())
    }

    /// List all key-value pairs whose keys start with `prefix`.
    /// Returns them as `(key_string, raw_bytes)`.
    pub async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Read and decode a JSON object. Decoding failures are errors, not misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decoding {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Read a JSON object that must exist.
    pub async fn must_get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        self.get_json(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()).into())
    }

    /// Encode and store a JSON object.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(value)?;
        self.put(key, &data).await
    }

    /// Encode and store a JSON object under a free key.
    pub async fn create_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(value)?;
        self.create(key, &data).await
    }

    /// Decode every object under `prefix`. Any undecodable entry fails the whole listing.
    pub async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<(String, T)>> {
        self.list_prefix(prefix)
            .await?
            .into_iter()
            .map(|(key, bytes)| {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decoding {}", key))?;
                Ok((key, value))
            })
            .collect()
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}

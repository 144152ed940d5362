//! Durable blob storage for availability snapshots.
//!
//! Every request id owns two keys:
//!
//! ```text
//! {req_id}_availability.json        # baseline: last promoted snapshot
//! temp_{req_id}_availability.json   # staging: pending downstream success
//! ```
//!
//! Promotion replaces the baseline with the staged blob in one step.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::scan_types::{ScanError, Snapshot};

/// Key of the promoted snapshot for a request
pub fn baseline_key(req_id: &str) -> String {
    format!("{}_availability.json", req_id)
}

/// Key of the staged snapshot for a request
pub fn staging_key(req_id: &str) -> String {
    format!("temp_{}_availability.json", req_id)
}

/// Trait for snapshot storage backends
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read a blob, returning an empty vector if the key does not exist
    async fn get(&self, key: &str) -> Result<Vec<u8>, ScanError>;

    /// Write a blob
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ScanError>;

    /// Atomically replace the baseline of `req_id` with its staged blob
    async fn promote(&self, req_id: &str) -> Result<(), ScanError>;
}

/// Load the promoted snapshot for a request; a missing baseline is an empty snapshot
pub async fn load_baseline(store: &dyn SnapshotStore, req_id: &str) -> Result<Snapshot, ScanError> {
    let bytes = store.get(&baseline_key(req_id)).await?;
    Snapshot::from_bytes(&bytes)
}

/// Write a snapshot to the staging key of a request
pub async fn stage(
    store: &dyn SnapshotStore,
    req_id: &str,
    snapshot: &Snapshot,
) -> Result<(), ScanError> {
    store.put(&staging_key(req_id), &snapshot.to_bytes()?).await
}

/// Local filesystem snapshot storage
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    root_dir: PathBuf,
}

impl LocalSnapshotStore {
    /// Create a store rooted at the given directory
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, ScanError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ScanError> {
        tokio::fs::create_dir_all(&self.root_dir).await?;

        // Write through a sibling file so readers never observe a torn blob
        let path = self.path(key);
        let tmp = path.with_extension("json.part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn promote(&self, req_id: &str) -> Result<(), ScanError> {
        let staged = self.path(&staging_key(req_id));
        let baseline = self.path(&baseline_key(req_id));

        tokio::fs::rename(&staged, &baseline).await.map_err(|e| {
            ScanError::Persistence(format!("Failed to promote snapshot for {}: {}", req_id, e))
        })
    }
}

/// In-memory snapshot store for testing
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fail_on_put: Arc<RwLock<bool>>,
}

impl InMemorySnapshotStore {
    /// Creates a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail every subsequent put
    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    /// Returns true if a blob exists under the key
    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, ScanError> {
        Ok(self.blobs.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ScanError> {
        if *self.fail_on_put.read().await {
            return Err(ScanError::Persistence(format!("Injected failure writing {}", key)));
        }
        self.blobs
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn promote(&self, req_id: &str) -> Result<(), ScanError> {
        let mut blobs = self.blobs.write().await;
        let staged = blobs.remove(&staging_key(req_id)).ok_or_else(|| {
            ScanError::Persistence(format!("No staged snapshot for {}", req_id))
        })?;
        blobs.insert(baseline_key(req_id), staged);
        Ok(())
    }
}

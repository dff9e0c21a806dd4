//! Content-addressed block storage.
//!
//! A block's address is the BLAKE3 hash of its serialized envelope, so
//! storing the same bytes twice is a no-op and a fetched object can always be
//! checked against the hash it was requested by.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use skein_shared::types::BlockHash;

use crate::error::{Result, ThreadError};

/// Put/get interface over whatever holds block bytes.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Persist `data` and return its content hash. Must not report success
    /// before the bytes are retrievable.
    async fn store(&self, data: &[u8]) -> Result<BlockHash>;

    /// Bytes previously stored under `hash`.
    async fn fetch(&self, hash: &BlockHash) -> Result<Vec<u8>>;

    async fn has(&self, hash: &BlockHash) -> Result<bool>;
}

fn check_size(data: &[u8], max_size: usize) -> Result<()> {
    if data.is_empty() {
        return Err(ThreadError::Storage("Empty object".to_string()));
    }
    if data.len() > max_size {
        return Err(ThreadError::Storage(format!(
            "Object too large: {} bytes (max {})",
            data.len(),
            max_size
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store. Shared between in-process nodes it stands in for a
/// network-wide content store.
#[derive(Debug)]
pub struct MemoryBlockStore {
    objects: RwLock<HashMap<BlockHash, Vec<u8>>>,
    max_size: usize,
}

impl MemoryBlockStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new(skein_shared::constants::MAX_PIN_SIZE)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn store(&self, data: &[u8]) -> Result<BlockHash> {
        check_size(data, self.max_size)?;
        let hash = BlockHash::of(data);
        let mut objects = self
            .objects
            .write()
            .map_err(|_| ThreadError::Storage("Store lock poisoned".to_string()))?;
        objects.entry(hash).or_insert_with(|| data.to_vec());
        Ok(hash)
    }

    async fn fetch(&self, hash: &BlockHash) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| ThreadError::Storage("Store lock poisoned".to_string()))?;
        objects.get(hash).cloned().ok_or(ThreadError::NotFound(*hash))
    }

    async fn has(&self, hash: &BlockHash) -> Result<bool> {
        let objects = self
            .objects
            .read()
            .map_err(|_| ThreadError::Storage("Store lock poisoned".to_string()))?;
        Ok(objects.contains_key(hash))
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// One file per object, named by its hex hash.
#[derive(Debug, Clone)]
pub struct FsBlockStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FsBlockStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ThreadError::Storage(format!(
                "Failed to create block directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Block store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn object_path(&self, hash: &BlockHash) -> PathBuf {
        self.base_path.join(hash.to_hex())
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn store(&self, data: &[u8]) -> Result<BlockHash> {
        check_size(data, self.max_size)?;

        let hash = BlockHash::of(data);
        let path = self.object_path(&hash);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(hash);
        }

        // Write-then-rename so a crash never leaves a truncated object behind.
        let tmp = self.base_path.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, data)
            .await
            .map_err(|e| ThreadError::Storage(format!("Failed to write {}: {}", hash, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ThreadError::Storage(format!("Failed to commit {}: {}", hash, e)))?;

        debug!(hash = %hash.short(), size = data.len(), "Stored object");
        Ok(hash)
    }

    async fn fetch(&self, hash: &BlockHash) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ThreadError::NotFound(*hash)),
            Err(e) => Err(ThreadError::Storage(format!(
                "Failed to read {}: {}",
                hash, e
            ))),
        }
    }

    async fn has(&self, hash: &BlockHash) -> Result<bool> {
        fs::try_exists(self.object_path(hash))
            .await
            .map_err(|e| ThreadError::Storage(format!("Failed to stat {}: {}", hash, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn fs_store() -> (FsBlockStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FsBlockStore::new(dir.path().join("blocks"), 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_fs_store_and_fetch() {
        let (store, _dir) = fs_store().await;

        let hash = store.store(b"encrypted-block").await.unwrap();
        assert_eq!(hash, BlockHash::of(b"encrypted-block"));
        assert!(store.has(&hash).await.unwrap());
        assert_eq!(store.fetch(&hash).await.unwrap(), b"encrypted-block");
    }

    #[tokio::test]
    async fn test_fs_store_is_idempotent() {
        let (store, _dir) = fs_store().await;

        let a = store.store(b"same").await.unwrap();
        let b = store.store(b"same").await.unwrap();
        assert_eq!(a, b);

        let mut entries = fs::read_dir(store.base_path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_fs_not_found() {
        let (store, _dir) = fs_store().await;
        let missing = BlockHash::of(b"missing");
        assert!(!store.has(&missing).await.unwrap());
        assert!(matches!(
            store.fetch(&missing).await,
            Err(ThreadError::NotFound(h)) if h == missing
        ));
    }

    #[tokio::test]
    async fn test_size_limits() {
        let (store, _dir) = fs_store().await;
        assert!(store.store(b"").await.is_err());
        assert!(store.store(&[0u8; 2048]).await.is_err());

        let mem = MemoryBlockStore::new(4);
        assert!(mem.store(b"12345").await.is_err());
        assert!(mem.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlockStore::default();
        let hash = store.store(b"block").await.unwrap();
        store.store(b"block").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch(&hash).await.unwrap(), b"block");
        assert!(store.fetch(&BlockHash::of(b"other")).await.is_err());
    }
}

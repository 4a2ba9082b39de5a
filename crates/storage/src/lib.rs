use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Storage trait for named record persistence.
///
/// A record is an opaque byte blob addressed by a short store name
/// (`users`, `inbox`, `friends`). Callers own the encoding.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self, store: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, store: &str, data: &[u8]) -> Result<()>;
}

/// Local filesystem-based storage implementation: one `<store>.json` file
/// per record inside the data directory.
#[derive(Clone)]
pub struct LocalStorage {
    records_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .context("Failed to create records directory")?;

        Ok(Self { records_dir: base_dir })
    }

    fn record_path(&self, store: &str) -> Result<PathBuf> {
        let valid = !store.is_empty()
            && store
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!("Invalid store name: {:?}", store);
        }
        Ok(self.records_dir.join(format!("{}.json", store)))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn load(&self, store: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(store)?;

        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path).await
            .with_context(|| format!("Failed to read record {}", store))?;

        tracing::debug!("Loaded record {} ({} bytes)", store, data.len());
        Ok(Some(data))
    }

    async fn save(&self, store: &str, data: &[u8]) -> Result<()> {
        let path = self.record_path(store)?;
        let tmp_path = path.with_extension("json.tmp");

        // Write to a sibling temp file, flush, then swap it in
        let mut file = fs::File::create(&tmp_path).await
            .with_context(|| format!("Failed to create temp file for record {}", store))?;
        file.write_all(data).await
            .with_context(|| format!("Failed to write record {}", store))?;
        file.sync_all().await
            .with_context(|| format!("Failed to flush record {}", store))?;
        drop(file);

        fs::rename(&tmp_path, &path).await
            .with_context(|| format!("Failed to replace record {}", store))?;

        tracing::debug!("Saved record {} ({} bytes)", store, data.len());
        Ok(())
    }
}

/// Volatile storage kept entirely in memory. Useful for tests and for
/// running a throwaway service.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self, store: &str) -> Result<Option<Vec<u8>>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))?;
        Ok(records.get(store).cloned())
    }

    async fn save(&self, store: &str, data: &[u8]) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))?;
        records.insert(store.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_storage_roundtrip() -> Result<()> {
        let temp = TempDir::new()?;
        let storage = LocalStorage::new(temp.path().to_path_buf())?;

        storage.save("inbox", b"{\"a\":1}").await?;
        let retrieved = storage.load("inbox").await?;
        assert_eq!(retrieved, Some(b"{\"a\":1}".to_vec()));

        let missing = storage.load("friends").await?;
        assert_eq!(missing, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_previous_record() -> Result<()> {
        let temp = TempDir::new()?;
        let storage = LocalStorage::new(temp.path().to_path_buf())?;

        storage.save("users", b"first").await?;
        storage.save("users", b"second").await?;

        assert_eq!(storage.load("users").await?, Some(b"second".to_vec()));
        assert!(!temp.path().join("users.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_records_survive_reopen() -> Result<()> {
        let temp = TempDir::new()?;
        LocalStorage::new(temp.path().to_path_buf())?
            .save("friends", b"{}")
            .await?;

        let reopened = LocalStorage::new(temp.path().to_path_buf())?;
        assert_eq!(reopened.load("friends").await?, Some(b"{}".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_path_like_store_names() -> Result<()> {
        let temp = TempDir::new()?;
        let storage = LocalStorage::new(temp.path().to_path_buf())?;

        assert!(storage.save("../escape", b"x").await.is_err());
        assert!(storage.load("").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage() -> Result<()> {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load("inbox").await?, None);
        storage.save("inbox", b"[]").await?;
        assert_eq!(storage.load("inbox").await?, Some(b"[]".to_vec()));
        Ok(())
    }
}

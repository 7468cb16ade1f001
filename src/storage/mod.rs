//! Key-value persistence substrate
//!
//! Two storage tiers are exposed as asynchronous key -> JSON-value maps:
//! a small-quota `sync` tier for configuration and secrets, and a
//! larger-quota `local` tier for conversation history. Both are backed by
//! one sled tree each; an in-memory tier is provided for tests.

use crate::error::{Result, TabmateError};
use async_trait::async_trait;
use directories::ProjectDirs;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod crypto;
pub use crypto::{EncryptedSecret, SecretBox, SecretStore};

/// Asynchronous namespaced key -> JSON value map with quota accounting
#[async_trait]
pub trait KeyValueTier: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store `value` under `key`, overwriting any previous value
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key in this tier
    async fn clear(&self) -> Result<()>;

    /// Approximate bytes currently in use, for quota bookkeeping
    async fn bytes_in_use(&self) -> Result<u64>;
}

/// Sled-backed storage tier (one tree per tier)
pub struct SledTier {
    tree: sled::Tree,
}

impl SledTier {
    fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }
}

#[async_trait]
impl KeyValueTier for SledTier {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self
            .tree
            .get(key.as_bytes())
            .map_err(|e| TabmateError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| TabmateError::Storage(format!("Deserialization failed: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| TabmateError::Storage(format!("Serialization failed: {}", e)))?;
        self.tree
            .insert(key.as_bytes(), bytes)
            .map_err(|e| TabmateError::Storage(format!("Insert failed: {}", e)))?;
        self.tree
            .flush()
            .map_err(|e| TabmateError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key.as_bytes())
            .map_err(|e| TabmateError::Storage(format!("Remove failed: {}", e)))?;
        self.tree
            .flush()
            .map_err(|e| TabmateError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| TabmateError::Storage(format!("Clear failed: {}", e)))?;
        self.tree
            .flush()
            .map_err(|e| TabmateError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<u64> {
        let mut total: u64 = 0;
        for entry in self.tree.iter() {
            let (key, value) =
                entry.map_err(|e| TabmateError::Storage(format!("Iteration failed: {}", e)))?;
            total += (key.len() + value.len()) as u64;
        }
        Ok(total)
    }
}

/// In-memory storage tier for tests
#[derive(Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryTier {
    /// Create an empty in-memory tier
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<u64> {
        let entries = self.entries.read().await;
        let mut total: u64 = 0;
        for (key, value) in entries.iter() {
            total += key.len() as u64;
            total += serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(0);
        }
        Ok(total)
    }
}

/// The two storage tiers used by the rest of the library
#[derive(Clone)]
pub struct StorageAreas {
    /// Small-quota synchronized tier: configuration and secrets
    pub sync: Arc<dyn KeyValueTier>,
    /// Larger local-only tier: conversation history
    pub local: Arc<dyn KeyValueTier>,
}

impl StorageAreas {
    /// Open the default on-disk storage areas
    ///
    /// Uses the platform data directory, or the `TABMATE_DATA_DIR`
    /// environment variable when set (useful for tests and alternate
    /// profiles).
    ///
    /// # Errors
    ///
    /// Returns `TabmateError::Storage` if the data directory cannot be
    /// determined or the database cannot be opened.
    pub fn open() -> Result<Self> {
        if let Ok(override_dir) = std::env::var("TABMATE_DATA_DIR") {
            return Self::open_at(override_dir);
        }

        let proj_dirs = ProjectDirs::from("dev", "tabmate", "tabmate")
            .ok_or_else(|| TabmateError::Storage("Could not determine data directory".into()))?;
        Self::open_at(proj_dirs.data_dir())
    }

    /// Open on-disk storage areas rooted at the given directory
    pub fn open_at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| TabmateError::Storage(format!("Failed to create data directory: {}", e)))?;

        let db = sled::open(dir.join("kv.db"))
            .map_err(|e| TabmateError::Storage(format!("Failed to open database: {}", e)))?;
        let sync = db
            .open_tree("sync")
            .map_err(|e| TabmateError::Storage(format!("Failed to open sync tier: {}", e)))?;
        let local = db
            .open_tree("local")
            .map_err(|e| TabmateError::Storage(format!("Failed to open local tier: {}", e)))?;

        Ok(Self {
            sync: Arc::new(SledTier::new(sync)),
            local: Arc::new(SledTier::new(local)),
        })
    }

    /// In-memory storage areas for tests
    pub fn in_memory() -> Self {
        Self {
            sync: Arc::new(MemoryTier::new()),
            local: Arc::new(MemoryTier::new()),
        }
    }
}

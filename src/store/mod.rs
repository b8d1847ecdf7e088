//! Storage backend
//!
//! The persistence layer the contexts wrap. A backend opens a store in durable or
//! in-memory mode and can destroy a durable location. An open [`StoreHandle`] is
//! shared by every context of a group and can be wiped in place.

pub mod persistence;

pub use persistence::SledBackend;

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

/// Where a store keeps its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMode {
    /// Named on-disk location that survives reopening.
    Durable(PathBuf),
    /// Ephemeral store; nothing outlives the handle.
    InMemory,
}

impl StoreMode {
    pub fn describe(&self) -> String {
        match self {
            StoreMode::Durable(path) => path.display().to_string(),
            StoreMode::InMemory => "<in-memory>".to_string(),
        }
    }
}

/// Storage backend interface
pub trait StorageBackend: Send + Sync {
    /// Open a store in the given mode.
    fn open(&self, mode: &StoreMode) -> Result<StoreHandle, StorageError>;

    /// Destroy everything persisted at a durable location.
    ///
    /// A no-op for in-memory mode. Callers must release every handle first.
    fn wipe(&self, mode: &StoreMode) -> Result<(), StorageError>;
}

/// Open connection to a store, cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
    db: sled::Db,
    mode: StoreMode,
}

const ENTITY_PREFIX: &str = "entity:";

impl StoreHandle {
    pub(crate) fn new(db: sled::Db, mode: StoreMode) -> Self {
        Self { db, mode }
    }

    pub fn mode(&self) -> &StoreMode {
        &self.mode
    }

    pub fn put<T: Serialize>(&self, entity: &str, key: &str, value: &T) -> Result<(), StorageError> {
        let tree = self.entity_tree(entity)?;
        let bytes = bincode::serialize(value)
            .map_err(|e| StorageError::Encoding(format!("Failed to serialize record: {}", e)))?;
        tree.insert(key.as_bytes(), bytes).map_err(to_storage_io)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, entity: &str, key: &str) -> Result<Option<T>, StorageError> {
        let tree = self.entity_tree(entity)?;
        match tree.get(key.as_bytes()).map_err(to_storage_io)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes).map_err(|e| {
                    StorageError::Encoding(format!("Failed to deserialize record: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn remove(&self, entity: &str, key: &str) -> Result<bool, StorageError> {
        let tree = self.entity_tree(entity)?;
        Ok(tree.remove(key.as_bytes()).map_err(to_storage_io)?.is_some())
    }

    pub fn count(&self, entity: &str) -> Result<usize, StorageError> {
        Ok(self.entity_tree(entity)?.len())
    }

    pub fn keys(&self, entity: &str) -> Result<Vec<String>, StorageError> {
        let tree = self.entity_tree(entity)?;
        let mut keys = Vec::new();
        for key in tree.iter().keys() {
            let key = key.map_err(to_storage_io)?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    /// Persist pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    /// Wipe every record while keeping the connection open.
    pub fn clear(&self) -> Result<(), StorageError> {
        let wipe_err = |e: sled::Error| StorageError::Wipe {
            location: self.mode.describe(),
            message: e.to_string(),
        };
        for name in self.db.tree_names() {
            if name.starts_with(ENTITY_PREFIX.as_bytes()) {
                self.db.drop_tree(&name).map_err(wipe_err)?;
            }
        }
        self.db.clear().map_err(wipe_err)?;
        self.db.flush().map_err(wipe_err)?;
        Ok(())
    }

    fn entity_tree(&self, entity: &str) -> Result<sled::Tree, StorageError> {
        self.db
            .open_tree(format!("{}{}", ENTITY_PREFIX, entity))
            .map_err(to_storage_io)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").field("mode", &self.mode).finish()
    }
}

pub(crate) fn to_storage_io(e: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

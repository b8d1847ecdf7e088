//! Sled-backed storage backend

use crate::error::StorageError;
use crate::store::{StorageBackend, StoreHandle, StoreMode};
use std::fs;
use tracing::{debug, info};

/// Storage backend built on sled.
///
/// Durable stores live in a directory; in-memory stores are sled temporary
/// databases that are deleted when the last handle drops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SledBackend;

impl SledBackend {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for SledBackend {
    fn open(&self, mode: &StoreMode) -> Result<StoreHandle, StorageError> {
        let open_err = |message: String| StorageError::Open {
            location: mode.describe(),
            message,
        };

        let db = match mode {
            StoreMode::Durable(path) => {
                fs::create_dir_all(path).map_err(|e| {
                    open_err(format!("Failed to create store directory: {}", e))
                })?;
                sled::Config::new()
                    .path(path)
                    .open()
                    .map_err(|e| open_err(format!("Failed to open sled database: {}", e)))?
            }
            StoreMode::InMemory => sled::Config::new()
                .temporary(true)
                .open()
                .map_err(|e| open_err(format!("Failed to open temporary database: {}", e)))?,
        };

        debug!(location = %mode.describe(), "store opened");
        Ok(StoreHandle::new(db, mode.clone()))
    }

    fn wipe(&self, mode: &StoreMode) -> Result<(), StorageError> {
        let StoreMode::Durable(path) = mode else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        fs::remove_dir_all(path).map_err(|e| StorageError::Wipe {
            location: mode.describe(),
            message: e.to_string(),
        })?;
        info!(location = %path.display(), "durable store destroyed");
        Ok(())
    }
}

//! Per-context asset caches
//!
//! Each context role gets its own cache directory under a shared root. Blobs are
//! stored content-addressed by the blake3 hash of their key:
//! `{root}/{role}/{hex[0..2]}/{hex}.blob`.
//!
//! Caches are independent of the store: resetting contexts never touches them and
//! wiping them never touches stored records.

use crate::error::HarnessError;
use crate::types::ContextRole;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub struct CacheArea {
    root: PathBuf,
    dirs: Mutex<HashMap<ContextRole, PathBuf>>,
}

impl CacheArea {
    /// Create a cache area rooted at `root`. Nothing is created on disk until
    /// [`set_up`](Self::set_up) runs.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            dirs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Associated directory for `role`, if set up.
    pub fn dir(&self, role: ContextRole) -> Option<PathBuf> {
        self.dirs.lock().get(&role).cloned()
    }

    /// Create and associate the cache directory for every role. Idempotent.
    pub fn set_up(&self) -> Result<(), HarnessError> {
        for role in ContextRole::ALL {
            self.set_up_role(role)?;
        }
        Ok(())
    }

    /// Create and associate the cache directory for one role. Idempotent.
    pub fn set_up_role(&self, role: ContextRole) -> Result<PathBuf, HarnessError> {
        let dir = self.root.join(role.as_str());
        fs::create_dir_all(&dir).map_err(|source| HarnessError::Cache { role, source })?;
        self.dirs.lock().insert(role, dir.clone());
        debug!(role = %role, dir = %dir.display(), "cache set up");
        Ok(dir)
    }

    /// Remove every blob from every associated cache directory.
    pub fn wipe(&self) -> Result<(), HarnessError> {
        for role in ContextRole::ALL {
            self.wipe_role(role)?;
        }
        Ok(())
    }

    /// Remove every blob for one role. A no-op when the role has no cache.
    pub fn wipe_role(&self, role: ContextRole) -> Result<(), HarnessError> {
        let Some(dir) = self.dir(role) else {
            return Ok(());
        };
        if !dir.exists() {
            return Ok(());
        }
        let entries = fs::read_dir(&dir).map_err(|source| HarnessError::Cache { role, source })?;
        for entry in entries {
            let path = entry
                .map_err(|source| HarnessError::Cache { role, source })?
                .path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|source| HarnessError::Cache { role, source })?;
        }
        debug!(role = %role, "cache wiped");
        Ok(())
    }

    /// Store a blob under `key`, replacing any previous blob for that key.
    ///
    /// Writes to a temporary file and renames it into place.
    pub fn store_blob(&self, role: ContextRole, key: &str, bytes: &[u8]) -> Result<PathBuf, HarnessError> {
        let dir = self.dir(role).ok_or(HarnessError::CacheNotSetUp { role })?;
        let path = blob_path(&dir, key);
        let temp_path = path.with_extension("blob.tmp");
        let io_err = |source: std::io::Error| HarnessError::Cache { role, source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&temp_path, bytes).map_err(io_err)?;
        fs::rename(&temp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            HarnessError::Cache { role, source }
        })?;
        Ok(path)
    }

    /// Read the blob stored under `key`.
    pub fn read_blob(&self, role: ContextRole, key: &str) -> Result<Option<Vec<u8>>, HarnessError> {
        let Some(dir) = self.dir(role) else {
            return Ok(None);
        };
        let path = blob_path(&dir, key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|source| HarnessError::Cache { role, source })
    }

    /// Number of blob files currently stored for `role`.
    ///
    /// Zero when the role has no cache. A cache directory that cannot be walked is
    /// an error rather than an empty cache.
    pub fn blob_count(&self, role: ContextRole) -> Result<usize, HarnessError> {
        let Some(dir) = self.dir(role) else {
            return Ok(0);
        };
        let mut count = 0;
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| HarnessError::Cache {
                role,
                source: std::io::Error::from(e),
            })?;
            if entry.file_type().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn blob_path(dir: &Path, key: &str) -> PathBuf {
    let hex = blake3::hash(key.as_bytes()).to_hex().to_string();
    dir.join(&hex[0..2]).join(format!("{}.blob", hex))
}

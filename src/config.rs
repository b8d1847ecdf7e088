//! Configuration System
//!
//! Options a [`ContextGroup`](crate::fixture::ContextGroup) reads when it builds its
//! contexts. Values are layered with the `config` crate: defaults, then an optional
//! TOML file, then `CONTEXT_FIXTURE_*` environment variables.

use crate::error::HarnessError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge;
mod sources;

pub use sources::environment::ENV_PREFIX;

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Back contexts with an ephemeral store instead of a durable one
    #[serde(default = "default_true")]
    pub use_in_memory_store: bool,

    /// Use the OS keychain instead of the fake credential backend
    #[serde(default)]
    pub use_real_keychain: bool,

    /// Upper bound for drain and tear down waits (milliseconds)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Durable store location; a scratch directory is used when unset
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Cache root; a scratch directory is used when unset
    #[serde(default)]
    pub cache_root: Option<PathBuf>,

    /// Service name for the real keychain
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_keychain_service() -> String {
    "context-fixture".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            use_in_memory_store: default_true(),
            use_real_keychain: false,
            drain_timeout_ms: default_drain_timeout_ms(),
            store_path: None,
            cache_root: None,
            keychain_service: default_keychain_service(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.drain_timeout_ms == 0 {
            return Err(HarnessError::Config(
                "drain_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.keychain_service.trim().is_empty() {
            return Err(HarnessError::Config(
                "keychain_service cannot be empty".to_string(),
            ));
        }
        if let Some(path) = &self.store_path {
            if path.as_os_str().is_empty() {
                return Err(HarnessError::Config("store_path cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Loads [`HarnessConfig`] from layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults overridden by the environment.
    pub fn load() -> Result<HarnessConfig, HarnessError> {
        Self::build(None)
    }

    /// Load defaults, then `path`, then the environment.
    pub fn load_from_file(path: &Path) -> Result<HarnessConfig, HarnessError> {
        Self::build(Some(path))
    }

    fn build(path: Option<&Path>) -> Result<HarnessConfig, HarnessError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        if let Some(path) = path {
            builder = sources::file::add_to_builder(builder, path)?;
        }
        builder = sources::environment::add_to_builder(builder);

        let config: HarnessConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

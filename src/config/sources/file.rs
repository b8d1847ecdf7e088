//! Config file source: an explicit TOML file, when one is given.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::{File, FileFormat};
use std::path::Path;
use tracing::warn;

/// Add `path` to the builder if it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        warn!(config_path = %path.display(), "fixture config file not found, using defaults");
        return Ok(builder);
    }
    let source = path.to_str().ok_or_else(|| {
        ConfigError::Message(format!("Config path is not valid UTF-8: {}", path.display()))
    })?;
    Ok(builder.add_source(File::new(source, FileFormat::Toml).required(false)))
}

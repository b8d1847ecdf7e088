//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("use_in_memory_store", true)?
        .set_default("use_real_keychain", false)?
        .set_default("drain_timeout_ms", 5000)?
        .set_default("keychain_service", "context-fixture")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")
}

//! Environment source: CONTEXT_FIXTURE_<KEY>, nested keys joined by `__`
//! (for example CONTEXT_FIXTURE_LOGGING__LEVEL=debug).

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};

pub const ENV_PREFIX: &str = "CONTEXT_FIXTURE";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}

//! Environment overrides: PLACEMENT__<SECTION>__<KEY>, e.g.
//! `PLACEMENT__PLACEMENT__MAX_ALLOCATION_CANDIDATES=100`.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "PLACEMENT";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}

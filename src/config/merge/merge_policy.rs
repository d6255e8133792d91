//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("placement.randomize_allocation_candidates", false)?
        .set_default(
            "placement.allocation_candidates_generation_strategy",
            "depth-first",
        )?
        .set_default("placement.max_allocation_candidates", -1)?
        .set_default("storage.temporary", false)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")
}

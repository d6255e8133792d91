//! Global config file sources: /etc/placement/placement.toml, then
//! $XDG_CONFIG_HOME/placement/placement.toml or ~/.config/placement/placement.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::PathBuf;
use tracing::debug;

/// System-wide config file.
pub fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/placement/placement.toml")
}

/// Path to the per-user config file.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
    };
    Some(base.join("placement").join("placement.toml"))
}

/// Add the system and user config files to builder when they exist.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let candidates = std::iter::once(system_config_path()).chain(user_config_path());
    for path in candidates {
        if path.exists() {
            builder = builder.add_source(File::from(path).required(false));
        } else {
            debug!(config_path = %path.display(), "Config file not found, skipping");
        }
    }
    Ok(builder)
}

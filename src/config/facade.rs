//! Layered configuration loading.

use super::merge::builder_with_defaults;
use super::sources::{environment, explicit_file, global_file};
use super::PlacementConfig;
use config::ConfigError;
use std::path::{Path, PathBuf};

/// Loads [`PlacementConfig`] from defaults, config files and environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): defaults, system file, user file,
    /// environment.
    pub fn load() -> Result<PlacementConfig, ConfigError> {
        let builder = global_file::add_to_builder(builder_with_defaults()?)?;
        environment::add_to_builder(builder).build()?.try_deserialize()
    }

    /// As [`ConfigLoader::load`], with `path` layered above the global
    /// files. The file must exist.
    pub fn load_from_file(path: &Path) -> Result<PlacementConfig, ConfigError> {
        let builder = global_file::add_to_builder(builder_with_defaults()?)?;
        let builder = explicit_file::add_to_builder(builder, path)?;
        environment::add_to_builder(builder).build()?.try_deserialize()
    }

    /// Defaults only.
    pub fn default() -> PlacementConfig {
        PlacementConfig::default()
    }

    /// User-level config file location, if one can be determined.
    pub fn user_config_path() -> Option<PathBuf> {
        global_file::user_config_path()
    }
}

//! Configuration System
//!
//! Layered configuration for the placement core: merge-policy defaults, then
//! global config files, then an optional explicit file, then `PLACEMENT__`
//! environment overrides. Tests included.

use crate::candidates::{CandidateSettings, GenerationStrategy};
use crate::error::PlacementError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::environment::ENV_PREFIX;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Candidate resolver behaviour
    #[serde(default)]
    pub placement: PlacementOptions,

    /// Where the tables are persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[placement]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementOptions {
    /// Sample limited candidate lists randomly instead of truncating them.
    #[serde(default)]
    pub randomize_allocation_candidates: bool,

    #[serde(default)]
    pub allocation_candidates_generation_strategy: GenerationStrategy,

    /// Upper bound on generated candidates; -1 means unbounded.
    #[serde(default = "default_max_allocation_candidates")]
    pub max_allocation_candidates: i64,
}

fn default_max_allocation_candidates() -> i64 {
    -1
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            randomize_allocation_candidates: false,
            allocation_candidates_generation_strategy: GenerationStrategy::default(),
            max_allocation_candidates: default_max_allocation_candidates(),
        }
    }
}

impl PlacementOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_allocation_candidates == 0 || self.max_allocation_candidates < -1 {
            return Err(format!(
                "max_allocation_candidates must be -1 or at least 1, got {}",
                self.max_allocation_candidates
            ));
        }
        Ok(())
    }

    pub fn candidate_settings(&self) -> CandidateSettings {
        CandidateSettings {
            randomize: self.randomize_allocation_candidates,
            strategy: self.allocation_candidates_generation_strategy,
            max_candidates: usize::try_from(self.max_allocation_candidates).ok(),
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the sled database
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Use a throwaway database instead of `path`
    #[serde(default)]
    pub temporary: bool,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        match (&self.path, self.temporary) {
            (_, true) => Ok(()),
            (Some(path), false) if !path.as_os_str().is_empty() => Ok(()),
            _ => Err("Store path cannot be empty unless storage is temporary".to_string()),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Placement(String),
    Storage(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Placement(msg) => write!(f, "Placement: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl PlacementConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if let Err(e) = self.placement.validate() {
            errors.push(ValidationError::Placement(e));
        }
        if let Err(e) = self.storage.validate() {
            errors.push(ValidationError::Storage(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one error.
    pub fn validated(self) -> Result<Self, PlacementError> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PlacementError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(self)
    }

    /// Config for a throwaway store, mostly for tests.
    pub fn temporary() -> Self {
        Self {
            storage: StorageConfig {
                path: None,
                temporary: true,
            },
            ..Self::default()
        }
    }
}

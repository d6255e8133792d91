//! Error types for the placement store and resolver.

use thiserror::Error;
use uuid::Uuid;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Duplicate entry in {table}.{column}: {value}")]
    Duplicate {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("Row not found in {table}: {key}")]
    RowNotFound { table: &'static str, key: String },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::Duplicate { .. })
    }

    /// True when the duplicate was raised on the given column.
    pub fn is_duplicate_on(&self, wanted: &str) -> bool {
        matches!(self, StorageError::Duplicate { column, .. } if *column == wanted)
    }
}

pub(crate) fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

pub(crate) fn to_storage_data(err: bincode::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    ))
}

/// Outcome category the transport layer maps each error onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Internal,
}

/// Domain errors surfaced by every placement operation
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("No resource provider with uuid {0} found")]
    ProviderNotFound(Uuid),

    #[error("No consumer with uuid {0} found")]
    ConsumerNotFound(Uuid),

    #[error("No such resource class {0}")]
    ResourceClassNotFound(String),

    #[error("No such trait(s): {0}")]
    TraitNotFound(String),

    #[error("No aggregate with uuid {0} found")]
    AggregateNotFound(Uuid),

    #[error("No inventory of class {resource_class} found for resource provider {provider}")]
    InventoryNotFound {
        provider: Uuid,
        resource_class: String,
    },

    #[error("Another thread concurrently updated the data. Please retry your update")]
    ConcurrentUpdateDetected,

    #[error("consumer generation conflict for {consumer} - expected {expected:?} but got {actual:?}")]
    ConsumerGenerationConflict {
        consumer: Uuid,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Inventory for '{resource_class}' on resource provider '{provider}' in use")]
    InventoryInUse {
        provider: Uuid,
        resource_class: String,
    },

    #[error("Inventory for '{resource_class}' on resource provider '{provider}' invalid")]
    InvalidInventory {
        provider: Uuid,
        resource_class: String,
    },

    #[error("Invalid inventory for '{resource_class}': {reason}")]
    InvalidInventoryCapacity {
        resource_class: String,
        reason: String,
    },

    #[error(
        "Unable to create allocation for '{resource_class}' on resource provider '{provider}'. \
         The requested amount would exceed the capacity"
    )]
    InvalidAllocationCapacityExceeded {
        provider: Uuid,
        resource_class: String,
    },

    #[error(
        "Unable to allocate {amount} of '{resource_class}' on resource provider '{provider}': \
         the amount violates min_unit, max_unit or step_size"
    )]
    InvalidAllocationConstraintsViolated {
        provider: Uuid,
        resource_class: String,
        amount: i64,
    },

    #[error("Unable to {action} resource provider: {reason}")]
    ObjectActionError { action: &'static str, reason: String },

    #[error("Resource provider {0} has allocations")]
    ProviderInUse(Uuid),

    #[error("Unable to delete parent resource provider {0}: it has child resource providers")]
    CannotDeleteParentProvider(Uuid),

    #[error("Conflicting resource provider {0} already exists")]
    ProviderExists(String),

    #[error("Inventory for '{resource_class}' on resource provider '{provider}' already exists")]
    InventoryExists {
        provider: Uuid,
        resource_class: String,
    },

    #[error("Resource class {0} already exists")]
    ResourceClassExists(String),

    #[error("Trait {0} already exists")]
    TraitExists(String),

    #[error("Consumer {0} already exists")]
    ConsumerExists(Uuid),

    #[error("Project {0} already exists")]
    ProjectExists(String),

    #[error("User {0} already exists")]
    UserExists(String),

    #[error("Consumer type {0} already exists")]
    ConsumerTypeExists(String),

    #[error("Aggregate {0} already exists")]
    AggregateExists(Uuid),

    #[error("Unable to delete resource class {0}: inventory exists for it")]
    ResourceClassInUse(String),

    #[error("Unable to delete trait {0}: it is associated with resource providers")]
    TraitInUse(String),

    #[error("Cannot delete standard resource class {0}")]
    ResourceClassCannotDeleteStandard(String),

    #[error("Cannot update standard resource class {0}")]
    ResourceClassCannotUpdateStandard(String),

    #[error("Cannot delete standard trait {0}")]
    TraitCannotDeleteStandard(String),

    #[error("Max retries of {retries} exceeded while attempting to {action}")]
    MaxRetriesExceeded { action: String, retries: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PlacementError {
    /// Category used by the transport layer to pick a response status.
    pub fn kind(&self) -> ErrorKind {
        use PlacementError::*;
        match self {
            ProviderNotFound(_)
            | ConsumerNotFound(_)
            | ResourceClassNotFound(_)
            | AggregateNotFound(_)
            | InventoryNotFound { .. } => ErrorKind::NotFound,
            // Unknown traits are a malformed constraint, not a missing object.
            TraitNotFound(_) => ErrorKind::BadRequest,
            ConcurrentUpdateDetected
            | ConsumerGenerationConflict { .. }
            | InventoryInUse { .. }
            | ProviderInUse(_)
            | CannotDeleteParentProvider(_)
            | ProviderExists(_)
            | InventoryExists { .. }
            | ResourceClassExists(_)
            | TraitExists(_)
            | ConsumerExists(_)
            | ProjectExists(_)
            | UserExists(_)
            | ConsumerTypeExists(_)
            | AggregateExists(_)
            | ResourceClassInUse(_)
            | TraitInUse(_)
            | InvalidAllocationCapacityExceeded { .. } => ErrorKind::Conflict,
            InvalidInventory { .. }
            | InvalidInventoryCapacity { .. }
            | InvalidAllocationConstraintsViolated { .. }
            | ObjectActionError { .. }
            | ResourceClassCannotDeleteStandard(_)
            | ResourceClassCannotUpdateStandard(_)
            | TraitCannotDeleteStandard(_)
            | InvalidRequest(_) => ErrorKind::BadRequest,
            MaxRetriesExceeded { .. } | StorageError(_) | ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// True for the "already exists" family raised when a concurrent caller
    /// inserted the same unique row first.
    pub fn is_creation_race(&self) -> bool {
        use PlacementError::*;
        matches!(
            self,
            ProviderExists(_)
                | ResourceClassExists(_)
                | TraitExists(_)
                | ConsumerExists(_)
                | ProjectExists(_)
                | UserExists(_)
                | ConsumerTypeExists(_)
                | AggregateExists(_)
        )
    }
}

impl From<config::ConfigError> for PlacementError {
    fn from(err: config::ConfigError) -> Self {
        PlacementError::ConfigError(err.to_string())
    }
}

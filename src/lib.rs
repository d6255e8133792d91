//! Placement: Resource Provider Inventory and Allocation Candidates
//!
//! Tracks the consumable capacity offered by trees of resource providers,
//! records the claims consumers hold against it, and resolves structured
//! resource requests into every combination of providers able to satisfy
//! them. All provider and consumer mutations are guarded by generation
//! counters so concurrent writers never silently overwrite each other.

pub mod api;
pub mod candidates;
pub mod config;
pub mod error;
pub mod logging;
pub mod objects;
pub mod registry;
pub mod store;
pub mod types;

pub use api::PlacementApi;
pub use candidates::{
    AllocationCandidates, AllocationRequest, AllocationRequestResource, CandidateQuery,
    CandidateSettings, GenerationStrategy, GroupPolicy, ProviderSummary, RequestGroup,
};
pub use config::{ConfigLoader, PlacementConfig};
pub use error::{ErrorKind, PlacementError, StorageError};
pub use store::Database;

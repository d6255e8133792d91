//! Shared test utilities for integration tests
//!
//! Builds services over throwaway or on-disk stores and provides shorthand
//! for the provider trees and claims most scenarios start from.

use placement::objects::allocation::{AllocationSpec, ConsumerAllocations};
use placement::objects::inventory::Inventory;
use placement::objects::provider::{NewProvider, ResourceProvider};
use placement::types::Generation;
use placement::{PlacementApi, PlacementConfig};
use std::path::Path;
use uuid::Uuid;

/// Service over a temporary store.
pub fn api() -> PlacementApi {
    PlacementApi::from_config(&PlacementConfig::temporary()).unwrap()
}

/// Service over a sled store at `path`.
pub fn api_at(path: &Path) -> PlacementApi {
    let mut config = PlacementConfig::default();
    config.storage.path = Some(path.to_path_buf());
    PlacementApi::from_config(&config).unwrap()
}

/// Create a provider, optionally under `parent`, and give it `inventory`.
pub fn provider(
    api: &PlacementApi,
    name: &str,
    parent: Option<&ResourceProvider>,
    inventory: &[Inventory],
) -> ResourceProvider {
    let mut new = NewProvider::new(name);
    if let Some(parent) = parent {
        new = new.with_parent(parent.uuid);
    }
    let mut rp = api.create_provider(new).unwrap();
    if !inventory.is_empty() {
        api.set_inventory(&mut rp, inventory).unwrap();
    }
    rp
}

/// Allocation request for one consumer of project "project" and user "user".
pub fn allocations(
    consumer: Uuid,
    generation: Option<Generation>,
    specs: &[(&ResourceProvider, &str, i64)],
) -> ConsumerAllocations {
    ConsumerAllocations {
        consumer_uuid: consumer,
        project_id: "project".to_string(),
        user_id: "user".to_string(),
        consumer_type: None,
        consumer_generation: generation,
        allocations: specs
            .iter()
            .map(|(rp, class, used)| AllocationSpec::new(rp.uuid, *class, *used))
            .collect(),
    }
}

/// Claim resources for a new consumer and return its uuid.
pub fn claim(api: &PlacementApi, specs: &[(&ResourceProvider, &str, i64)]) -> Uuid {
    let consumer = Uuid::new_v4();
    api.replace_allocations(&[allocations(consumer, None, specs)])
        .unwrap();
    consumer
}

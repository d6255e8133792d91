//! Placement API
//!
//! Single entry point over the store, the object layer and the candidate
//! resolver. Every call makes sure the standard resource classes and traits
//! have been synced into the store first; reads then run against one
//! snapshot, writes through the generation-guarded object operations.

use crate::candidates::{self, AllocationCandidates, CandidateQuery, CandidateSettings};
use crate::config::PlacementConfig;
use crate::error::PlacementError;
use crate::objects::aggregate;
use crate::objects::allocation::{self, Allocation, ConsumerAllocations};
use crate::objects::consumer::{self, Consumer};
use crate::objects::inventory::{self, Inventory};
use crate::objects::provider::{self, NewProvider, ProviderFilters, ProviderUpdate, ResourceProvider};
use crate::objects::reshape::{self, ProviderInventories};
use crate::objects::resource_class::{self, ResourceClass};
use crate::objects::traits::{self, Trait, TraitFilter};
use crate::objects::usage;
use crate::registry::StandardSync;
use crate::store::{Database, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Placement service
///
/// Cheap to share between threads; all state lives in the database handle.
pub struct PlacementApi {
    db: Arc<Database>,
    sync: Arc<StandardSync>,
    settings: CandidateSettings,
}

impl PlacementApi {
    pub fn new(db: Arc<Database>, sync: Arc<StandardSync>, settings: CandidateSettings) -> Self {
        Self { db, sync, settings }
    }

    /// Open the store described by `config` and build the service over it.
    pub fn from_config(config: &PlacementConfig) -> Result<Self, PlacementError> {
        config.clone().validated()?;
        let db = match (&config.storage.path, config.storage.temporary) {
            (Some(path), false) => Database::open(path)?,
            _ => Database::temporary()?,
        };
        info!(
            temporary = config.storage.temporary,
            strategy = ?config.placement.allocation_candidates_generation_strategy,
            "Opened placement store"
        );
        Ok(Self::new(
            Arc::new(db),
            Arc::new(StandardSync::new()),
            config.placement.candidate_settings(),
        ))
    }

    pub fn settings(&self) -> &CandidateSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn ready(&self) -> Result<&Database, PlacementError> {
        self.sync.ensure_synced(&self.db)?;
        Ok(&self.db)
    }

    fn snapshot(&self) -> Result<Snapshot, PlacementError> {
        Ok(self.ready()?.snapshot())
    }

    // Providers

    pub fn create_provider(&self, new: NewProvider) -> Result<ResourceProvider, PlacementError> {
        provider::create(self.ready()?, new)
    }

    pub fn get_provider(&self, uuid: &Uuid) -> Result<ResourceProvider, PlacementError> {
        provider::get_by_uuid(&*self.snapshot()?, uuid)
    }

    pub fn list_providers(
        &self,
        filters: &ProviderFilters,
    ) -> Result<Vec<ResourceProvider>, PlacementError> {
        provider::list(&*self.snapshot()?, filters)
    }

    pub fn get_provider_tree(&self, uuid: &Uuid) -> Result<Vec<ResourceProvider>, PlacementError> {
        provider::get_tree(&*self.snapshot()?, uuid)
    }

    pub fn update_provider(
        &self,
        rp: &mut ResourceProvider,
        update: ProviderUpdate,
    ) -> Result<(), PlacementError> {
        provider::update(self.ready()?, rp, update)
    }

    pub fn delete_provider(&self, rp: &ResourceProvider) -> Result<(), PlacementError> {
        provider::destroy(self.ready()?, rp)
    }

    // Inventories

    pub fn get_inventories(&self, provider_uuid: &Uuid) -> Result<Vec<Inventory>, PlacementError> {
        inventory::get_all(&*self.snapshot()?, provider_uuid)
    }

    pub fn get_inventory(
        &self,
        provider_uuid: &Uuid,
        resource_class: &str,
    ) -> Result<Inventory, PlacementError> {
        inventory::get(&*self.snapshot()?, provider_uuid, resource_class)
    }

    pub fn set_inventory(
        &self,
        rp: &mut ResourceProvider,
        inventories: &[Inventory],
    ) -> Result<(), PlacementError> {
        inventory::set_inventory(self.ready()?, rp, inventories)
    }

    pub fn add_inventory(
        &self,
        rp: &mut ResourceProvider,
        inv: &Inventory,
    ) -> Result<(), PlacementError> {
        inventory::add_inventory(self.ready()?, rp, inv)
    }

    pub fn update_inventory(
        &self,
        rp: &mut ResourceProvider,
        inv: &Inventory,
    ) -> Result<(), PlacementError> {
        inventory::update_inventory(self.ready()?, rp, inv)
    }

    pub fn delete_inventory(
        &self,
        rp: &mut ResourceProvider,
        resource_class: &str,
    ) -> Result<(), PlacementError> {
        inventory::delete_inventory(self.ready()?, rp, resource_class)
    }

    // Traits and aggregates on providers

    pub fn get_provider_traits(&self, provider_uuid: &Uuid) -> Result<Vec<String>, PlacementError> {
        traits::get_for_provider(&*self.snapshot()?, provider_uuid)
    }

    pub fn set_provider_traits(
        &self,
        rp: &mut ResourceProvider,
        names: &[String],
    ) -> Result<(), PlacementError> {
        traits::set_traits(self.ready()?, rp, names)
    }

    pub fn get_provider_aggregates(&self, provider_uuid: &Uuid) -> Result<Vec<Uuid>, PlacementError> {
        aggregate::get_for_provider(&*self.snapshot()?, provider_uuid)
    }

    pub fn set_provider_aggregates(
        &self,
        rp: &mut ResourceProvider,
        aggregates: &[Uuid],
    ) -> Result<(), PlacementError> {
        aggregate::set_aggregates(self.ready()?, rp, aggregates)
    }

    // Resource classes

    pub fn get_resource_class(&self, name: &str) -> Result<ResourceClass, PlacementError> {
        resource_class::get_by_name(&*self.snapshot()?, name)
    }

    pub fn list_resource_classes(&self) -> Result<Vec<ResourceClass>, PlacementError> {
        Ok(resource_class::list(&*self.snapshot()?))
    }

    pub fn create_resource_class(&self, name: &str) -> Result<ResourceClass, PlacementError> {
        resource_class::create(self.ready()?, name)
    }

    pub fn update_resource_class(
        &self,
        name: &str,
        new_name: &str,
    ) -> Result<ResourceClass, PlacementError> {
        resource_class::update(self.ready()?, name, new_name)
    }

    pub fn delete_resource_class(&self, name: &str) -> Result<(), PlacementError> {
        resource_class::destroy(self.ready()?, name)
    }

    // Traits

    pub fn get_trait(&self, name: &str) -> Result<Trait, PlacementError> {
        traits::get_by_name(&*self.snapshot()?, name)
    }

    pub fn list_traits(&self, filter: &TraitFilter) -> Result<Vec<Trait>, PlacementError> {
        Ok(traits::list(&*self.snapshot()?, filter))
    }

    pub fn create_trait(&self, name: &str) -> Result<Trait, PlacementError> {
        traits::create(self.ready()?, name)
    }

    pub fn delete_trait(&self, name: &str) -> Result<(), PlacementError> {
        traits::destroy(self.ready()?, name)
    }

    // Consumers and allocations

    pub fn get_consumer(&self, uuid: &Uuid) -> Result<Consumer, PlacementError> {
        consumer::get_by_uuid(&*self.snapshot()?, uuid)
    }

    pub fn get_allocations_for_consumer(&self, uuid: &Uuid) -> Result<Vec<Allocation>, PlacementError> {
        Ok(allocation::get_for_consumer(&*self.snapshot()?, uuid))
    }

    pub fn get_allocations_for_provider(&self, uuid: &Uuid) -> Result<Vec<Allocation>, PlacementError> {
        allocation::get_for_provider(&*self.snapshot()?, uuid)
    }

    /// Replace the allocations of every consumer in `requests` at once.
    pub fn replace_allocations(&self, requests: &[ConsumerAllocations]) -> Result<(), PlacementError> {
        allocation::replace_all(self.ready()?, requests)
    }

    pub fn delete_allocations_for_consumer(&self, uuid: &Uuid) -> Result<(), PlacementError> {
        allocation::delete_for_consumer(self.ready()?, uuid)
    }

    pub fn reshape(
        &self,
        inventories: &[ProviderInventories],
        allocations: &[ConsumerAllocations],
    ) -> Result<(), PlacementError> {
        reshape::reshape(self.ready()?, inventories, allocations)
    }

    // Usages

    pub fn get_provider_usages(&self, uuid: &Uuid) -> Result<BTreeMap<String, i64>, PlacementError> {
        usage::for_provider(&*self.snapshot()?, uuid)
    }

    pub fn get_tree_usages(&self, uuid: &Uuid) -> Result<BTreeMap<String, i64>, PlacementError> {
        usage::for_tree(&*self.snapshot()?, uuid)
    }

    pub fn get_project_usages(
        &self,
        project_id: &str,
        user_id: Option<&str>,
        consumer_type: Option<&str>,
    ) -> Result<BTreeMap<String, i64>, PlacementError> {
        Ok(usage::for_project(&*self.snapshot()?, project_id, user_id, consumer_type))
    }

    // Candidates

    /// Every way `query` could be satisfied right now.
    pub fn get_allocation_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<AllocationCandidates, PlacementError> {
        candidates::get_by_requests(&*self.snapshot()?, query, &self.settings)
    }
}

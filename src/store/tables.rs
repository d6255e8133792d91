//! In-memory relational tables and their secondary indexes.
//!
//! A `Tables` value is immutable once published as a snapshot; writers mutate
//! a private copy inside a transaction.

use crate::error::StorageError;
use crate::store::rows::{
    AggregateRow, AllocationRow, ConsumerRow, ConsumerTypeRow, InventoryRow, ProjectRow,
    ProviderAggregateRow, ProviderRow, ProviderTraitRow, ResourceClassRow, Row, TraitRow, UserRow,
};
use crate::types::{
    AggregateId, AllocationId, ConsumerId, ConsumerTypeId, ProjectId, ProviderId, ResourceClassId,
    TraitId, UserId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// One table: rows ordered by primary key.
///
/// Clones share the rows until one side writes, so a transaction only copies
/// the tables it modifies.
#[derive(Debug)]
pub struct Table<R: Row> {
    rows: Arc<BTreeMap<R::Key, R>>,
}

impl<R: Row> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<R: Row> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: Arc::new(BTreeMap::new()),
        }
    }
}

impl<R: Row> Table<R> {
    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.rows.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> + '_ {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn put(&mut self, row: R) {
        Arc::make_mut(&mut self.rows).insert(row.key(), row);
    }

    fn remove(&mut self, key: &R::Key) -> Option<R> {
        if !self.rows.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.rows).remove(key)
    }
}

impl<R: Row<Key = i64>> Table<R> {
    /// Next auto-increment id for the table.
    pub fn next_id(&self) -> i64 {
        self.rows.keys().next_back().map_or(1, |max| max + 1)
    }
}

impl<R: Row<Key = (i64, i64)>> Table<R> {
    /// Rows whose composite key starts with `first`.
    pub fn with_prefix(&self, first: i64) -> impl Iterator<Item = &R> + '_ {
        self.rows
            .range((first, i64::MIN)..=(first, i64::MAX))
            .map(|(_, row)| row)
    }
}

/// Secondary indexes maintained alongside the tables.
#[derive(Debug, Clone, Default)]
pub struct Indexes {
    pub(crate) provider_by_uuid: HashMap<Uuid, ProviderId>,
    pub(crate) provider_by_name: HashMap<String, ProviderId>,
    pub(crate) children: HashMap<ProviderId, BTreeSet<ProviderId>>,
    pub(crate) tree_members: HashMap<ProviderId, BTreeSet<ProviderId>>,
    pub(crate) providers_by_class: HashMap<ResourceClassId, BTreeSet<ProviderId>>,
    pub(crate) allocations_by_consumer: HashMap<ConsumerId, BTreeSet<AllocationId>>,
    pub(crate) allocations_by_provider: HashMap<ProviderId, BTreeSet<AllocationId>>,
    pub(crate) usage: HashMap<(ProviderId, ResourceClassId), i64>,
    pub(crate) consumer_by_uuid: HashMap<Uuid, ConsumerId>,
    pub(crate) project_by_external_id: HashMap<String, ProjectId>,
    pub(crate) user_by_external_id: HashMap<String, UserId>,
    pub(crate) consumer_type_by_name: HashMap<String, ConsumerTypeId>,
    pub(crate) trait_by_name: HashMap<String, TraitId>,
    pub(crate) resource_class_by_name: HashMap<String, ResourceClassId>,
    pub(crate) aggregate_by_uuid: HashMap<Uuid, AggregateId>,
    pub(crate) providers_by_trait: HashMap<TraitId, BTreeSet<ProviderId>>,
    pub(crate) providers_by_aggregate: HashMap<AggregateId, BTreeSet<ProviderId>>,
}

/// Providers and consumers a transaction wrote rows for.
#[derive(Debug, Default)]
pub struct Touched {
    pub(crate) providers: BTreeSet<ProviderId>,
    pub(crate) consumers: BTreeSet<ConsumerId>,
}

/// Every placement table plus its indexes.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub(crate) providers: Table<ProviderRow>,
    pub(crate) inventories: Table<InventoryRow>,
    pub(crate) allocations: Table<AllocationRow>,
    pub(crate) consumers: Table<ConsumerRow>,
    pub(crate) projects: Table<ProjectRow>,
    pub(crate) users: Table<UserRow>,
    pub(crate) consumer_types: Table<ConsumerTypeRow>,
    pub(crate) traits: Table<TraitRow>,
    pub(crate) resource_classes: Table<ResourceClassRow>,
    pub(crate) aggregates: Table<AggregateRow>,
    pub(crate) provider_traits: Table<ProviderTraitRow>,
    pub(crate) provider_aggregates: Table<ProviderAggregateRow>,
    pub(crate) indexes: Indexes,
}

impl Tables {
    pub(crate) fn insert<R: Row>(&mut self, row: R) -> Result<(), StorageError> {
        if R::table(self).contains(&row.key()) {
            return Err(StorageError::Duplicate {
                table: R::TABLE,
                column: "id",
                value: format!("{:?}", row.key()),
            });
        }
        row.check_unique(self)?;
        row.index(&mut self.indexes);
        R::table_mut(self).put(row);
        Ok(())
    }

    pub(crate) fn update<R: Row>(&mut self, row: R) -> Result<(), StorageError> {
        let old = R::table(self)
            .get(&row.key())
            .cloned()
            .ok_or_else(|| StorageError::RowNotFound {
                table: R::TABLE,
                key: format!("{:?}", row.key()),
            })?;
        row.check_unique(self)?;
        old.unindex(&mut self.indexes);
        row.index(&mut self.indexes);
        R::table_mut(self).put(row);
        Ok(())
    }

    pub(crate) fn delete<R: Row>(&mut self, key: &R::Key) -> Result<R, StorageError> {
        let old = R::table_mut(self)
            .remove(key)
            .ok_or_else(|| StorageError::RowNotFound {
                table: R::TABLE,
                key: format!("{:?}", key),
            })?;
        old.unindex(&mut self.indexes);
        Ok(old)
    }

    /// Add a row read back from persistence, trusting it was valid when written.
    pub(crate) fn load<R: Row>(&mut self, row: R) {
        row.index(&mut self.indexes);
        R::table_mut(self).put(row);
    }

    // Providers

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderRow> {
        self.providers.get(&id)
    }

    pub fn provider_by_uuid(&self, uuid: &Uuid) -> Option<&ProviderRow> {
        self.indexes
            .provider_by_uuid
            .get(uuid)
            .and_then(|id| self.providers.get(id))
    }

    pub fn provider_by_name(&self, name: &str) -> Option<&ProviderRow> {
        self.indexes
            .provider_by_name
            .get(name)
            .and_then(|id| self.providers.get(id))
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderRow> + '_ {
        self.providers.iter()
    }

    pub fn children_of(&self, id: ProviderId) -> impl Iterator<Item = ProviderId> + '_ {
        self.indexes
            .children
            .get(&id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn has_children(&self, id: ProviderId) -> bool {
        self.indexes
            .children
            .get(&id)
            .map_or(false, |set| !set.is_empty())
    }

    /// Ids of every provider whose root is `root_id`, the root included.
    pub fn tree_members(&self, root_id: ProviderId) -> impl Iterator<Item = ProviderId> + '_ {
        self.indexes
            .tree_members
            .get(&root_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Ids of `id` and all of its descendants.
    pub fn subtree(&self, id: ProviderId) -> Vec<ProviderId> {
        let mut out = vec![id];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            out.extend(self.children_of(current));
            cursor += 1;
        }
        out
    }

    /// True when any provider has a parent.
    pub fn has_trees(&self) -> bool {
        !self.indexes.children.is_empty()
    }

    // Inventories and usage

    pub fn inventory(&self, provider_id: ProviderId, rc_id: ResourceClassId) -> Option<&InventoryRow> {
        self.inventories.get(&(provider_id, rc_id))
    }

    pub fn inventories_of(&self, provider_id: ProviderId) -> impl Iterator<Item = &InventoryRow> + '_ {
        self.inventories.with_prefix(provider_id)
    }

    /// Providers holding inventory of the given class.
    pub fn providers_with_class(&self, rc_id: ResourceClassId) -> impl Iterator<Item = ProviderId> + '_ {
        self.indexes
            .providers_by_class
            .get(&rc_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn class_has_inventory(&self, rc_id: ResourceClassId) -> bool {
        self.indexes.providers_by_class.contains_key(&rc_id)
    }

    /// Sum of `used` over allocations of a provider and class.
    pub fn usage(&self, provider_id: ProviderId, rc_id: ResourceClassId) -> i64 {
        self.indexes
            .usage
            .get(&(provider_id, rc_id))
            .copied()
            .unwrap_or(0)
    }

    // Allocations

    pub fn allocations_of_consumer(&self, consumer_id: ConsumerId) -> impl Iterator<Item = &AllocationRow> + '_ {
        self.indexes
            .allocations_by_consumer
            .get(&consumer_id)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|id| self.allocations.get(id))
    }

    pub fn allocations_of_provider(&self, provider_id: ProviderId) -> impl Iterator<Item = &AllocationRow> + '_ {
        self.indexes
            .allocations_by_provider
            .get(&provider_id)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|id| self.allocations.get(id))
    }

    pub fn provider_has_allocations(&self, provider_id: ProviderId) -> bool {
        self.indexes
            .allocations_by_provider
            .get(&provider_id)
            .map_or(false, |set| !set.is_empty())
    }

    // Consumers, projects, users

    pub fn consumer(&self, id: ConsumerId) -> Option<&ConsumerRow> {
        self.consumers.get(&id)
    }

    pub fn consumer_by_uuid(&self, uuid: &Uuid) -> Option<&ConsumerRow> {
        self.indexes
            .consumer_by_uuid
            .get(uuid)
            .and_then(|id| self.consumers.get(id))
    }

    pub fn project(&self, id: ProjectId) -> Option<&ProjectRow> {
        self.projects.get(&id)
    }

    pub fn project_by_external_id(&self, external_id: &str) -> Option<&ProjectRow> {
        self.indexes
            .project_by_external_id
            .get(external_id)
            .and_then(|id| self.projects.get(id))
    }

    pub fn user(&self, id: UserId) -> Option<&UserRow> {
        self.users.get(&id)
    }

    pub fn user_by_external_id(&self, external_id: &str) -> Option<&UserRow> {
        self.indexes
            .user_by_external_id
            .get(external_id)
            .and_then(|id| self.users.get(id))
    }

    pub fn consumer_type(&self, id: ConsumerTypeId) -> Option<&ConsumerTypeRow> {
        self.consumer_types.get(&id)
    }

    pub fn consumer_type_by_name(&self, name: &str) -> Option<&ConsumerTypeRow> {
        self.indexes
            .consumer_type_by_name
            .get(name)
            .and_then(|id| self.consumer_types.get(id))
    }

    // Traits, resource classes, aggregates

    pub fn trait_row(&self, id: TraitId) -> Option<&TraitRow> {
        self.traits.get(&id)
    }

    pub fn trait_by_name(&self, name: &str) -> Option<&TraitRow> {
        self.indexes
            .trait_by_name
            .get(name)
            .and_then(|id| self.traits.get(id))
    }

    pub fn resource_class(&self, id: ResourceClassId) -> Option<&ResourceClassRow> {
        self.resource_classes.get(&id)
    }

    pub fn resource_class_by_name(&self, name: &str) -> Option<&ResourceClassRow> {
        self.indexes
            .resource_class_by_name
            .get(name)
            .and_then(|id| self.resource_classes.get(id))
    }

    pub fn aggregate(&self, id: AggregateId) -> Option<&AggregateRow> {
        self.aggregates.get(&id)
    }

    pub fn aggregate_by_uuid(&self, uuid: &Uuid) -> Option<&AggregateRow> {
        self.indexes
            .aggregate_by_uuid
            .get(uuid)
            .and_then(|id| self.aggregates.get(id))
    }

    pub fn trait_ids_of(&self, provider_id: ProviderId) -> impl Iterator<Item = TraitId> + '_ {
        self.provider_traits
            .with_prefix(provider_id)
            .map(|link| link.trait_id)
    }

    pub fn providers_with_trait(&self, trait_id: TraitId) -> impl Iterator<Item = ProviderId> + '_ {
        self.indexes
            .providers_by_trait
            .get(&trait_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn aggregate_ids_of(&self, provider_id: ProviderId) -> impl Iterator<Item = AggregateId> + '_ {
        self.provider_aggregates
            .with_prefix(provider_id)
            .map(|link| link.aggregate_id)
    }

    pub fn providers_in_aggregate(&self, aggregate_id: AggregateId) -> impl Iterator<Item = ProviderId> + '_ {
        self.indexes
            .providers_by_aggregate
            .get(&aggregate_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Check the provider tree and foreign-key invariants.
    ///
    /// Run on the private copy of every write transaction before it is
    /// published; a violation aborts the transaction.
    fn check_provider(&self, row: &ProviderRow) -> Result<(), StorageError> {
        let root = self.providers.get(&row.root_id).ok_or_else(|| {
            StorageError::Integrity(format!(
                "provider {} points at missing root {}",
                row.uuid, row.root_id
            ))
        })?;
        if root.root_id != root.id || root.parent_id.is_some() {
            return Err(StorageError::Integrity(format!(
                "provider {} has root {} which is not a root",
                row.uuid, root.uuid
            )));
        }
        match row.parent_id {
            Some(parent_id) => {
                let parent = self.providers.get(&parent_id).ok_or_else(|| {
                    StorageError::Integrity(format!(
                        "provider {} points at missing parent {}",
                        row.uuid, parent_id
                    ))
                })?;
                if parent.root_id != row.root_id {
                    return Err(StorageError::Integrity(format!(
                        "provider {} and its parent {} disagree on root",
                        row.uuid, parent.uuid
                    )));
                }
            }
            None if row.root_id != row.id => {
                return Err(StorageError::Integrity(format!(
                    "parentless provider {} is not its own root",
                    row.uuid
                )));
            }
            None => {}
        }
        Ok(())
    }

    /// Validate every row. Run once when a store is loaded.
    pub(crate) fn check_integrity(&self) -> Result<(), StorageError> {
        for row in self.providers.iter() {
            self.check_provider(row)?;
        }
        for inv in self.inventories.iter() {
            if !self.providers.contains(&inv.provider_id) {
                return Err(StorageError::Integrity(format!(
                    "inventory references missing provider {}",
                    inv.provider_id
                )));
            }
        }
        for alloc in self.allocations.iter() {
            if !self.providers.contains(&alloc.provider_id)
                || !self.consumers.contains(&alloc.consumer_id)
            {
                return Err(StorageError::Integrity(format!(
                    "allocation {} references a missing provider or consumer",
                    alloc.id
                )));
            }
        }
        Ok(())
    }

    /// Validate only what a transaction wrote: the touched providers and their
    /// children, and that removed providers and consumers left nothing behind.
    pub(crate) fn check_touched(&self, touched: &Touched) -> Result<(), StorageError> {
        for id in &touched.providers {
            match self.providers.get(id) {
                Some(row) => {
                    self.check_provider(row)?;
                    for child in self.children_of(*id) {
                        if let Some(child) = self.providers.get(&child) {
                            self.check_provider(child)?;
                        }
                    }
                }
                None => {
                    if self.has_children(*id)
                        || self.inventories.with_prefix(*id).next().is_some()
                        || self.allocations_of_provider(*id).next().is_some()
                    {
                        return Err(StorageError::Integrity(format!(
                            "deleted provider {} is still referenced",
                            id
                        )));
                    }
                }
            }
        }
        for id in &touched.consumers {
            if !self.consumers.contains(id) && self.allocations_of_consumer(*id).next().is_some() {
                return Err(StorageError::Integrity(format!(
                    "deleted consumer {} still holds allocations",
                    id
                )));
            }
        }
        Ok(())
    }
}

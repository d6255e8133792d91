//! Row types for every relational table held by the store.
//!
//! Each row knows its primary key, the sled key it persists under, and how to
//! maintain the secondary indexes kept beside the tables.

use crate::error::StorageError;
use crate::store::tables::{Indexes, Table, Tables, Touched};
use crate::types::{
    AggregateId, AllocationId, ConsumerId, ConsumerTypeId, Generation, ProjectId, ProviderId,
    ResourceClassId, TraitId, UserId,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// A typed row of one table.
pub trait Row: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Ord + Clone + Debug + Send + Sync;

    const TABLE: &'static str;

    fn key(&self) -> Self::Key;

    /// Key the row is persisted under in sled.
    fn storage_key(key: &Self::Key) -> String;

    fn table(tables: &Tables) -> &Table<Self>;

    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;

    /// Reject the row if it collides with a unique column of another row.
    fn check_unique(&self, _tables: &Tables) -> Result<(), StorageError> {
        Ok(())
    }

    fn index(&self, _indexes: &mut Indexes) {}

    fn unindex(&self, _indexes: &mut Indexes) {}

    /// Record the providers and consumers whose integrity a write of this row
    /// can affect.
    fn touch(&self, _touched: &mut Touched) {}
}

fn single_key(table: &str, id: i64) -> String {
    format!("{}:{:020}", table, id)
}

fn pair_key(table: &str, first: i64, second: i64) -> String {
    format!("{}:{:020}:{:020}", table, first, second)
}

fn duplicate(table: &'static str, column: &'static str, value: impl ToString) -> StorageError {
    StorageError::Duplicate {
        table,
        column,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRow {
    pub id: ProviderId,
    pub uuid: Uuid,
    pub name: String,
    pub generation: Generation,
    pub parent_id: Option<ProviderId>,
    pub root_id: ProviderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Row for ProviderRow {
    type Key = ProviderId;
    const TABLE: &'static str = "resource_providers";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.providers
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.providers
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        if let Some(id) = tables.indexes.provider_by_uuid.get(&self.uuid) {
            if *id != self.id {
                return Err(duplicate(Self::TABLE, "uuid", self.uuid));
            }
        }
        if let Some(id) = tables.indexes.provider_by_name.get(&self.name) {
            if *id != self.id {
                return Err(duplicate(Self::TABLE, "name", &self.name));
            }
        }
        Ok(())
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes.provider_by_uuid.insert(self.uuid, self.id);
        indexes.provider_by_name.insert(self.name.clone(), self.id);
        if let Some(parent) = self.parent_id {
            indexes.children.entry(parent).or_default().insert(self.id);
        }
        indexes
            .tree_members
            .entry(self.root_id)
            .or_default()
            .insert(self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.provider_by_uuid.remove(&self.uuid);
        indexes.provider_by_name.remove(&self.name);
        if let Some(parent) = self.parent_id {
            remove_from_set(&mut indexes.children, parent, self.id);
        }
        remove_from_set(&mut indexes.tree_members, self.root_id, self.id);
    }

    fn touch(&self, touched: &mut Touched) {
        touched.providers.insert(self.id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryRow {
    pub provider_id: ProviderId,
    pub resource_class_id: ResourceClassId,
    pub total: i64,
    pub reserved: i64,
    pub min_unit: i64,
    pub max_unit: i64,
    pub step_size: i64,
    pub allocation_ratio: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRow {
    /// `floor((total - reserved) * allocation_ratio)`
    pub fn capacity(&self) -> i64 {
        crate::objects::inventory::capacity(self.total, self.reserved, self.allocation_ratio)
    }

    /// Whether a single request of `amount` respects min_unit, max_unit and step_size.
    pub fn accepts_amount(&self, amount: i64) -> bool {
        amount >= self.min_unit
            && amount <= self.max_unit
            && self.step_size > 0
            && amount % self.step_size == 0
    }
}

impl Row for InventoryRow {
    type Key = (ProviderId, ResourceClassId);
    const TABLE: &'static str = "inventories";

    fn key(&self) -> Self::Key {
        (self.provider_id, self.resource_class_id)
    }

    fn storage_key(key: &Self::Key) -> String {
        pair_key(Self::TABLE, key.0, key.1)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.inventories
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.inventories
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .providers_by_class
            .entry(self.resource_class_id)
            .or_default()
            .insert(self.provider_id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        remove_from_set(
            &mut indexes.providers_by_class,
            self.resource_class_id,
            self.provider_id,
        );
    }
    fn touch(&self, touched: &mut Touched) {
        touched.providers.insert(self.provider_id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationRow {
    pub id: AllocationId,
    pub provider_id: ProviderId,
    pub consumer_id: ConsumerId,
    pub resource_class_id: ResourceClassId,
    pub used: i64,
    pub created_at: DateTime<Utc>,
}

impl Row for AllocationRow {
    type Key = AllocationId;
    const TABLE: &'static str = "allocations";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.allocations
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.allocations
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .allocations_by_consumer
            .entry(self.consumer_id)
            .or_default()
            .insert(self.id);
        indexes
            .allocations_by_provider
            .entry(self.provider_id)
            .or_default()
            .insert(self.id);
        *indexes
            .usage
            .entry((self.provider_id, self.resource_class_id))
            .or_insert(0) += self.used;
    }

    fn unindex(&self, indexes: &mut Indexes) {
        remove_from_set(&mut indexes.allocations_by_consumer, self.consumer_id, self.id);
        remove_from_set(&mut indexes.allocations_by_provider, self.provider_id, self.id);
        let key = (self.provider_id, self.resource_class_id);
        if let Some(used) = indexes.usage.get_mut(&key) {
            *used -= self.used;
            if *used == 0 {
                indexes.usage.remove(&key);
            }
        }
    }
    fn touch(&self, touched: &mut Touched) {
        touched.providers.insert(self.provider_id);
        touched.consumers.insert(self.consumer_id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerRow {
    pub id: ConsumerId,
    pub uuid: Uuid,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub consumer_type_id: ConsumerTypeId,
    pub generation: Generation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Row for ConsumerRow {
    type Key = ConsumerId;
    const TABLE: &'static str = "consumers";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.consumers
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.consumers
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.consumer_by_uuid.get(&self.uuid) {
            Some(id) if *id != self.id => Err(duplicate(Self::TABLE, "uuid", self.uuid)),
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes.consumer_by_uuid.insert(self.uuid, self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.consumer_by_uuid.remove(&self.uuid);
    }
    fn touch(&self, touched: &mut Touched) {
        touched.consumers.insert(self.id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub external_id: String,
}

impl Row for ProjectRow {
    type Key = ProjectId;
    const TABLE: &'static str = "projects";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.projects
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.projects
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.project_by_external_id.get(&self.external_id) {
            Some(id) if *id != self.id => {
                Err(duplicate(Self::TABLE, "external_id", &self.external_id))
            }
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .project_by_external_id
            .insert(self.external_id.clone(), self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.project_by_external_id.remove(&self.external_id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRow {
    pub id: UserId,
    pub external_id: String,
}

impl Row for UserRow {
    type Key = UserId;
    const TABLE: &'static str = "users";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.users
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.users
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.user_by_external_id.get(&self.external_id) {
            Some(id) if *id != self.id => {
                Err(duplicate(Self::TABLE, "external_id", &self.external_id))
            }
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .user_by_external_id
            .insert(self.external_id.clone(), self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.user_by_external_id.remove(&self.external_id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerTypeRow {
    pub id: ConsumerTypeId,
    pub name: String,
}

impl Row for ConsumerTypeRow {
    type Key = ConsumerTypeId;
    const TABLE: &'static str = "consumer_types";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.consumer_types
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.consumer_types
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.consumer_type_by_name.get(&self.name) {
            Some(id) if *id != self.id => Err(duplicate(Self::TABLE, "name", &self.name)),
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .consumer_type_by_name
            .insert(self.name.clone(), self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.consumer_type_by_name.remove(&self.name);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraitRow {
    pub id: TraitId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Row for TraitRow {
    type Key = TraitId;
    const TABLE: &'static str = "traits";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.traits
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.traits
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.trait_by_name.get(&self.name) {
            Some(id) if *id != self.id => Err(duplicate(Self::TABLE, "name", &self.name)),
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes.trait_by_name.insert(self.name.clone(), self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.trait_by_name.remove(&self.name);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceClassRow {
    pub id: ResourceClassId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Row for ResourceClassRow {
    type Key = ResourceClassId;
    const TABLE: &'static str = "resource_classes";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.resource_classes
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.resource_classes
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.resource_class_by_name.get(&self.name) {
            Some(id) if *id != self.id => Err(duplicate(Self::TABLE, "name", &self.name)),
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .resource_class_by_name
            .insert(self.name.clone(), self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.resource_class_by_name.remove(&self.name);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateRow {
    pub id: AggregateId,
    pub uuid: Uuid,
}

impl Row for AggregateRow {
    type Key = AggregateId;
    const TABLE: &'static str = "placement_aggregates";

    fn key(&self) -> Self::Key {
        self.id
    }

    fn storage_key(key: &Self::Key) -> String {
        single_key(Self::TABLE, *key)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.aggregates
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.aggregates
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StorageError> {
        match tables.indexes.aggregate_by_uuid.get(&self.uuid) {
            Some(id) if *id != self.id => Err(duplicate(Self::TABLE, "uuid", self.uuid)),
            _ => Ok(()),
        }
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes.aggregate_by_uuid.insert(self.uuid, self.id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        indexes.aggregate_by_uuid.remove(&self.uuid);
    }
}

/// Link between a provider and one of its traits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderTraitRow {
    pub provider_id: ProviderId,
    pub trait_id: TraitId,
}

impl Row for ProviderTraitRow {
    type Key = (ProviderId, TraitId);
    const TABLE: &'static str = "resource_provider_traits";

    fn key(&self) -> Self::Key {
        (self.provider_id, self.trait_id)
    }

    fn storage_key(key: &Self::Key) -> String {
        pair_key(Self::TABLE, key.0, key.1)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.provider_traits
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.provider_traits
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .providers_by_trait
            .entry(self.trait_id)
            .or_default()
            .insert(self.provider_id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        remove_from_set(&mut indexes.providers_by_trait, self.trait_id, self.provider_id);
    }
}

/// Link between a provider and an aggregate it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderAggregateRow {
    pub provider_id: ProviderId,
    pub aggregate_id: AggregateId,
}

impl Row for ProviderAggregateRow {
    type Key = (ProviderId, AggregateId);
    const TABLE: &'static str = "resource_provider_aggregates";

    fn key(&self) -> Self::Key {
        (self.provider_id, self.aggregate_id)
    }

    fn storage_key(key: &Self::Key) -> String {
        pair_key(Self::TABLE, key.0, key.1)
    }

    fn table(tables: &Tables) -> &Table<Self> {
        &tables.provider_aggregates
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.provider_aggregates
    }

    fn index(&self, indexes: &mut Indexes) {
        indexes
            .providers_by_aggregate
            .entry(self.aggregate_id)
            .or_default()
            .insert(self.provider_id);
    }

    fn unindex(&self, indexes: &mut Indexes) {
        remove_from_set(
            &mut indexes.providers_by_aggregate,
            self.aggregate_id,
            self.provider_id,
        );
    }
}

fn remove_from_set<K, V>(
    map: &mut std::collections::HashMap<K, std::collections::BTreeSet<V>>,
    key: K,
    value: V,
) where
    K: std::hash::Hash + Eq,
    V: Ord,
{
    if let Some(set) = map.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

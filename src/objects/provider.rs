//! Resource provider tree
//!
//! Creation, re-parenting, deletion and listing of providers, plus the
//! generation compare-and-swap every provider mutation funnels through.

use crate::error::PlacementError;
use crate::store::{
    Database, InventoryRow, ProviderAggregateRow, ProviderRow, ProviderTraitRow, Tables,
    Transaction,
};
use crate::types::{Generation, ProviderId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

/// A provider as seen by callers: its own row plus parent and root uuids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceProvider {
    #[serde(skip)]
    pub id: ProviderId,
    pub uuid: Uuid,
    pub name: String,
    pub generation: Generation,
    pub parent_provider_uuid: Option<Uuid>,
    pub root_provider_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceProvider {
    pub(crate) fn from_row(tables: &Tables, row: &ProviderRow) -> Self {
        let parent_provider_uuid = row
            .parent_id
            .and_then(|id| tables.provider(id))
            .map(|parent| parent.uuid);
        let root_provider_uuid = tables
            .provider(row.root_id)
            .map_or(row.uuid, |root| root.uuid);
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name.clone(),
            generation: row.generation,
            parent_provider_uuid,
            root_provider_uuid,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    /// Re-read this provider from a transaction's view.
    pub(crate) fn refresh(&mut self, tables: &Tables) {
        if let Some(row) = tables.provider(self.id) {
            *self = Self::from_row(tables, row);
        }
    }
}

/// Fields accepted when creating a provider.
#[derive(Debug, Clone)]
pub struct NewProvider {
    pub uuid: Option<Uuid>,
    pub name: String,
    pub parent_provider_uuid: Option<Uuid>,
}

impl NewProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: None,
            name: name.into(),
            parent_provider_uuid: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_provider_uuid = Some(parent);
        self
    }
}

/// Desired name and parent for an existing provider.
#[derive(Debug, Clone)]
pub struct ProviderUpdate {
    pub name: String,
    pub parent_provider_uuid: Option<Uuid>,
}

/// Filters for [`list`]. Every populated filter must match.
#[derive(Debug, Clone, Default)]
pub struct ProviderFilters {
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    /// Any provider in the same tree as this one.
    pub in_tree: Option<Uuid>,
    /// AND of OR-sets of aggregate uuids.
    pub member_of: Vec<BTreeSet<Uuid>>,
    pub forbidden_aggregates: BTreeSet<Uuid>,
    /// AND of OR-sets of trait names.
    pub required_traits: Vec<BTreeSet<String>>,
    pub forbidden_traits: BTreeSet<String>,
    /// Providers with capacity for every listed amount.
    pub resources: BTreeMap<String, i64>,
}

fn map_duplicate(err: crate::error::StorageError, uuid: Uuid, name: &str) -> PlacementError {
    if err.is_duplicate_on("uuid") {
        PlacementError::ProviderExists(format!("uuid {}", uuid))
    } else if err.is_duplicate_on("name") {
        PlacementError::ProviderExists(format!("name {}", name))
    } else {
        err.into()
    }
}

/// Create a provider, deriving its root from the parent.
pub fn create(db: &Database, new: NewProvider) -> Result<ResourceProvider, PlacementError> {
    if new.name.trim().is_empty() {
        return Err(PlacementError::ObjectActionError {
            action: "create",
            reason: "name is required".to_string(),
        });
    }
    let uuid = new.uuid.unwrap_or_else(Uuid::new_v4);

    let provider = db.write(|tx| {
        let parent = match new.parent_provider_uuid {
            Some(parent_uuid) => Some(
                tx.tables()
                    .provider_by_uuid(&parent_uuid)
                    .cloned()
                    .ok_or_else(|| PlacementError::ObjectActionError {
                        action: "create",
                        reason: format!("parent provider UUID {} does not exist", parent_uuid),
                    })?,
            ),
            None => None,
        };
        let id = tx.next_id::<ProviderRow>();
        let now = Utc::now();
        let row = ProviderRow {
            id,
            uuid,
            name: new.name.clone(),
            generation: 0,
            parent_id: parent.as_ref().map(|p| p.id),
            root_id: parent.as_ref().map_or(id, |p| p.root_id),
            created_at: now,
            updated_at: now,
        };
        tx.insert(row.clone())
            .map_err(|e| map_duplicate(e, uuid, &new.name))?;
        Ok::<_, PlacementError>(ResourceProvider::from_row(tx.tables(), &row))
    })?;

    info!(
        uuid = %provider.uuid,
        name = %provider.name,
        root = %provider.root_provider_uuid,
        "Created resource provider"
    );
    Ok(provider)
}

pub fn get_by_uuid(tables: &Tables, uuid: &Uuid) -> Result<ResourceProvider, PlacementError> {
    tables
        .provider_by_uuid(uuid)
        .map(|row| ResourceProvider::from_row(tables, row))
        .ok_or(PlacementError::ProviderNotFound(*uuid))
}

/// Bump a provider's generation inside `tx`, provided it still equals `known`.
///
/// Every provider mutation goes through here. A missing row or a generation
/// that moved on raises `ConcurrentUpdateDetected`.
pub(crate) fn increment_generation_in_tx(
    tx: &mut Transaction,
    id: ProviderId,
    known: Generation,
) -> Result<Generation, PlacementError> {
    let mut row = match tx.tables().provider(id) {
        Some(row) if row.generation == known => row.clone(),
        Some(row) => {
            debug!(
                uuid = %row.uuid,
                known,
                current = row.generation,
                "Provider generation moved"
            );
            return Err(PlacementError::ConcurrentUpdateDetected);
        }
        None => return Err(PlacementError::ConcurrentUpdateDetected),
    };
    row.generation = known + 1;
    row.updated_at = Utc::now();
    let generation = row.generation;
    tx.update(row)?;
    Ok(generation)
}

/// Bump the provider's generation, guarded by the generation the caller holds.
pub fn increment_generation(
    db: &Database,
    provider: &mut ResourceProvider,
) -> Result<(), PlacementError> {
    let refreshed = db.write(|tx| {
        increment_generation_in_tx(tx, provider.id, provider.generation)?;
        Ok::<_, PlacementError>(tx.tables().provider(provider.id).cloned())
    })?;
    if let Some(row) = refreshed {
        provider.generation = row.generation;
        provider.updated_at = row.updated_at;
    }
    Ok(())
}

/// Rename and/or attach a rootless provider to a parent.
///
/// Moving a provider that already has a parent, or detaching one, is
/// rejected. Attaching rewrites the root of the whole subtree.
pub fn update(
    db: &Database,
    provider: &mut ResourceProvider,
    update: ProviderUpdate,
) -> Result<(), PlacementError> {
    let refreshed = db.write(|tx| {
        let current = tx
            .tables()
            .provider(provider.id)
            .cloned()
            .ok_or(PlacementError::ProviderNotFound(provider.uuid))?;

        let mut new_root = None;
        let mut row = current.clone();
        row.name = update.name.clone();

        match (current.parent_id, update.parent_provider_uuid) {
            (Some(existing), Some(parent_uuid)) => {
                let same = tx
                    .tables()
                    .provider(existing)
                    .map_or(false, |p| p.uuid == parent_uuid);
                if !same {
                    return Err(PlacementError::ObjectActionError {
                        action: "update",
                        reason: "re-parenting a provider is not currently allowed".to_string(),
                    });
                }
            }
            (Some(_), None) => {
                return Err(PlacementError::ObjectActionError {
                    action: "update",
                    reason: "un-parenting a provider is not currently allowed".to_string(),
                });
            }
            (None, Some(parent_uuid)) => {
                let parent = tx
                    .tables()
                    .provider_by_uuid(&parent_uuid)
                    .cloned()
                    .ok_or_else(|| PlacementError::ObjectActionError {
                        action: "update",
                        reason: format!("parent provider UUID {} does not exist", parent_uuid),
                    })?;
                if parent.root_id == current.root_id {
                    return Err(PlacementError::ObjectActionError {
                        action: "update",
                        reason: "creating loop in the provider tree is not allowed".to_string(),
                    });
                }
                row.parent_id = Some(parent.id);
                row.root_id = parent.root_id;
                new_root = Some(parent.root_id);
            }
            (None, None) => {}
        }

        let descendants: Vec<ProviderId> = tx
            .tables()
            .subtree(current.id)
            .into_iter()
            .filter(|id| *id != current.id)
            .collect();

        row.updated_at = Utc::now();
        tx.update(row).map_err(|e| map_duplicate(e, current.uuid, &update.name))?;

        if let Some(root_id) = new_root {
            for id in descendants {
                if let Some(mut child) = tx.tables().provider(id).cloned() {
                    child.root_id = root_id;
                    tx.update(child)?;
                }
            }
        }

        increment_generation_in_tx(tx, current.id, provider.generation)?;
        let tables = tx.tables();
        Ok::<_, PlacementError>(
            tables
                .provider(current.id)
                .map(|row| ResourceProvider::from_row(tables, row)),
        )
    })?;

    if let Some(view) = refreshed {
        *provider = view;
    }
    info!(uuid = %provider.uuid, name = %provider.name, "Updated resource provider");
    Ok(())
}

/// Delete a provider with no children and no allocations.
///
/// Inventories, trait links and aggregate links go with it.
pub fn destroy(db: &Database, provider: &ResourceProvider) -> Result<(), PlacementError> {
    db.write(|tx| {
        let id = tx
            .tables()
            .provider_by_uuid(&provider.uuid)
            .map(|row| row.id)
            .ok_or(PlacementError::ProviderNotFound(provider.uuid))?;
        if tx.tables().provider_has_allocations(id) {
            return Err(PlacementError::ProviderInUse(provider.uuid));
        }
        if tx.tables().has_children(id) {
            return Err(PlacementError::CannotDeleteParentProvider(provider.uuid));
        }

        let classes: Vec<_> = tx
            .tables()
            .inventories_of(id)
            .map(|inv| inv.resource_class_id)
            .collect();
        for rc_id in classes {
            tx.delete::<InventoryRow>(&(id, rc_id))?;
        }
        let traits: Vec<_> = tx.tables().trait_ids_of(id).collect();
        for trait_id in traits {
            tx.delete::<ProviderTraitRow>(&(id, trait_id))?;
        }
        let aggregates: Vec<_> = tx.tables().aggregate_ids_of(id).collect();
        for aggregate_id in aggregates {
            tx.delete::<ProviderAggregateRow>(&(id, aggregate_id))?;
        }
        tx.delete::<ProviderRow>(&id)?;
        Ok::<_, PlacementError>(())
    })?;
    info!(uuid = %provider.uuid, "Deleted resource provider");
    Ok(())
}

/// Every provider in the same tree as `uuid`, root first.
pub fn get_tree(tables: &Tables, uuid: &Uuid) -> Result<Vec<ResourceProvider>, PlacementError> {
    let row = tables
        .provider_by_uuid(uuid)
        .ok_or(PlacementError::ProviderNotFound(*uuid))?;
    let mut members: Vec<&ProviderRow> = tables
        .tree_members(row.root_id)
        .filter_map(|id| tables.provider(id))
        .collect();
    members.sort_by_key(|member| (member.parent_id.is_some(), member.id));
    Ok(members
        .into_iter()
        .map(|member| ResourceProvider::from_row(tables, member))
        .collect())
}

/// List providers matching every populated filter, ordered by id.
///
/// Unknown trait names raise `TraitNotFound`; unknown resource classes raise
/// `ResourceClassNotFound`; unknown aggregates simply match nothing.
pub fn list(
    tables: &Tables,
    filters: &ProviderFilters,
) -> Result<Vec<ResourceProvider>, PlacementError> {
    let mut ids: BTreeSet<ProviderId> = tables.providers().map(|row| row.id).collect();

    if let Some(name) = &filters.name {
        ids.retain(|id| tables.provider(*id).map_or(false, |row| &row.name == name));
    }
    if let Some(uuid) = &filters.uuid {
        ids.retain(|id| tables.provider(*id).map_or(false, |row| &row.uuid == uuid));
    }
    if let Some(anchor) = &filters.in_tree {
        let root = match tables.provider_by_uuid(anchor) {
            Some(row) => row.root_id,
            None => return Ok(Vec::new()),
        };
        ids.retain(|id| tables.provider(*id).map_or(false, |row| row.root_id == root));
    }

    let research = crate::candidates::research::Research::new(tables);
    if !filters.member_of.is_empty() || !filters.forbidden_aggregates.is_empty() {
        let member_of = research.aggregate_id_sets(&filters.member_of);
        let forbidden = research.aggregate_ids(&filters.forbidden_aggregates);
        ids.retain(|id| research.matches_aggregates(*id, &member_of, &forbidden, false));
    }
    if !filters.required_traits.is_empty() || !filters.forbidden_traits.is_empty() {
        let required = research.trait_id_sets(&filters.required_traits)?;
        let forbidden = research.trait_ids(&filters.forbidden_traits)?;
        let filtered = research.filter_by_traits(&ids, &required, &forbidden);
        ids = filtered;
    }
    for (class, amount) in &filters.resources {
        let rc = tables
            .resource_class_by_name(class)
            .ok_or_else(|| PlacementError::ResourceClassNotFound(class.clone()))?;
        let with_capacity = research.providers_with_capacity(rc.id, *amount);
        ids.retain(|id| with_capacity.contains(id));
    }

    Ok(ids
        .into_iter()
        .filter_map(|id| tables.provider(id))
        .map(|row| ResourceProvider::from_row(tables, row))
        .collect())
}

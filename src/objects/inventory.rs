//! Inventory ledger
//!
//! Per-(provider, resource class) capacity records. Every successful change
//! bumps the owning provider's generation exactly once.

use crate::error::PlacementError;
use crate::objects::provider::{increment_generation_in_tx, ResourceProvider};
use crate::store::{Database, InventoryRow, Tables, Transaction};
use crate::types::{Generation, ProviderId, ResourceClassId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use uuid::Uuid;

/// `floor((total - reserved) * allocation_ratio)`
pub fn capacity(total: i64, reserved: i64, allocation_ratio: f64) -> i64 {
    ((total - reserved) as f64 * allocation_ratio).floor() as i64
}

/// Capacity record for one resource class on one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub resource_class: String,
    pub total: i64,
    #[serde(default)]
    pub reserved: i64,
    #[serde(default = "default_min_unit")]
    pub min_unit: i64,
    /// Defaults to `total` when absent.
    #[serde(default)]
    pub max_unit: Option<i64>,
    #[serde(default = "default_step_size")]
    pub step_size: i64,
    #[serde(default = "default_allocation_ratio")]
    pub allocation_ratio: f64,
}

fn default_min_unit() -> i64 {
    1
}

fn default_step_size() -> i64 {
    1
}

fn default_allocation_ratio() -> f64 {
    1.0
}

impl Inventory {
    pub fn new(resource_class: impl Into<String>, total: i64) -> Self {
        Self {
            resource_class: resource_class.into(),
            total,
            reserved: 0,
            min_unit: default_min_unit(),
            max_unit: None,
            step_size: default_step_size(),
            allocation_ratio: default_allocation_ratio(),
        }
    }

    pub fn with_reserved(mut self, reserved: i64) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn with_min_unit(mut self, min_unit: i64) -> Self {
        self.min_unit = min_unit;
        self
    }

    pub fn with_max_unit(mut self, max_unit: i64) -> Self {
        self.max_unit = Some(max_unit);
        self
    }

    pub fn with_step_size(mut self, step_size: i64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_allocation_ratio(mut self, allocation_ratio: f64) -> Self {
        self.allocation_ratio = allocation_ratio;
        self
    }

    pub fn effective_max_unit(&self) -> i64 {
        self.max_unit.unwrap_or(self.total)
    }

    pub fn capacity(&self) -> i64 {
        capacity(self.total, self.reserved, self.allocation_ratio)
    }

    pub fn validate(&self) -> Result<(), PlacementError> {
        let invalid = |reason: &str| PlacementError::InvalidInventoryCapacity {
            resource_class: self.resource_class.clone(),
            reason: reason.to_string(),
        };
        if self.total <= 0 {
            return Err(invalid("total must be greater than zero"));
        }
        if self.reserved < 0 {
            return Err(invalid("reserved must not be negative"));
        }
        if self.reserved > self.total {
            return Err(invalid("reserved value is greater than total"));
        }
        if self.min_unit < 1 {
            return Err(invalid("min_unit must be at least 1"));
        }
        if self.effective_max_unit() < 1 {
            return Err(invalid("max_unit must be at least 1"));
        }
        if self.min_unit > self.effective_max_unit() {
            return Err(invalid("min_unit is greater than max_unit"));
        }
        if self.step_size < 1 {
            return Err(invalid("step_size must be at least 1"));
        }
        if !(self.allocation_ratio > 0.0) || !self.allocation_ratio.is_finite() {
            return Err(invalid("allocation_ratio must be a positive number"));
        }
        Ok(())
    }

    fn from_row(tables: &Tables, row: &InventoryRow) -> Self {
        Self {
            resource_class: tables
                .resource_class(row.resource_class_id)
                .map(|rc| rc.name.clone())
                .unwrap_or_default(),
            total: row.total,
            reserved: row.reserved,
            min_unit: row.min_unit,
            max_unit: Some(row.max_unit),
            step_size: row.step_size,
            allocation_ratio: row.allocation_ratio,
        }
    }

    fn to_row(&self, provider_id: ProviderId, resource_class_id: ResourceClassId) -> InventoryRow {
        let now = Utc::now();
        InventoryRow {
            provider_id,
            resource_class_id,
            total: self.total,
            reserved: self.reserved,
            min_unit: self.min_unit,
            max_unit: self.effective_max_unit(),
            step_size: self.step_size,
            allocation_ratio: self.allocation_ratio,
            created_at: now,
            updated_at: now,
        }
    }
}

fn resolve_class(tables: &Tables, name: &str) -> Result<ResourceClassId, PlacementError> {
    tables
        .resource_class_by_name(name)
        .map(|rc| rc.id)
        .ok_or_else(|| PlacementError::ResourceClassNotFound(name.to_string()))
}

fn provider_row_id(tables: &Tables, uuid: &Uuid) -> Result<ProviderId, PlacementError> {
    tables
        .provider_by_uuid(uuid)
        .map(|row| row.id)
        .ok_or(PlacementError::ProviderNotFound(*uuid))
}

fn class_in_use(tables: &Tables, provider_id: ProviderId, rc_id: ResourceClassId) -> bool {
    tables
        .allocations_of_provider(provider_id)
        .any(|alloc| alloc.resource_class_id == rc_id)
}

fn warn_if_over_capacity(tables: &Tables, provider_uuid: &Uuid, row: &InventoryRow, name: &str) {
    let used = tables.usage(row.provider_id, row.resource_class_id);
    if used > row.capacity() {
        warn!(
            provider = %provider_uuid,
            resource_class = %name,
            used,
            capacity = row.capacity(),
            "Resource provider is now over capacity"
        );
    }
}

/// All inventories of a provider, ordered by resource class id.
pub fn get_all(tables: &Tables, provider_uuid: &Uuid) -> Result<Vec<Inventory>, PlacementError> {
    let id = provider_row_id(tables, provider_uuid)?;
    Ok(tables
        .inventories_of(id)
        .map(|row| Inventory::from_row(tables, row))
        .collect())
}

pub fn get(
    tables: &Tables,
    provider_uuid: &Uuid,
    resource_class: &str,
) -> Result<Inventory, PlacementError> {
    let id = provider_row_id(tables, provider_uuid)?;
    let rc_id = resolve_class(tables, resource_class)?;
    tables
        .inventory(id, rc_id)
        .map(|row| Inventory::from_row(tables, row))
        .ok_or_else(|| PlacementError::InventoryNotFound {
            provider: *provider_uuid,
            resource_class: resource_class.to_string(),
        })
}

/// Replace a provider's whole inventory set within `tx`.
///
/// Returns the provider's new generation.
pub(crate) fn replace_in_tx(
    tx: &mut Transaction,
    provider_id: ProviderId,
    known: Generation,
    inventories: &[Inventory],
) -> Result<Generation, PlacementError> {
    let provider_uuid = tx
        .tables()
        .provider(provider_id)
        .map(|row| row.uuid)
        .ok_or(PlacementError::ConcurrentUpdateDetected)?;

    let mut desired: BTreeMap<ResourceClassId, &Inventory> = BTreeMap::new();
    for inv in inventories {
        inv.validate()?;
        desired.insert(resolve_class(tx.tables(), &inv.resource_class)?, inv);
    }
    let existing: BTreeSet<ResourceClassId> = tx
        .tables()
        .inventories_of(provider_id)
        .map(|row| row.resource_class_id)
        .collect();

    for rc_id in existing.iter().filter(|rc| !desired.contains_key(rc)) {
        if class_in_use(tx.tables(), provider_id, *rc_id) {
            let name = tx
                .tables()
                .resource_class(*rc_id)
                .map(|rc| rc.name.clone())
                .unwrap_or_default();
            return Err(PlacementError::InventoryInUse {
                provider: provider_uuid,
                resource_class: name,
            });
        }
        tx.delete::<InventoryRow>(&(provider_id, *rc_id))?;
    }

    for (rc_id, inv) in &desired {
        let mut row = inv.to_row(provider_id, *rc_id);
        if let Some(old) = tx.tables().inventory(provider_id, *rc_id) {
            row.created_at = old.created_at;
            warn_if_over_capacity(tx.tables(), &provider_uuid, &row, &inv.resource_class);
            tx.update(row)?;
        } else {
            tx.insert(row)?;
        }
    }

    increment_generation_in_tx(tx, provider_id, known)
}

/// Replace every inventory of `provider` with `inventories`.
///
/// Classes not listed are deleted (failing with `InventoryInUse` if any
/// allocation still references them). Lowering capacity below current usage
/// is allowed and only logged.
pub fn set_inventory(
    db: &Database,
    provider: &mut ResourceProvider,
    inventories: &[Inventory],
) -> Result<(), PlacementError> {
    db.write(|tx| {
        replace_in_tx(tx, provider.id, provider.generation, inventories)?;
        provider.refresh(tx.tables());
        Ok::<_, PlacementError>(())
    })?;
    info!(
        provider = %provider.uuid,
        classes = inventories.len(),
        generation = provider.generation,
        "Set inventory"
    );
    Ok(())
}

/// Add a single inventory record; fails if the class already has one.
pub fn add_inventory(
    db: &Database,
    provider: &mut ResourceProvider,
    inventory: &Inventory,
) -> Result<(), PlacementError> {
    inventory.validate()?;
    db.write(|tx| {
        let rc_id = resolve_class(tx.tables(), &inventory.resource_class)?;
        if tx.tables().inventory(provider.id, rc_id).is_some() {
            return Err(PlacementError::InventoryExists {
                provider: provider.uuid,
                resource_class: inventory.resource_class.clone(),
            });
        }
        tx.insert(inventory.to_row(provider.id, rc_id))?;
        increment_generation_in_tx(tx, provider.id, provider.generation)?;
        provider.refresh(tx.tables());
        Ok(())
    })
}

/// Update a single existing inventory record.
pub fn update_inventory(
    db: &Database,
    provider: &mut ResourceProvider,
    inventory: &Inventory,
) -> Result<(), PlacementError> {
    inventory.validate()?;
    db.write(|tx| {
        let rc_id = resolve_class(tx.tables(), &inventory.resource_class)?;
        let created_at = tx
            .tables()
            .inventory(provider.id, rc_id)
            .map(|row| row.created_at)
            .ok_or_else(|| PlacementError::InventoryNotFound {
                provider: provider.uuid,
                resource_class: inventory.resource_class.clone(),
            })?;
        let mut row = inventory.to_row(provider.id, rc_id);
        row.created_at = created_at;
        warn_if_over_capacity(tx.tables(), &provider.uuid, &row, &inventory.resource_class);
        tx.update(row)?;
        increment_generation_in_tx(tx, provider.id, provider.generation)?;
        provider.refresh(tx.tables());
        Ok(())
    })
}

/// Delete a single inventory record that no allocation references.
pub fn delete_inventory(
    db: &Database,
    provider: &mut ResourceProvider,
    resource_class: &str,
) -> Result<(), PlacementError> {
    db.write(|tx| {
        let rc_id = resolve_class(tx.tables(), resource_class)?;
        if tx.tables().inventory(provider.id, rc_id).is_none() {
            return Err(PlacementError::InventoryNotFound {
                provider: provider.uuid,
                resource_class: resource_class.to_string(),
            });
        }
        if class_in_use(tx.tables(), provider.id, rc_id) {
            return Err(PlacementError::InventoryInUse {
                provider: provider.uuid,
                resource_class: resource_class.to_string(),
            });
        }
        tx.delete::<InventoryRow>(&(provider.id, rc_id))?;
        increment_generation_in_tx(tx, provider.id, provider.generation)?;
        provider.refresh(tx.tables());
        Ok(())
    })
}

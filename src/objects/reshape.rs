//! Reshape: move inventory and the allocations against it in one step.
//!
//! Runs as interim union inventory, then allocation replacement, then the
//! final inventory, all inside a single transaction so capacity is never
//! missing while allocations are moved between providers.

use crate::error::PlacementError;
use crate::objects::allocation::{
    ensure_consumers, replace_in_tx as replace_allocations, ConsumerAllocations,
};
use crate::objects::consumer::{delete_created_consumers, EnsuredConsumer};
use crate::objects::inventory::{replace_in_tx as replace_inventory, Inventory};
use crate::store::{Database, Tables, Transaction};
use crate::types::{Generation, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// The complete desired inventory of one provider, guarded by the
/// generation the caller last saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInventories {
    pub provider_uuid: Uuid,
    pub generation: Generation,
    pub inventories: Vec<Inventory>,
}

fn current_inventories(tables: &Tables, provider_id: ProviderId) -> BTreeMap<String, Inventory> {
    tables
        .inventories_of(provider_id)
        .filter_map(|row| {
            let name = tables.resource_class(row.resource_class_id)?.name.clone();
            let inv = Inventory {
                resource_class: name.clone(),
                total: row.total,
                reserved: row.reserved,
                min_unit: row.min_unit,
                max_unit: Some(row.max_unit),
                step_size: row.step_size,
                allocation_ratio: row.allocation_ratio,
            };
            Some((name, inv))
        })
        .collect()
}

fn reshape_in_tx(
    tx: &mut Transaction,
    inventories: &[ProviderInventories],
    requests: &[ConsumerAllocations],
    consumers: &[EnsuredConsumer],
) -> Result<(), PlacementError> {
    let mut providers = Vec::with_capacity(inventories.len());
    for entry in inventories {
        let row = tx
            .tables()
            .provider_by_uuid(&entry.provider_uuid)
            .ok_or(PlacementError::ProviderNotFound(entry.provider_uuid))?;
        if row.generation != entry.generation {
            return Err(PlacementError::ConcurrentUpdateDetected);
        }
        providers.push((row.id, entry));
    }

    for (provider_id, entry) in &providers {
        let mut interim = current_inventories(tx.tables(), *provider_id);
        for inv in &entry.inventories {
            interim.insert(inv.resource_class.clone(), inv.clone());
        }
        let interim: Vec<Inventory> = interim.into_values().collect();
        replace_inventory(tx, *provider_id, entry.generation, &interim)?;
    }

    replace_allocations(tx, requests, consumers)?;

    for (provider_id, entry) in &providers {
        let known = tx
            .tables()
            .provider(*provider_id)
            .map(|row| row.generation)
            .ok_or(PlacementError::ProviderNotFound(entry.provider_uuid))?;
        replace_inventory(tx, *provider_id, known, &entry.inventories)?;
    }
    Ok(())
}

/// Atomically replace inventories on `inventories` providers and allocations
/// for `allocations` consumers.
pub fn reshape(
    db: &Database,
    inventories: &[ProviderInventories],
    allocations: &[ConsumerAllocations],
) -> Result<(), PlacementError> {
    for entry in inventories {
        for inv in &entry.inventories {
            inv.validate()?;
        }
    }
    let consumers = ensure_consumers(db, allocations)?;
    let result = db.write(|tx| reshape_in_tx(tx, inventories, allocations, &consumers));
    if let Err(err) = result {
        delete_created_consumers(db, &consumers);
        return Err(err);
    }
    info!(
        providers = inventories.len(),
        consumers = allocations.len(),
        "Reshaped provider inventories"
    );
    Ok(())
}

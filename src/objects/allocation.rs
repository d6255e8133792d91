//! Allocation ledger
//!
//! Replacing a consumer's allocations is a two-step write: consumers (and
//! their projects, users and types) are ensured in their own transactions,
//! then every allocation change lands in one transaction. If that second step
//! fails, consumers created by the first are deleted again.

use crate::error::PlacementError;
use crate::objects::consumer::{
    apply_attributes_in_tx, delete_created_consumers, ensure_consumer,
    increment_generation_in_tx as increment_consumer_generation, ConsumerIdentity,
    EnsuredConsumer,
};
use crate::objects::provider::increment_generation_in_tx as increment_provider_generation;
use crate::store::{AllocationRow, ConsumerRow, Database, Tables, Transaction};
use crate::types::{Generation, ProviderId, ResourceClassId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

/// One requested claim against a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSpec {
    pub provider_uuid: Uuid,
    pub resource_class: String,
    pub used: i64,
}

impl AllocationSpec {
    pub fn new(provider_uuid: Uuid, resource_class: impl Into<String>, used: i64) -> Self {
        Self {
            provider_uuid,
            resource_class: resource_class.into(),
            used,
        }
    }
}

/// Full replacement set of allocations for one consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerAllocations {
    pub consumer_uuid: Uuid,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub consumer_type: Option<String>,
    /// Generation the caller last saw; `None` for a consumer it believes is new.
    pub consumer_generation: Option<Generation>,
    pub allocations: Vec<AllocationSpec>,
}

impl ConsumerAllocations {
    fn identity(&self) -> ConsumerIdentity<'_> {
        ConsumerIdentity {
            uuid: self.consumer_uuid,
            project_id: &self.project_id,
            user_id: &self.user_id,
            consumer_type: self.consumer_type.as_deref(),
            generation: self.consumer_generation,
        }
    }
}

/// A stored allocation, resolved to uuids and names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    #[serde(skip)]
    pub id: i64,
    pub provider_uuid: Uuid,
    pub consumer_uuid: Uuid,
    pub resource_class: String,
    pub used: i64,
}

impl Allocation {
    fn from_row(tables: &Tables, row: &AllocationRow) -> Self {
        Self {
            id: row.id,
            provider_uuid: tables
                .provider(row.provider_id)
                .map_or_else(Uuid::nil, |p| p.uuid),
            consumer_uuid: tables
                .consumer(row.consumer_id)
                .map_or_else(Uuid::nil, |c| c.uuid),
            resource_class: tables
                .resource_class(row.resource_class_id)
                .map(|rc| rc.name.clone())
                .unwrap_or_default(),
            used: row.used,
        }
    }
}

/// Allocations held by a consumer. Unknown consumers have none.
pub fn get_for_consumer(tables: &Tables, consumer_uuid: &Uuid) -> Vec<Allocation> {
    match tables.consumer_by_uuid(consumer_uuid) {
        Some(consumer) => tables
            .allocations_of_consumer(consumer.id)
            .map(|row| Allocation::from_row(tables, row))
            .collect(),
        None => Vec::new(),
    }
}

pub fn get_for_provider(tables: &Tables, provider_uuid: &Uuid) -> Result<Vec<Allocation>, PlacementError> {
    let provider = tables
        .provider_by_uuid(provider_uuid)
        .ok_or(PlacementError::ProviderNotFound(*provider_uuid))?;
    Ok(tables
        .allocations_of_provider(provider.id)
        .map(|row| Allocation::from_row(tables, row))
        .collect())
}

/// Ensure every consumer, deleting any already created if a later one fails.
pub(crate) fn ensure_consumers(
    db: &Database,
    requests: &[ConsumerAllocations],
) -> Result<Vec<EnsuredConsumer>, PlacementError> {
    let mut seen = BTreeSet::new();
    for request in requests {
        if !seen.insert(request.consumer_uuid) {
            return Err(PlacementError::InvalidRequest(format!(
                "consumer {} appears more than once",
                request.consumer_uuid
            )));
        }
    }

    let mut ensured = Vec::with_capacity(requests.len());
    for request in requests {
        match ensure_consumer(db, &request.identity()) {
            Ok(consumer) => ensured.push(consumer),
            Err(err) => {
                delete_created_consumers(db, &ensured);
                return Err(err);
            }
        }
    }
    Ok(ensured)
}

/// Replace allocations for each consumer inside `tx`.
///
/// Deletes the consumers' current allocations, checks every new amount
/// against inventory constraints and remaining capacity, writes the new
/// rows, then bumps each touched provider and each consumer. Consumers left
/// with no allocations are deleted.
pub(crate) fn replace_in_tx(
    tx: &mut Transaction,
    requests: &[ConsumerAllocations],
    consumers: &[EnsuredConsumer],
) -> Result<(), PlacementError> {
    // Known generation of each provider the write touches, taken at first touch.
    let mut touched: BTreeMap<ProviderId, Generation> = BTreeMap::new();

    for consumer in consumers {
        apply_attributes_in_tx(tx, consumer)?;
        let existing: Vec<AllocationRow> =
            tx.tables().allocations_of_consumer(consumer.id).cloned().collect();
        for row in existing {
            if let Some(provider) = tx.tables().provider(row.provider_id) {
                touched.entry(provider.id).or_insert(provider.generation);
            }
            tx.delete::<AllocationRow>(&row.id)?;
        }
    }

    let mut requested: BTreeMap<(ProviderId, ResourceClassId), i64> = BTreeMap::new();
    let mut rows = Vec::new();
    for (request, consumer) in requests.iter().zip(consumers) {
        for spec in &request.allocations {
            if spec.used < 0 {
                return Err(PlacementError::InvalidRequest(format!(
                    "negative amount {} for {}",
                    spec.used, spec.resource_class
                )));
            }
            if spec.used == 0 {
                continue;
            }
            let tables = tx.tables();
            let provider = tables
                .provider_by_uuid(&spec.provider_uuid)
                .ok_or(PlacementError::ProviderNotFound(spec.provider_uuid))?;
            let rc = tables
                .resource_class_by_name(&spec.resource_class)
                .ok_or_else(|| PlacementError::ResourceClassNotFound(spec.resource_class.clone()))?;
            let inventory = tables.inventory(provider.id, rc.id).ok_or_else(|| {
                PlacementError::InvalidInventory {
                    provider: provider.uuid,
                    resource_class: spec.resource_class.clone(),
                }
            })?;
            let exceeded = || PlacementError::InvalidAllocationCapacityExceeded {
                provider: provider.uuid,
                resource_class: spec.resource_class.clone(),
            };
            let total_requested = requested.entry((provider.id, rc.id)).or_insert(0);
            *total_requested = total_requested.checked_add(spec.used).ok_or_else(&exceeded)?;
            let used = tables.usage(provider.id, rc.id);
            let fits = used
                .checked_add(*total_requested)
                .map_or(false, |after| after <= inventory.capacity());
            if !fits {
                debug!(
                    provider = %provider.uuid,
                    resource_class = %spec.resource_class,
                    used,
                    requested = *total_requested,
                    capacity = inventory.capacity(),
                    "Allocation would exceed capacity"
                );
                return Err(exceeded());
            }
            if !inventory.accepts_amount(spec.used) {
                return Err(PlacementError::InvalidAllocationConstraintsViolated {
                    provider: provider.uuid,
                    resource_class: spec.resource_class.clone(),
                    amount: spec.used,
                });
            }
            touched.entry(provider.id).or_insert(provider.generation);
            rows.push((provider.id, consumer.id, rc.id, spec.used));
        }
    }

    let now = Utc::now();
    for (provider_id, consumer_id, resource_class_id, used) in rows {
        let row = AllocationRow {
            id: tx.next_id::<AllocationRow>(),
            provider_id,
            consumer_id,
            resource_class_id,
            used,
            created_at: now,
        };
        tx.insert(row)?;
    }

    for (provider_id, known) in touched {
        increment_provider_generation(tx, provider_id, known)?;
    }
    for consumer in consumers {
        increment_consumer_generation(tx, consumer.id, consumer.generation)?;
        if tx.tables().allocations_of_consumer(consumer.id).next().is_none() {
            debug!(consumer = %consumer.uuid, "Deleting consumer with no allocations");
            tx.delete::<ConsumerRow>(&consumer.id)?;
        }
    }
    Ok(())
}

/// Atomically replace the allocations of every listed consumer.
pub fn replace_all(db: &Database, requests: &[ConsumerAllocations]) -> Result<(), PlacementError> {
    let consumers = ensure_consumers(db, requests)?;
    let result = db.write(|tx| replace_in_tx(tx, requests, &consumers));
    if let Err(err) = result {
        delete_created_consumers(db, &consumers);
        return Err(err);
    }
    info!(consumers = requests.len(), "Replaced allocations");
    Ok(())
}

/// Remove every allocation of a consumer along with the consumer itself.
pub fn delete_for_consumer(db: &Database, consumer_uuid: &Uuid) -> Result<(), PlacementError> {
    db.write(|tx| {
        let consumer_id = tx
            .tables()
            .consumer_by_uuid(consumer_uuid)
            .map(|row| row.id)
            .ok_or(PlacementError::ConsumerNotFound(*consumer_uuid))?;
        let existing: Vec<AllocationRow> =
            tx.tables().allocations_of_consumer(consumer_id).cloned().collect();
        let mut touched: BTreeMap<ProviderId, Generation> = BTreeMap::new();
        for row in existing {
            if let Some(provider) = tx.tables().provider(row.provider_id) {
                touched.entry(provider.id).or_insert(provider.generation);
            }
            tx.delete::<AllocationRow>(&row.id)?;
        }
        for (provider_id, known) in touched {
            increment_provider_generation(tx, provider_id, known)?;
        }
        tx.delete::<ConsumerRow>(&consumer_id)?;
        Ok::<_, PlacementError>(())
    })?;
    info!(consumer = %consumer_uuid, "Deleted allocations for consumer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::inventory::{set_inventory, Inventory};
    use crate::objects::provider::{create, get_by_uuid, NewProvider, ResourceProvider};
    use crate::registry::StandardSync;

    fn setup() -> (Database, ResourceProvider) {
        let db = Database::temporary().unwrap();
        StandardSync::new().ensure_synced(&db).unwrap();
        let mut provider = create(&db, NewProvider::new("cn1")).unwrap();
        set_inventory(
            &db,
            &mut provider,
            &[
                Inventory::new("VCPU", 8),
                Inventory::new("DISK_GB", 100).with_step_size(10).with_max_unit(50),
            ],
        )
        .unwrap();
        (db, provider)
    }

    fn request(consumer: Uuid, generation: Option<Generation>, allocations: Vec<AllocationSpec>) -> ConsumerAllocations {
        ConsumerAllocations {
            consumer_uuid: consumer,
            project_id: "project".to_string(),
            user_id: "user".to_string(),
            consumer_type: None,
            consumer_generation: generation,
            allocations,
        }
    }

    #[test]
    fn test_replace_bumps_provider_and_consumer() {
        let (db, provider) = setup();
        let consumer = Uuid::new_v4();
        replace_all(
            &db,
            &[request(consumer, None, vec![AllocationSpec::new(provider.uuid, "VCPU", 2)])],
        )
        .unwrap();

        let snapshot = db.snapshot();
        assert_eq!(get_by_uuid(&snapshot, &provider.uuid).unwrap().generation, 2);
        let stored = get_for_consumer(&snapshot, &consumer);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].used, 2);
        assert_eq!(snapshot.consumer_by_uuid(&consumer).unwrap().generation, 1);

        replace_all(
            &db,
            &[request(consumer, Some(1), vec![AllocationSpec::new(provider.uuid, "VCPU", 6)])],
        )
        .unwrap();
        let snapshot = db.snapshot();
        assert_eq!(get_for_provider(&snapshot, &provider.uuid).unwrap()[0].used, 6);
        assert_eq!(snapshot.consumer_by_uuid(&consumer).unwrap().generation, 2);
    }

    #[test]
    fn test_capacity_and_constraints_enforced() {
        let (db, provider) = setup();
        let over = replace_all(
            &db,
            &[request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "VCPU", 9)])],
        );
        assert!(matches!(
            over,
            Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
        ));

        let bad_step = replace_all(
            &db,
            &[request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "DISK_GB", 15)])],
        );
        assert!(matches!(
            bad_step,
            Err(PlacementError::InvalidAllocationConstraintsViolated { amount: 15, .. })
        ));

        let missing = replace_all(
            &db,
            &[request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "MEMORY_MB", 1)])],
        );
        assert!(matches!(missing, Err(PlacementError::InvalidInventory { .. })));

        // Compensation removed every consumer created for the failed writes.
        assert!(db.snapshot().consumers.is_empty());
    }

    #[test]
    fn test_capacity_checked_before_unit_constraints() {
        let (db, provider) = setup();
        // 110 is over capacity and over max_unit; capacity wins.
        let over = replace_all(
            &db,
            &[request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "DISK_GB", 110)])],
        );
        assert!(matches!(
            over,
            Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_huge_amounts_exceed_capacity_without_overflow() {
        let db = Database::temporary().unwrap();
        StandardSync::new().ensure_synced(&db).unwrap();
        let mut provider = create(&db, NewProvider::new("huge")).unwrap();
        set_inventory(&db, &mut provider, &[Inventory::new("VCPU", i64::MAX)]).unwrap();
        replace_all(
            &db,
            &[request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "VCPU", 1)])],
        )
        .unwrap();

        let on_top = replace_all(
            &db,
            &[request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "VCPU", i64::MAX)])],
        );
        assert!(matches!(
            on_top,
            Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
        ));

        let summed = replace_all(
            &db,
            &[request(
                Uuid::new_v4(),
                None,
                vec![
                    AllocationSpec::new(provider.uuid, "VCPU", i64::MAX - 1),
                    AllocationSpec::new(provider.uuid, "VCPU", i64::MAX - 1),
                ],
            )],
        );
        assert!(matches!(
            summed,
            Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
        ));
        assert_eq!(db.snapshot().usage(provider.id, 0), 1);
    }

    #[test]
    fn test_two_consumers_share_capacity_in_one_write() {
        let (db, provider) = setup();
        let result = replace_all(
            &db,
            &[
                request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "VCPU", 5)]),
                request(Uuid::new_v4(), None, vec![AllocationSpec::new(provider.uuid, "VCPU", 5)]),
            ],
        );
        assert!(matches!(
            result,
            Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
        ));
        assert_eq!(db.snapshot().usage(provider.id, 0), 0);
    }

    #[test]
    fn test_stale_consumer_generation_conflicts() {
        let (db, provider) = setup();
        let consumer = Uuid::new_v4();
        replace_all(
            &db,
            &[request(consumer, None, vec![AllocationSpec::new(provider.uuid, "VCPU", 1)])],
        )
        .unwrap();
        let result = replace_all(
            &db,
            &[request(consumer, Some(0), vec![AllocationSpec::new(provider.uuid, "VCPU", 1)])],
        );
        assert!(matches!(
            result,
            Err(PlacementError::ConsumerGenerationConflict { .. })
        ));
    }

    #[test]
    fn test_empty_replacement_deletes_consumer() {
        let (db, provider) = setup();
        let consumer = Uuid::new_v4();
        replace_all(
            &db,
            &[request(consumer, None, vec![AllocationSpec::new(provider.uuid, "VCPU", 1)])],
        )
        .unwrap();
        replace_all(&db, &[request(consumer, Some(1), vec![])]).unwrap();
        let snapshot = db.snapshot();
        assert!(snapshot.consumer_by_uuid(&consumer).is_none());
        assert_eq!(snapshot.usage(provider.id, 0), 0);
    }

    #[test]
    fn test_delete_for_consumer() {
        let (db, provider) = setup();
        let consumer = Uuid::new_v4();
        replace_all(
            &db,
            &[request(consumer, None, vec![AllocationSpec::new(provider.uuid, "VCPU", 3)])],
        )
        .unwrap();
        delete_for_consumer(&db, &consumer).unwrap();
        let snapshot = db.snapshot();
        assert!(get_for_consumer(&snapshot, &consumer).is_empty());
        assert_eq!(get_by_uuid(&snapshot, &provider.uuid).unwrap().generation, 3);
        assert!(matches!(
            delete_for_consumer(&db, &consumer),
            Err(PlacementError::ConsumerNotFound(_))
        ));
    }
}

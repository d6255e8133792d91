//! Aggregate membership

use crate::error::PlacementError;
use crate::objects::provider::{increment_generation_in_tx, ResourceProvider};
use crate::objects::{insert_or_reread, Lookup};
use crate::store::{AggregateRow, Database, ProviderAggregateRow, Tables};
use crate::types::AggregateId;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub id: AggregateId,
    pub uuid: Uuid,
}

impl From<&AggregateRow> for Aggregate {
    fn from(row: &AggregateRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
        }
    }
}

fn create(db: &Database, uuid: Uuid) -> Result<Aggregate, PlacementError> {
    db.write(|tx| {
        let row = AggregateRow {
            id: tx.next_id::<AggregateRow>(),
            uuid,
        };
        tx.insert(row.clone()).map_err(|err| {
            if err.is_duplicate_on("uuid") {
                PlacementError::AggregateExists(uuid)
            } else {
                err.into()
            }
        })?;
        Ok(Aggregate::from(&row))
    })
}

/// Get-or-create the aggregate record for `uuid`.
pub fn ensure(db: &Database, uuid: Uuid) -> Result<Lookup<Aggregate>, PlacementError> {
    if let Some(row) = db.snapshot().aggregate_by_uuid(&uuid) {
        return Ok(Lookup::Found(Aggregate::from(row)));
    }
    insert_or_reread(
        || create(db, uuid),
        || db.snapshot().aggregate_by_uuid(&uuid).map(Aggregate::from),
    )
}

/// Uuids of the aggregates a provider belongs to, sorted.
pub fn get_for_provider(tables: &Tables, provider_uuid: &Uuid) -> Result<Vec<Uuid>, PlacementError> {
    let provider = tables
        .provider_by_uuid(provider_uuid)
        .ok_or(PlacementError::ProviderNotFound(*provider_uuid))?;
    let mut uuids: Vec<Uuid> = tables
        .aggregate_ids_of(provider.id)
        .filter_map(|id| tables.aggregate(id))
        .map(|row| row.uuid)
        .collect();
    uuids.sort();
    Ok(uuids)
}

/// Replace the provider's aggregate memberships.
///
/// Aggregate records are ensured in their own transactions first, so they
/// survive even when the association update itself conflicts.
pub fn set_aggregates(
    db: &Database,
    provider: &mut ResourceProvider,
    uuids: &[Uuid],
) -> Result<(), PlacementError> {
    let mut wanted = BTreeSet::new();
    for uuid in uuids {
        let aggregate = ensure(db, *uuid)?;
        if aggregate.was_created() {
            debug!(aggregate = %uuid, "Created aggregate");
        }
        wanted.insert(aggregate.get().id);
    }

    db.write(|tx| {
        let current: BTreeSet<AggregateId> = tx.tables().aggregate_ids_of(provider.id).collect();
        for aggregate_id in current.difference(&wanted) {
            tx.delete::<ProviderAggregateRow>(&(provider.id, *aggregate_id))?;
        }
        for aggregate_id in wanted.difference(&current) {
            tx.insert(ProviderAggregateRow {
                provider_id: provider.id,
                aggregate_id: *aggregate_id,
            })?;
        }
        increment_generation_in_tx(tx, provider.id, provider.generation)?;
        provider.refresh(tx.tables());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::provider::{create as create_provider, NewProvider};

    #[test]
    fn test_set_aggregates_round_trip() {
        let db = Database::temporary().unwrap();
        let mut provider = create_provider(&db, NewProvider::new("cn1")).unwrap();
        let agg_a = Uuid::new_v4();
        let agg_b = Uuid::new_v4();

        set_aggregates(&db, &mut provider, &[agg_a, agg_b]).unwrap();
        assert_eq!(provider.generation, 1);
        let mut expected = vec![agg_a, agg_b];
        expected.sort();
        assert_eq!(get_for_provider(&db.snapshot(), &provider.uuid).unwrap(), expected);

        set_aggregates(&db, &mut provider, &[agg_b]).unwrap();
        assert_eq!(provider.generation, 2);
        assert_eq!(
            get_for_provider(&db.snapshot(), &provider.uuid).unwrap(),
            vec![agg_b]
        );
        // The aggregate record itself is kept.
        assert!(db.snapshot().aggregate_by_uuid(&agg_a).is_some());
    }

    #[test]
    fn test_stale_provider_keeps_created_aggregates() {
        let db = Database::temporary().unwrap();
        let mut provider = create_provider(&db, NewProvider::new("cn1")).unwrap();
        let mut stale = provider.clone();
        set_aggregates(&db, &mut provider, &[]).unwrap();

        let agg = Uuid::new_v4();
        assert!(matches!(
            set_aggregates(&db, &mut stale, &[agg]),
            Err(PlacementError::ConcurrentUpdateDetected)
        ));
        assert!(db.snapshot().aggregate_by_uuid(&agg).is_some());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let db = Database::temporary().unwrap();
        let uuid = Uuid::new_v4();
        let first = ensure(&db, uuid).unwrap();
        let second = ensure(&db, uuid).unwrap();
        assert!(first.was_created());
        assert_eq!(second, Lookup::Found(*first.get()));
    }
}

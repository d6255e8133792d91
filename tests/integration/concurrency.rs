//! Generation compare-and-swap under concurrent writers

use crate::integration::test_utils::{allocations, api, provider};
use placement::objects::inventory::Inventory;
use placement::objects::provider::increment_generation;
use placement::registry::StandardSync;
use placement::{Database, PlacementError};
use std::sync::Barrier;
use std::thread;
use uuid::Uuid;

#[test]
fn test_concurrent_increments_have_one_winner() {
    let api = api();
    let rp = provider(&api, "cn1", None, &[]);
    let start = rp.generation;
    let writers = 8;
    let barrier = Barrier::new(writers);

    let results: Vec<Result<(), PlacementError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let mut copy = rp.clone();
                let barrier = &barrier;
                let api = &api;
                scope.spawn(move || {
                    barrier.wait();
                    increment_generation(api.database(), &mut copy)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(PlacementError::ConcurrentUpdateDetected)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, writers - 1);
    assert_eq!(api.get_provider(&rp.uuid).unwrap().generation, start + 1);
}

#[test]
fn test_concurrent_set_inventory_at_generation_five() {
    let api = api();
    let mut rp = provider(&api, "cn1", None, &[]);
    while rp.generation < 5 {
        increment_generation(api.database(), &mut rp).unwrap();
    }
    assert_eq!(rp.generation, 5);

    let mut first = rp.clone();
    let mut second = rp.clone();
    api.set_inventory(&mut first, &[Inventory::new("VCPU", 8)])
        .unwrap();
    assert_eq!(first.generation, 6);

    let err = api
        .set_inventory(&mut second, &[Inventory::new("VCPU", 16)])
        .unwrap_err();
    assert!(matches!(err, PlacementError::ConcurrentUpdateDetected));
    assert_eq!(api.get_inventory(&rp.uuid, "VCPU").unwrap().total, 8);

    let mut fresh = api.get_provider(&rp.uuid).unwrap();
    api.set_inventory(&mut fresh, &[Inventory::new("VCPU", 16)])
        .unwrap();
    assert_eq!(fresh.generation, 7);
}

#[test]
fn test_racing_claims_never_overcommit() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 4)]);
    let writers = 6;
    let barrier = Barrier::new(writers);

    let outcomes: Vec<Result<(), PlacementError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let barrier = &barrier;
                let api = &api;
                let cn = &cn;
                scope.spawn(move || {
                    let request = allocations(Uuid::new_v4(), None, &[(cn, "VCPU", 1)]);
                    barrier.wait();
                    api.replace_allocations(&[request])
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let granted = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(granted, 4);
    for outcome in outcomes.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            outcome,
            Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
        ));
    }
    assert_eq!(api.get_provider_usages(&cn.uuid).unwrap()["VCPU"], 4);
}

#[test]
fn test_standard_sync_runs_once_across_threads() {
    let db = Database::temporary().unwrap();
    let sync = StandardSync::new();
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| sync.ensure_synced(&db).unwrap());
        }
    });
    assert!(sync.is_synced());

    // A second service instance losing the race against rows already there.
    StandardSync::new().ensure_synced(&db).unwrap();
    let classes = placement::objects::resource_class::list(&db.snapshot());
    assert_eq!(
        classes.len(),
        placement::registry::STANDARD_RESOURCE_CLASSES.len()
    );
}

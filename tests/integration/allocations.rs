//! Allocation write path: consumer generations, compensation, reshape

use crate::integration::test_utils::{allocations, api, claim, provider};
use placement::objects::inventory::Inventory;
use placement::objects::reshape::ProviderInventories;
use placement::PlacementError;
use uuid::Uuid;

#[test]
fn test_consumer_generation_guards_replacement() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let consumer = claim(&api, &[(&cn, "VCPU", 2)]);
    assert_eq!(api.get_consumer(&consumer).unwrap().generation, 1);

    let stale = api.replace_allocations(&[allocations(consumer, Some(0), &[(&cn, "VCPU", 4)])]);
    assert!(matches!(
        stale,
        Err(PlacementError::ConsumerGenerationConflict {
            expected: Some(0),
            actual: Some(1),
            ..
        })
    ));

    let unguarded = api.replace_allocations(&[allocations(consumer, None, &[(&cn, "VCPU", 4)])]);
    assert!(matches!(
        unguarded,
        Err(PlacementError::ConsumerGenerationConflict { .. })
    ));

    api.replace_allocations(&[allocations(consumer, Some(1), &[(&cn, "VCPU", 4)])])
        .unwrap();
    assert_eq!(api.get_consumer(&consumer).unwrap().generation, 2);
    assert_eq!(api.get_provider_usages(&cn.uuid).unwrap()["VCPU"], 4);
}

#[test]
fn test_expecting_an_absent_consumer_conflicts() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let consumer = Uuid::new_v4();
    let result = api.replace_allocations(&[allocations(consumer, Some(3), &[(&cn, "VCPU", 1)])]);
    assert!(matches!(
        result,
        Err(PlacementError::ConsumerGenerationConflict { actual: None, .. })
    ));
    assert!(api.get_consumer(&consumer).is_err());
}

#[test]
fn test_failed_claim_removes_auto_created_consumer() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 2)]);
    let consumer = Uuid::new_v4();
    let result = api.replace_allocations(&[allocations(consumer, None, &[(&cn, "VCPU", 3)])]);
    assert!(matches!(
        result,
        Err(PlacementError::InvalidAllocationCapacityExceeded { .. })
    ));
    assert!(matches!(
        api.get_consumer(&consumer),
        Err(PlacementError::ConsumerNotFound(_))
    ));
    assert!(api.get_allocations_for_provider(&cn.uuid).unwrap().is_empty());
}

#[test]
fn test_multi_consumer_replacement_is_atomic() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 4)]);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let result = api.replace_allocations(&[
        allocations(first, None, &[(&cn, "VCPU", 3)]),
        allocations(second, None, &[(&cn, "VCPU", 3)]),
    ]);
    assert!(result.is_err());
    assert!(api.get_allocations_for_consumer(&first).unwrap().is_empty());
    assert!(api.get_consumer(&first).is_err());
    assert!(api.get_consumer(&second).is_err());
}

#[test]
fn test_claims_bump_provider_generation() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let before = api.get_provider(&cn.uuid).unwrap().generation;
    let consumer = claim(&api, &[(&cn, "VCPU", 1)]);
    assert_eq!(api.get_provider(&cn.uuid).unwrap().generation, before + 1);

    api.delete_allocations_for_consumer(&consumer).unwrap();
    assert_eq!(api.get_provider(&cn.uuid).unwrap().generation, before + 2);
    assert!(api.get_consumer(&consumer).is_err());
}

#[test]
fn test_emptied_consumer_is_deleted() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let consumer = claim(&api, &[(&cn, "VCPU", 1)]);
    api.replace_allocations(&[allocations(consumer, Some(1), &[])])
        .unwrap();
    assert!(api.get_consumer(&consumer).is_err());
}

#[test]
fn test_project_and_user_usages() {
    let api = api();
    let cn = provider(
        &api,
        "cn1",
        None,
        &[Inventory::new("VCPU", 8), Inventory::new("MEMORY_MB", 2048)],
    );
    claim(&api, &[(&cn, "VCPU", 2), (&cn, "MEMORY_MB", 512)]);
    claim(&api, &[(&cn, "VCPU", 1)]);

    let usages = api.get_project_usages("project", None, None).unwrap();
    assert_eq!(usages["VCPU"], 3);
    assert_eq!(usages["MEMORY_MB"], 512);
    assert_eq!(
        api.get_project_usages("project", Some("user"), Some("unknown"))
            .unwrap()["VCPU"],
        3
    );
    assert!(api
        .get_project_usages("other-project", None, None)
        .unwrap()
        .is_empty());
}

#[test]
fn test_reshape_moves_claims_into_child() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let numa = provider(&api, "numa0", Some(&cn), &[]);
    let consumer = claim(&api, &[(&cn, "VCPU", 4)]);

    let cn = api.get_provider(&cn.uuid).unwrap();
    api.reshape(
        &[
            ProviderInventories {
                provider_uuid: cn.uuid,
                generation: cn.generation,
                inventories: vec![],
            },
            ProviderInventories {
                provider_uuid: numa.uuid,
                generation: numa.generation,
                inventories: vec![Inventory::new("VCPU", 8)],
            },
        ],
        &[allocations(consumer, Some(1), &[(&numa, "VCPU", 4)])],
    )
    .unwrap();

    assert!(api.get_inventories(&cn.uuid).unwrap().is_empty());
    assert_eq!(api.get_provider_usages(&numa.uuid).unwrap()["VCPU"], 4);
    assert_eq!(api.get_tree_usages(&cn.uuid).unwrap()["VCPU"], 4);
    assert_eq!(api.get_consumer(&consumer).unwrap().generation, 2);
}

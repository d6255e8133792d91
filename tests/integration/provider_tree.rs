//! Provider tree structure, registry management and persistence

use crate::integration::test_utils::{api, api_at, claim, provider};
use placement::objects::inventory::Inventory;
use placement::objects::provider::{NewProvider, ProviderFilters, ProviderUpdate};
use placement::objects::traits::TraitFilter;
use placement::PlacementError;
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;
use uuid::Uuid;

#[test]
fn test_tree_roots_and_reparenting_rules() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[]);
    let numa = provider(&api, "numa0", Some(&cn), &[]);
    let mut pf = provider(&api, "pf0", None, &[]);
    let pf_child = provider(&api, "pf0-vf", Some(&pf), &[]);
    assert_eq!(numa.root_provider_uuid, cn.uuid);

    // Attaching a rootless provider moves its whole subtree.
    api.update_provider(
        &mut pf,
        ProviderUpdate {
            name: "pf0".to_string(),
            parent_provider_uuid: Some(numa.uuid),
        },
    )
    .unwrap();
    assert_eq!(pf.root_provider_uuid, cn.uuid);
    assert_eq!(
        api.get_provider(&pf_child.uuid).unwrap().root_provider_uuid,
        cn.uuid
    );
    assert_eq!(api.get_provider_tree(&cn.uuid).unwrap().len(), 4);

    let mut moved = api.get_provider(&pf.uuid).unwrap();
    let err = api
        .update_provider(
            &mut moved,
            ProviderUpdate {
                name: "pf0".to_string(),
                parent_provider_uuid: Some(cn.uuid),
            },
        )
        .unwrap_err();
    assert!(matches!(err, PlacementError::ObjectActionError { .. }));

    let err = api
        .update_provider(
            &mut moved,
            ProviderUpdate {
                name: "pf0".to_string(),
                parent_provider_uuid: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, PlacementError::ObjectActionError { .. }));
}

#[test]
fn test_attaching_into_own_tree_is_a_loop() {
    let api = api();
    let mut root = provider(&api, "cn1", None, &[]);
    let child = provider(&api, "numa0", Some(&root), &[]);
    let err = api
        .update_provider(
            &mut root,
            ProviderUpdate {
                name: "cn1".to_string(),
                parent_provider_uuid: Some(child.uuid),
            },
        )
        .unwrap_err();
    assert!(matches!(err, PlacementError::ObjectActionError { .. }));
}

#[test]
fn test_delete_rules() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let numa = provider(&api, "numa0", Some(&cn), &[Inventory::new("VCPU", 4)]);

    assert!(matches!(
        api.delete_provider(&cn),
        Err(PlacementError::CannotDeleteParentProvider(_))
    ));

    let consumer = claim(&api, &[(&numa, "VCPU", 1)]);
    assert!(matches!(
        api.delete_provider(&numa),
        Err(PlacementError::ProviderInUse(_))
    ));

    api.delete_allocations_for_consumer(&consumer).unwrap();
    api.delete_provider(&numa).unwrap();
    api.delete_provider(&cn).unwrap();
    assert!(matches!(
        api.get_provider(&cn.uuid),
        Err(PlacementError::ProviderNotFound(_))
    ));
}

#[test]
fn test_duplicate_names_and_uuids() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[]);
    assert!(matches!(
        api.create_provider(NewProvider::new("cn1")),
        Err(PlacementError::ProviderExists(_))
    ));
    assert!(matches!(
        api.create_provider(NewProvider::new("cn2").with_uuid(cn.uuid)),
        Err(PlacementError::ProviderExists(_))
    ));
    assert!(matches!(
        api.create_provider(NewProvider::new("cn3").with_parent(Uuid::new_v4())),
        Err(PlacementError::ObjectActionError { .. }) | Err(PlacementError::ProviderNotFound(_))
    ));
}

#[test]
fn test_list_providers_with_filters() {
    let api = api();
    let aggregate = Uuid::new_v4();
    let mut ssd = provider(&api, "ssd-node", None, &[Inventory::new("DISK_GB", 500)]);
    api.set_provider_traits(&mut ssd, &["STORAGE_DISK_SSD".to_string()])
        .unwrap();
    api.set_provider_aggregates(&mut ssd, &[aggregate]).unwrap();
    let hdd = provider(&api, "hdd-node", None, &[Inventory::new("DISK_GB", 50)]);

    let filters = ProviderFilters {
        required_traits: vec![BTreeSet::from(["STORAGE_DISK_SSD".to_string()])],
        ..ProviderFilters::default()
    };
    let names: Vec<String> = api
        .list_providers(&filters)
        .unwrap()
        .into_iter()
        .map(|rp| rp.name)
        .collect();
    assert_eq!(names, vec!["ssd-node".to_string()]);

    let filters = ProviderFilters {
        resources: BTreeMap::from([("DISK_GB".to_string(), 100)]),
        ..ProviderFilters::default()
    };
    assert_eq!(api.list_providers(&filters).unwrap()[0].uuid, ssd.uuid);

    let filters = ProviderFilters {
        forbidden_aggregates: BTreeSet::from([aggregate]),
        ..ProviderFilters::default()
    };
    assert_eq!(api.list_providers(&filters).unwrap()[0].uuid, hdd.uuid);
    assert_eq!(api.list_providers(&ProviderFilters::default()).unwrap().len(), 2);
}

#[test]
fn test_custom_resource_class_lifecycle() {
    let api = api();
    let gold = api.create_resource_class("CUSTOM_GOLD").unwrap();
    assert!(gold.id >= placement::types::FIRST_CUSTOM_RESOURCE_CLASS_ID);
    assert!(matches!(
        api.create_resource_class("CUSTOM_GOLD"),
        Err(PlacementError::ResourceClassExists(_))
    ));

    let mut cn = provider(&api, "cn1", None, &[]);
    api.add_inventory(&mut cn, &Inventory::new("CUSTOM_GOLD", 3))
        .unwrap();
    assert!(matches!(
        api.delete_resource_class("CUSTOM_GOLD"),
        Err(PlacementError::ResourceClassInUse(_))
    ));
    assert!(matches!(
        api.delete_resource_class("VCPU"),
        Err(PlacementError::ResourceClassCannotDeleteStandard(_))
    ));

    api.delete_inventory(&mut cn, "CUSTOM_GOLD").unwrap();
    let renamed = api
        .update_resource_class("CUSTOM_GOLD", "CUSTOM_PLATINUM")
        .unwrap();
    assert_eq!(renamed.id, gold.id);
    api.delete_resource_class("CUSTOM_PLATINUM").unwrap();
}

#[test]
fn test_custom_traits() {
    let api = api();
    api.create_trait("CUSTOM_FAST").unwrap();
    let mut cn = provider(&api, "cn1", None, &[]);
    api.set_provider_traits(&mut cn, &["CUSTOM_FAST".to_string()])
        .unwrap();

    let associated = api
        .list_traits(&TraitFilter {
            name_prefix: Some("CUSTOM_".to_string()),
            associated: Some(true),
        })
        .unwrap();
    assert_eq!(associated.len(), 1);
    assert!(matches!(
        api.delete_trait("CUSTOM_FAST"),
        Err(PlacementError::TraitInUse(_))
    ));
    assert!(matches!(
        api.set_provider_traits(&mut cn, &["CUSTOM_MISSING".to_string()]),
        Err(PlacementError::TraitNotFound(_))
    ));
}

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let (cn_uuid, consumer) = {
        let api = api_at(dir.path());
        let mut cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
        api.set_provider_traits(&mut cn, &["HW_CPU_X86_AVX".to_string()])
            .unwrap();
        let consumer = claim(&api, &[(&cn, "VCPU", 3)]);
        api.database().flush().unwrap();
        (cn.uuid, consumer)
    };

    let api = api_at(dir.path());
    let cn = api.get_provider(&cn_uuid).unwrap();
    assert_eq!(cn.name, "cn1");
    assert_eq!(api.get_inventory(&cn_uuid, "VCPU").unwrap().total, 8);
    assert_eq!(api.get_provider_traits(&cn_uuid).unwrap(), vec!["HW_CPU_X86_AVX".to_string()]);
    assert_eq!(api.get_allocations_for_consumer(&consumer).unwrap().len(), 1);
    assert_eq!(api.get_provider_usages(&cn_uuid).unwrap()["VCPU"], 3);
}

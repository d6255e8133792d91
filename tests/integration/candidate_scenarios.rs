//! End-to-end allocation candidate scenarios

use crate::integration::test_utils::{api, claim, provider};
use placement::objects::inventory::Inventory;
use placement::types::MISC_SHARES_VIA_AGGREGATE;
use placement::{
    CandidateQuery, CandidateSettings, GenerationStrategy, GroupPolicy, PlacementApi,
    PlacementConfig, RequestGroup,
};
use std::collections::BTreeSet;
use uuid::Uuid;

fn compute_query(vcpu: i64, memory_mb: i64) -> CandidateQuery {
    CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", vcpu)
            .with_resource("MEMORY_MB", memory_mb),
    )
}

#[test]
fn test_single_root_provider_with_summary() {
    let api = api();
    let cn = provider(
        &api,
        "cn1",
        None,
        &[
            Inventory::new("VCPU", 16).with_allocation_ratio(2.0),
            Inventory::new("MEMORY_MB", 4096).with_reserved(512),
        ],
    );
    claim(&api, &[(&cn, "VCPU", 4)]);

    let found = api.get_allocation_candidates(&compute_query(2, 1024)).unwrap();
    assert_eq!(found.len(), 1);
    let request = &found.allocation_requests[0];
    assert_eq!(request.anchor_root_provider_uuid, cn.uuid);
    assert_eq!(request.mappings[""], BTreeSet::from([cn.uuid]));

    let summary = &found.provider_summaries[&cn.uuid];
    let vcpu = summary.resource("VCPU").unwrap();
    assert_eq!(vcpu.capacity, 32);
    assert_eq!(vcpu.used, 4);
    assert_eq!(summary.resource("MEMORY_MB").unwrap().capacity, 3584);
    assert_eq!(summary.root_provider_uuid, cn.uuid);
    assert!(summary.parent_provider_uuid.is_none());
}

#[test]
fn test_fully_used_provider_yields_nothing() {
    let api = api();
    let cn = provider(
        &api,
        "cn1",
        None,
        &[Inventory::new("VCPU", 2), Inventory::new("MEMORY_MB", 1024)],
    );
    claim(&api, &[(&cn, "VCPU", 2)]);
    assert!(api
        .get_allocation_candidates(&compute_query(1, 128))
        .unwrap()
        .is_empty());
}

#[test]
fn test_amount_constraints_filter_providers() {
    let api = api();
    provider(
        &api,
        "cn1",
        None,
        &[Inventory::new("DISK_GB", 100).with_step_size(10).with_max_unit(50)],
    );
    let query = |amount| {
        CandidateQuery::new().with_group("", RequestGroup::unnumbered().with_resource("DISK_GB", amount))
    };
    assert_eq!(api.get_allocation_candidates(&query(20)).unwrap().len(), 1);
    assert!(api.get_allocation_candidates(&query(25)).unwrap().is_empty());
    assert!(api.get_allocation_candidates(&query(60)).unwrap().is_empty());
}

#[test]
fn test_nested_root_and_child() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("MEMORY_MB", 4096)]);
    let numa0 = provider(&api, "numa0", Some(&cn), &[Inventory::new("VCPU", 4)]);
    let numa1 = provider(&api, "numa1", Some(&cn), &[Inventory::new("VCPU", 4)]);

    let found = api.get_allocation_candidates(&compute_query(2, 1024)).unwrap();
    assert_eq!(found.len(), 2);
    let vcpu_providers: BTreeSet<Uuid> = found
        .allocation_requests
        .iter()
        .flat_map(|r| r.resource_requests.iter())
        .filter(|r| r.resource_class == "VCPU")
        .map(|r| r.provider_uuid)
        .collect();
    assert_eq!(vcpu_providers, BTreeSet::from([numa0.uuid, numa1.uuid]));
    for request in &found.allocation_requests {
        assert_eq!(request.anchor_root_provider_uuid, cn.uuid);
        assert_eq!(request.amount(&cn.uuid, "MEMORY_MB"), 1024);
    }
    assert_eq!(found.provider_summaries.len(), 3);
    assert_eq!(
        found.provider_summaries[&numa0.uuid].parent_provider_uuid,
        Some(cn.uuid)
    );
}

#[test]
fn test_in_tree_restricts_to_one_tree() {
    let api = api();
    let cn1 = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let numa = provider(&api, "numa", Some(&cn1), &[Inventory::new("VCPU", 8)]);
    provider(&api, "cn2", None, &[Inventory::new("VCPU", 8)]);

    let query = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .in_tree(numa.uuid),
    );
    let found = api.get_allocation_candidates(&query).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found
        .allocation_requests
        .iter()
        .all(|r| r.anchor_root_provider_uuid == cn1.uuid));
}

#[test]
fn test_trait_union_across_tree() {
    let api = api();
    let mut cn = provider(&api, "cn1", None, &[Inventory::new("MEMORY_MB", 4096)]);
    api.set_provider_traits(&mut cn, &["HW_NUMA_ROOT".to_string()])
        .unwrap();
    let mut numa = provider(&api, "numa0", Some(&cn), &[Inventory::new("VCPU", 4)]);
    api.set_provider_traits(&mut numa, &["HW_CPU_X86_AVX2".to_string()])
        .unwrap();

    let both = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .with_resource("MEMORY_MB", 256)
            .require_trait("HW_CPU_X86_AVX2")
            .require_trait("HW_NUMA_ROOT"),
    );
    assert_eq!(api.get_allocation_candidates(&both).unwrap().len(), 1);

    let forbidden = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .with_resource("MEMORY_MB", 256)
            .forbid_trait("HW_CPU_X86_AVX2"),
    );
    assert!(api.get_allocation_candidates(&forbidden).unwrap().is_empty());
}

#[test]
fn test_aggregate_and_of_or_sets() {
    let api = api();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let mut in_a_b = provider(&api, "in-a-b", None, &[Inventory::new("VCPU", 8)]);
    api.set_provider_aggregates(&mut in_a_b, &[a, b]).unwrap();
    let mut in_a = provider(&api, "in-a", None, &[Inventory::new("VCPU", 8)]);
    api.set_provider_aggregates(&mut in_a, &[a]).unwrap();
    let mut in_c = provider(&api, "in-c", None, &[Inventory::new("VCPU", 8)]);
    api.set_provider_aggregates(&mut in_c, &[c]).unwrap();
    let mut in_a_c = provider(&api, "in-a-c", None, &[Inventory::new("VCPU", 8)]);
    api.set_provider_aggregates(&mut in_a_c, &[a, c]).unwrap();

    let query = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .member_of([a])
            .member_of([b, c]),
    );
    let found = api.get_allocation_candidates(&query).unwrap();
    let anchors: BTreeSet<Uuid> = found
        .allocation_requests
        .iter()
        .map(|r| r.anchor_root_provider_uuid)
        .collect();
    assert_eq!(anchors, BTreeSet::from([in_a_b.uuid, in_a_c.uuid]));

    let excluded = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .member_of([a])
            .forbid_aggregate(c),
    );
    let found = api.get_allocation_candidates(&excluded).unwrap();
    let anchors: BTreeSet<Uuid> = found
        .allocation_requests
        .iter()
        .map(|r| r.anchor_root_provider_uuid)
        .collect();
    assert_eq!(anchors, BTreeSet::from([in_a_b.uuid, in_a.uuid]));
}

#[test]
fn test_shared_storage_serves_every_compute_node_in_aggregate() {
    let api = api();
    let aggregate = Uuid::new_v4();
    let mut computes = Vec::new();
    for name in ["cn1", "cn2"] {
        let mut cn = provider(&api, name, None, &[Inventory::new("VCPU", 8)]);
        api.set_provider_aggregates(&mut cn, &[aggregate]).unwrap();
        computes.push(cn);
    }
    provider(&api, "cn-outside", None, &[Inventory::new("VCPU", 8)]);
    let mut storage = provider(&api, "ss", None, &[Inventory::new("DISK_GB", 2000)]);
    api.set_provider_aggregates(&mut storage, &[aggregate]).unwrap();
    api.set_provider_traits(&mut storage, &[MISC_SHARES_VIA_AGGREGATE.to_string()])
        .unwrap();

    let query = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .with_resource("DISK_GB", 100),
    );
    let found = api.get_allocation_candidates(&query).unwrap();
    assert_eq!(found.len(), 2);
    for (request, cn) in found.allocation_requests.iter().zip(&computes) {
        assert_eq!(request.anchor_root_provider_uuid, cn.uuid);
        assert_eq!(request.amount(&storage.uuid, "DISK_GB"), 100);
        assert_eq!(request.amount(&cn.uuid, "VCPU"), 1);
    }
    assert_eq!(found.provider_summaries.len(), 3);
}

#[test]
fn test_sharing_provider_alone_anchors_into_each_tree() {
    let api = api();
    let aggregate = Uuid::new_v4();
    let mut cn = provider(&api, "cn1", None, &[]);
    api.set_provider_aggregates(&mut cn, &[aggregate]).unwrap();
    let mut storage = provider(&api, "ss", None, &[Inventory::new("DISK_GB", 2000)]);
    api.set_provider_aggregates(&mut storage, &[aggregate]).unwrap();
    api.set_provider_traits(&mut storage, &[MISC_SHARES_VIA_AGGREGATE.to_string()])
        .unwrap();

    let query = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered().with_resource("DISK_GB", 10),
    );
    let anchors: BTreeSet<Uuid> = api
        .get_allocation_candidates(&query)
        .unwrap()
        .allocation_requests
        .iter()
        .map(|r| r.anchor_root_provider_uuid)
        .collect();
    assert_eq!(anchors, BTreeSet::from([cn.uuid, storage.uuid]));
}

#[test]
fn test_isolated_numbered_groups() {
    let api = api();
    let cn = provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let pf1 = provider(&api, "pf1", Some(&cn), &[Inventory::new("SRIOV_NET_VF", 2)]);
    let pf2 = provider(&api, "pf2", Some(&cn), &[Inventory::new("SRIOV_NET_VF", 2)]);

    let query = CandidateQuery::new()
        .with_group("", RequestGroup::unnumbered().with_resource("VCPU", 2))
        .with_group("_NET1", RequestGroup::numbered().with_resource("SRIOV_NET_VF", 1))
        .with_group("_NET2", RequestGroup::numbered().with_resource("SRIOV_NET_VF", 1))
        .with_group_policy(GroupPolicy::Isolate);
    let found = api.get_allocation_candidates(&query).unwrap();
    assert_eq!(found.len(), 2);
    for request in &found.allocation_requests {
        assert!(!request.use_same_provider);
        assert_eq!(request.amount(&cn.uuid, "VCPU"), 2);
        assert_eq!(request.amount(&pf1.uuid, "SRIOV_NET_VF"), 1);
        assert_eq!(request.amount(&pf2.uuid, "SRIOV_NET_VF"), 1);
        assert_ne!(request.mappings["_NET1"], request.mappings["_NET2"]);
        assert_eq!(request.mappings[""], BTreeSet::from([cn.uuid]));
    }
}

#[test]
fn test_consolidated_amounts_are_rechecked() {
    let api = api();
    provider(&api, "cn1", None, &[Inventory::new("VCPU", 8)]);
    let query = CandidateQuery::new()
        .with_group("1", RequestGroup::numbered().with_resource("VCPU", 5))
        .with_group("2", RequestGroup::numbered().with_resource("VCPU", 5))
        .with_group_policy(GroupPolicy::None);
    assert!(api.get_allocation_candidates(&query).unwrap().is_empty());
}

#[test]
fn test_breadth_first_bounded_is_subset_of_exhaustive() {
    let exhaustive = api();
    let mut config = PlacementConfig::temporary();
    config.placement.allocation_candidates_generation_strategy = GenerationStrategy::BreadthFirst;
    config.placement.max_allocation_candidates = 3;
    let bounded = PlacementApi::from_config(&config).unwrap();
    assert_eq!(
        *bounded.settings(),
        CandidateSettings {
            randomize: false,
            strategy: GenerationStrategy::BreadthFirst,
            max_candidates: Some(3),
        }
    );

    for api in [&exhaustive, &bounded] {
        for name in ["cn1", "cn2", "cn3"] {
            let cn = provider(api, name, None, &[Inventory::new("MEMORY_MB", 1024)]);
            provider(api, &format!("{}-numa0", name), Some(&cn), &[Inventory::new("VCPU", 4)]);
            provider(api, &format!("{}-numa1", name), Some(&cn), &[Inventory::new("VCPU", 4)]);
        }
    }

    let all = exhaustive.get_allocation_candidates(&compute_query(1, 64)).unwrap();
    let some = bounded.get_allocation_candidates(&compute_query(1, 64)).unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(some.len(), 3);
    let anchors: BTreeSet<String> = some
        .allocation_requests
        .iter()
        .map(|r| some.provider_summaries[&r.anchor_root_provider_uuid].name.clone())
        .collect();
    assert_eq!(anchors.len(), 3, "breadth-first visits every tree first");

    let all_names: BTreeSet<Vec<(String, String, i64)>> = all
        .allocation_requests
        .iter()
        .map(|r| named(&all, r))
        .collect();
    for request in &some.allocation_requests {
        assert!(all_names.contains(&named(&some, request)));
    }
}

fn named(
    found: &placement::AllocationCandidates,
    request: &placement::AllocationRequest,
) -> Vec<(String, String, i64)> {
    let mut out: Vec<(String, String, i64)> = request
        .resource_requests
        .iter()
        .map(|r| {
            (
                found.provider_summaries[&r.provider_uuid].name.clone(),
                r.resource_class.clone(),
                r.amount,
            )
        })
        .collect();
    out.sort();
    out
}

#[test]
fn test_limit_truncates_and_prunes_summaries() {
    let api = api();
    for name in ["cn1", "cn2", "cn3", "cn4"] {
        provider(
            &api,
            name,
            None,
            &[Inventory::new("VCPU", 4), Inventory::new("MEMORY_MB", 1024)],
        );
    }
    let found = api
        .get_allocation_candidates(&compute_query(1, 64).with_limit(2))
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found.provider_summaries.len(), 2);
    for request in &found.allocation_requests {
        assert!(found
            .provider_summaries
            .contains_key(&request.anchor_root_provider_uuid));
    }
}

#[test]
fn test_invalid_queries_are_bad_requests() {
    let api = api();
    let unknown_trait = CandidateQuery::new().with_group(
        "",
        RequestGroup::unnumbered()
            .with_resource("VCPU", 1)
            .require_trait("CUSTOM_NOPE"),
    );
    let err = api.get_allocation_candidates(&unknown_trait).unwrap_err();
    assert_eq!(err.kind(), placement::ErrorKind::BadRequest);

    let no_policy = CandidateQuery::new()
        .with_group("1", RequestGroup::numbered().with_resource("VCPU", 1))
        .with_group("2", RequestGroup::numbered().with_resource("VCPU", 1));
    let err = api.get_allocation_candidates(&no_policy).unwrap_err();
    assert_eq!(err.kind(), placement::ErrorKind::BadRequest);
}

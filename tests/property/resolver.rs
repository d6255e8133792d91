//! Candidate soundness over randomly loaded provider trees

use placement::candidates::{CandidateQuery, RequestGroup};
use placement::objects::allocation::{AllocationSpec, ConsumerAllocations};
use placement::objects::inventory::Inventory;
use placement::objects::provider::{NewProvider, ResourceProvider};
use placement::{PlacementApi, PlacementConfig};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Total and pre-claimed usage for one provider's VCPU inventory.
#[derive(Debug, Clone)]
struct Load {
    total: i64,
    used: i64,
}

fn load() -> impl Strategy<Value = Load> {
    (1i64..16).prop_flat_map(|total| (Just(total), 0..=total)).prop_map(|(total, used)| Load { total, used })
}

fn claim(api: &PlacementApi, rp: &ResourceProvider, class: &str, used: i64) {
    if used == 0 {
        return;
    }
    api.replace_allocations(&[ConsumerAllocations {
        consumer_uuid: Uuid::new_v4(),
        project_id: "project".to_string(),
        user_id: "user".to_string(),
        consumer_type: None,
        consumer_generation: None,
        allocations: vec![AllocationSpec::new(rp.uuid, class, used)],
    }])
    .unwrap();
}

fn loaded_provider(
    api: &PlacementApi,
    name: &str,
    parent: Option<Uuid>,
    inventories: &[(&str, &Load)],
) -> ResourceProvider {
    let mut new = NewProvider::new(name);
    if let Some(parent) = parent {
        new = new.with_parent(parent);
    }
    let mut rp = api.create_provider(new).unwrap();
    let records: Vec<Inventory> = inventories
        .iter()
        .map(|(class, load)| Inventory::new(*class, load.total))
        .collect();
    api.set_inventory(&mut rp, &records).unwrap();
    for (class, load) in inventories {
        claim(api, &rp, class, load.used);
    }
    rp
}

/// Every returned request fits the remaining capacity, and some request is
/// returned exactly when a fitting placement exists.
#[test]
fn test_candidates_respect_remaining_capacity() {
    let mut runner = TestRunner::new(Config {
        cases: 48,
        ..Config::default()
    });

    let inputs = (
        load(),
        load(),
        prop::collection::vec(load(), 0..3),
        1i64..12,
        1i64..12,
    );

    runner
        .run(&inputs, |(root_cpu, root_mem, children, vcpus, memory)| {
            let api = PlacementApi::from_config(&PlacementConfig::temporary()).unwrap();
            let root = loaded_provider(
                &api,
                "cn",
                None,
                &[("VCPU", &root_cpu), ("MEMORY_MB", &root_mem)],
            );
            let mut free: BTreeMap<Uuid, (i64, i64)> = BTreeMap::new();
            free.insert(root.uuid, (root_cpu.total - root_cpu.used, root_cpu.total));
            for (i, load) in children.iter().enumerate() {
                let child = loaded_provider(
                    &api,
                    &format!("numa{}", i),
                    Some(root.uuid),
                    &[("VCPU", load)],
                );
                free.insert(child.uuid, (load.total - load.used, load.total));
            }

            let query = CandidateQuery::new().with_group(
                "",
                RequestGroup::unnumbered()
                    .with_resource("VCPU", vcpus)
                    .with_resource("MEMORY_MB", memory),
            );
            let found = api.get_allocation_candidates(&query).unwrap();

            for request in &found.allocation_requests {
                prop_assert_eq!(request.anchor_root_provider_uuid, root.uuid);
                prop_assert_eq!(request.amount(&root.uuid, "MEMORY_MB"), memory);
                let mut cpu_total = 0;
                for resource in &request.resource_requests {
                    let summary = &found.provider_summaries[&resource.provider_uuid];
                    let usage = summary.resource(&resource.resource_class).unwrap();
                    prop_assert!(usage.used + resource.amount <= usage.capacity);
                    prop_assert!(resource.amount <= usage.max_unit);
                    if resource.resource_class == "VCPU" {
                        cpu_total += resource.amount;
                    }
                }
                prop_assert_eq!(cpu_total, vcpus);
            }

            let cpu_fits = free
                .values()
                .any(|(left, max_unit)| vcpus <= *left && vcpus <= *max_unit);
            let memory_fits = memory <= root_mem.total - root_mem.used;
            prop_assert_eq!(!found.is_empty(), cpu_fits && memory_fits);
            Ok(())
        })
        .unwrap();
}

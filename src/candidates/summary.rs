//! Provider summaries returned beside allocation requests.

use crate::candidates::research::Research;
use crate::candidates::Candidate;
use crate::types::{Generation, ProviderId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Capacity and usage of one class on a summarized provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummaryResource {
    pub resource_class: String,
    pub capacity: i64,
    pub used: i64,
    pub max_unit: i64,
}

/// State of one provider belonging to a tree some candidate touches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub uuid: Uuid,
    pub name: String,
    pub generation: Generation,
    pub parent_provider_uuid: Option<Uuid>,
    pub root_provider_uuid: Uuid,
    pub resources: Vec<ProviderSummaryResource>,
    pub traits: Vec<String>,
}

impl ProviderSummary {
    pub fn resource(&self, resource_class: &str) -> Option<&ProviderSummaryResource> {
        self.resources
            .iter()
            .find(|resource| resource.resource_class == resource_class)
    }
}

/// Roots of every tree a candidate uses a provider from or is anchored at.
fn touched_trees(research: &Research<'_>, candidates: &[Candidate]) -> BTreeSet<ProviderId> {
    let mut roots = BTreeSet::new();
    for candidate in candidates {
        roots.insert(candidate.anchor);
        for (rp, _, _) in &candidate.resources {
            roots.insert(research.root_of(*rp));
        }
    }
    roots
}

/// Summaries for every member of the trees touched by `candidates`.
pub(crate) fn summarize(
    research: &Research<'_>,
    candidates: &[Candidate],
) -> BTreeMap<Uuid, ProviderSummary> {
    let tables = research.tables();
    let mut summaries = BTreeMap::new();
    for root in touched_trees(research, candidates) {
        for member in tables.tree_members(root) {
            let Some(row) = tables.provider(member) else {
                continue;
            };
            let parent_provider_uuid = row
                .parent_id
                .and_then(|parent| tables.provider(parent))
                .map(|parent| parent.uuid);
            let root_provider_uuid = tables.provider(row.root_id).map_or(row.uuid, |root| root.uuid);
            let resources = tables
                .inventories_of(member)
                .filter_map(|inv| {
                    let class = tables.resource_class(inv.resource_class_id)?;
                    Some(ProviderSummaryResource {
                        resource_class: class.name.clone(),
                        capacity: inv.capacity(),
                        used: tables.usage(member, inv.resource_class_id),
                        max_unit: inv.max_unit,
                    })
                })
                .collect();
            summaries.insert(
                row.uuid,
                ProviderSummary {
                    uuid: row.uuid,
                    name: row.name.clone(),
                    generation: row.generation,
                    parent_provider_uuid,
                    root_provider_uuid,
                    resources,
                    traits: research.trait_names(member),
                },
            );
        }
    }
    summaries
}

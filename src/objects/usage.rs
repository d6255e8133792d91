//! Usage reporting

use crate::error::PlacementError;
use crate::store::Tables;
use crate::types::ResourceClassId;
use std::collections::BTreeMap;
use uuid::Uuid;

fn class_name(tables: &Tables, id: ResourceClassId) -> String {
    tables
        .resource_class(id)
        .map(|rc| rc.name.clone())
        .unwrap_or_default()
}

/// Used amount per class for every class the provider has inventory of.
pub fn for_provider(tables: &Tables, provider_uuid: &Uuid) -> Result<BTreeMap<String, i64>, PlacementError> {
    let provider = tables
        .provider_by_uuid(provider_uuid)
        .ok_or(PlacementError::ProviderNotFound(*provider_uuid))?;
    Ok(tables
        .inventories_of(provider.id)
        .map(|inv| {
            (
                class_name(tables, inv.resource_class_id),
                tables.usage(provider.id, inv.resource_class_id),
            )
        })
        .collect())
}

/// Used amount per class summed over the whole tree containing the provider.
pub fn for_tree(tables: &Tables, provider_uuid: &Uuid) -> Result<BTreeMap<String, i64>, PlacementError> {
    let provider = tables
        .provider_by_uuid(provider_uuid)
        .ok_or(PlacementError::ProviderNotFound(*provider_uuid))?;
    let mut usages = BTreeMap::new();
    for member in tables.tree_members(provider.root_id) {
        for inv in tables.inventories_of(member) {
            let total = usages
                .entry(class_name(tables, inv.resource_class_id))
                .or_insert(0i64);
            *total = total.saturating_add(tables.usage(member, inv.resource_class_id));
        }
    }
    Ok(usages)
}

/// Total allocated per class for a project, optionally narrowed to one user
/// and/or one consumer type. Unknown names yield an empty report.
pub fn for_project(
    tables: &Tables,
    project_id: &str,
    user_id: Option<&str>,
    consumer_type: Option<&str>,
) -> BTreeMap<String, i64> {
    let mut usages = BTreeMap::new();
    let Some(project) = tables.project_by_external_id(project_id) else {
        return usages;
    };
    let user = match user_id {
        Some(external) => match tables.user_by_external_id(external) {
            Some(row) => Some(row.id),
            None => return usages,
        },
        None => None,
    };
    let kind = match consumer_type {
        Some(name) => match tables.consumer_type_by_name(name) {
            Some(row) => Some(row.id),
            None => return usages,
        },
        None => None,
    };

    for consumer in tables.consumers.iter().filter(|c| {
        c.project_id == project.id
            && user.map_or(true, |id| c.user_id == id)
            && kind.map_or(true, |id| c.consumer_type_id == id)
    }) {
        for alloc in tables.allocations_of_consumer(consumer.id) {
            let total = usages
                .entry(class_name(tables, alloc.resource_class_id))
                .or_insert(0i64);
            *total = total.saturating_add(alloc.used);
        }
    }
    usages
}

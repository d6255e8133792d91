//! Resource class registry
//!
//! Standard classes come from the catalog; custom classes carry the
//! `CUSTOM_` prefix and take ids from 10000 upward.

use crate::error::{PlacementError, StorageError};
use crate::objects::{insert_or_reread, Lookup};
use crate::registry::is_standard_resource_class;
use crate::store::{Database, ResourceClassRow, Tables};
use crate::types::{is_valid_custom_name, ResourceClassId, FIRST_CUSTOM_RESOURCE_CLASS_ID};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// Attempts made to claim a free custom id before giving up.
pub const MAX_ID_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceClass {
    pub id: ResourceClassId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ResourceClassRow> for ResourceClass {
    fn from(row: &ResourceClassRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            created_at: row.created_at,
        }
    }
}

pub fn get_by_name(tables: &Tables, name: &str) -> Result<ResourceClass, PlacementError> {
    tables
        .resource_class_by_name(name)
        .map(ResourceClass::from)
        .ok_or_else(|| PlacementError::ResourceClassNotFound(name.to_string()))
}

/// Every resource class, ordered by id.
pub fn list(tables: &Tables) -> Vec<ResourceClass> {
    tables
        .resource_classes
        .iter()
        .map(ResourceClass::from)
        .collect()
}

fn next_custom_id(tables: &Tables) -> ResourceClassId {
    tables
        .resource_classes
        .iter()
        .map(|rc| rc.id)
        .filter(|id| *id >= FIRST_CUSTOM_RESOURCE_CLASS_ID)
        .max()
        .map_or(FIRST_CUSTOM_RESOURCE_CLASS_ID, |max| max + 1)
}

fn check_custom_name(name: &str) -> Result<(), PlacementError> {
    if is_valid_custom_name(name) {
        Ok(())
    } else {
        Err(PlacementError::InvalidRequest(format!(
            "resource class name {} must start with CUSTOM_ and contain only A-Z, 0-9 and _",
            name
        )))
    }
}

/// Create a custom resource class.
pub fn create(db: &Database, name: &str) -> Result<ResourceClass, PlacementError> {
    create_with_id_source(db, name, next_custom_id)
}

/// Claim an id picked from a snapshot, retrying when a concurrent writer
/// took it first.
pub(crate) fn create_with_id_source<F>(
    db: &Database,
    name: &str,
    mut pick_id: F,
) -> Result<ResourceClass, PlacementError>
where
    F: FnMut(&Tables) -> ResourceClassId,
{
    check_custom_name(name)?;
    for attempt in 1..=MAX_ID_RETRIES {
        let snapshot = db.snapshot();
        if snapshot.resource_class_by_name(name).is_some() {
            return Err(PlacementError::ResourceClassExists(name.to_string()));
        }
        let row = ResourceClassRow {
            id: pick_id(&snapshot),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let result = db.write(|tx| {
            tx.insert(row.clone())?;
            Ok::<_, StorageError>(())
        });
        match result {
            Ok(()) => {
                info!(id = row.id, name = %name, "Created resource class");
                return Ok(ResourceClass::from(&row));
            }
            Err(err) if err.is_duplicate_on("name") => {
                return Err(PlacementError::ResourceClassExists(name.to_string()));
            }
            Err(err) if err.is_duplicate_on("id") => {
                debug!(attempt, id = row.id, "Resource class id already taken, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(PlacementError::MaxRetriesExceeded {
        action: format!("create resource class {}", name),
        retries: MAX_ID_RETRIES,
    })
}

/// Get-or-create a resource class. Standard names must already be synced.
pub fn ensure(db: &Database, name: &str) -> Result<Lookup<ResourceClass>, PlacementError> {
    if let Ok(existing) = get_by_name(&db.snapshot(), name) {
        return Ok(Lookup::Found(existing));
    }
    if is_standard_resource_class(name) {
        return Err(PlacementError::ResourceClassNotFound(name.to_string()));
    }
    insert_or_reread(
        || create(db, name),
        || get_by_name(&db.snapshot(), name).ok(),
    )
}

/// Rename a custom resource class.
pub fn update(db: &Database, name: &str, new_name: &str) -> Result<ResourceClass, PlacementError> {
    if is_standard_resource_class(name) {
        return Err(PlacementError::ResourceClassCannotUpdateStandard(name.to_string()));
    }
    check_custom_name(new_name)?;
    let renamed = db.write(|tx| {
        let mut row = tx
            .tables()
            .resource_class_by_name(name)
            .cloned()
            .ok_or_else(|| PlacementError::ResourceClassNotFound(name.to_string()))?;
        row.name = new_name.to_string();
        tx.update(row.clone()).map_err(|err| {
            if err.is_duplicate_on("name") {
                PlacementError::ResourceClassExists(new_name.to_string())
            } else {
                err.into()
            }
        })?;
        Ok::<_, PlacementError>(row)
    })?;
    info!(from = %name, to = %new_name, "Renamed resource class");
    Ok(ResourceClass::from(&renamed))
}

/// Delete a custom resource class no provider has inventory for.
pub fn destroy(db: &Database, name: &str) -> Result<(), PlacementError> {
    if is_standard_resource_class(name) {
        return Err(PlacementError::ResourceClassCannotDeleteStandard(name.to_string()));
    }
    db.write(|tx| {
        let id = tx
            .tables()
            .resource_class_by_name(name)
            .map(|rc| rc.id)
            .ok_or_else(|| PlacementError::ResourceClassNotFound(name.to_string()))?;
        if tx.tables().class_has_inventory(id) {
            return Err(PlacementError::ResourceClassInUse(name.to_string()));
        }
        tx.delete::<ResourceClassRow>(&id)?;
        Ok(())
    })?;
    info!(name = %name, "Deleted resource class");
    Ok(())
}

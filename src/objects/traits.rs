//! Trait registry and provider trait associations

use crate::error::PlacementError;
use crate::objects::provider::{increment_generation_in_tx, ResourceProvider};
use crate::objects::{insert_or_reread, Lookup};
use crate::registry::is_standard_trait;
use crate::store::{Database, ProviderTraitRow, Tables, TraitRow};
use crate::types::{is_valid_custom_name, TraitId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trait {
    pub id: TraitId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&TraitRow> for Trait {
    fn from(row: &TraitRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraitFilter {
    pub name_prefix: Option<String>,
    /// `Some(true)`: only traits linked to a provider; `Some(false)`: only unlinked ones.
    pub associated: Option<bool>,
}

pub fn get_by_name(tables: &Tables, name: &str) -> Result<Trait, PlacementError> {
    tables
        .trait_by_name(name)
        .map(Trait::from)
        .ok_or_else(|| PlacementError::TraitNotFound(name.to_string()))
}

/// Traits matching `filter`, ordered by name.
pub fn list(tables: &Tables, filter: &TraitFilter) -> Vec<Trait> {
    let mut traits: Vec<Trait> = tables
        .traits
        .iter()
        .filter(|row| {
            filter
                .name_prefix
                .as_deref()
                .map_or(true, |prefix| row.name.starts_with(prefix))
        })
        .filter(|row| {
            filter.associated.map_or(true, |wanted| {
                tables.providers_with_trait(row.id).next().is_some() == wanted
            })
        })
        .map(Trait::from)
        .collect();
    traits.sort_by(|a, b| a.name.cmp(&b.name));
    traits
}

/// Create a custom trait.
pub fn create(db: &Database, name: &str) -> Result<Trait, PlacementError> {
    if !is_valid_custom_name(name) {
        return Err(PlacementError::InvalidRequest(format!(
            "trait name {} must start with CUSTOM_ and contain only A-Z, 0-9 and _",
            name
        )));
    }
    let created = db.write(|tx| {
        let row = TraitRow {
            id: tx.next_id::<TraitRow>(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tx.insert(row.clone()).map_err(|err| {
            if err.is_duplicate_on("name") {
                PlacementError::TraitExists(name.to_string())
            } else {
                err.into()
            }
        })?;
        Ok::<_, PlacementError>(Trait::from(&row))
    })?;
    info!(name = %name, "Created trait");
    Ok(created)
}

/// Get-or-create a custom trait.
pub fn ensure(db: &Database, name: &str) -> Result<Lookup<Trait>, PlacementError> {
    if let Ok(existing) = get_by_name(&db.snapshot(), name) {
        return Ok(Lookup::Found(existing));
    }
    insert_or_reread(
        || create(db, name),
        || get_by_name(&db.snapshot(), name).ok(),
    )
}

/// Delete a custom trait that no provider carries.
pub fn destroy(db: &Database, name: &str) -> Result<(), PlacementError> {
    if is_standard_trait(name) {
        return Err(PlacementError::TraitCannotDeleteStandard(name.to_string()));
    }
    db.write(|tx| {
        let id = tx
            .tables()
            .trait_by_name(name)
            .map(|row| row.id)
            .ok_or_else(|| PlacementError::TraitNotFound(name.to_string()))?;
        if tx.tables().providers_with_trait(id).next().is_some() {
            return Err(PlacementError::TraitInUse(name.to_string()));
        }
        tx.delete::<TraitRow>(&id)?;
        Ok(())
    })?;
    info!(name = %name, "Deleted trait");
    Ok(())
}

/// Names of the traits a provider carries, sorted.
pub fn get_for_provider(tables: &Tables, provider_uuid: &Uuid) -> Result<Vec<String>, PlacementError> {
    let provider = tables
        .provider_by_uuid(provider_uuid)
        .ok_or(PlacementError::ProviderNotFound(*provider_uuid))?;
    let mut names: Vec<String> = tables
        .trait_ids_of(provider.id)
        .filter_map(|id| tables.trait_row(id))
        .map(|row| row.name.clone())
        .collect();
    names.sort();
    Ok(names)
}

/// Replace the provider's traits with `names`; every name must exist.
pub fn set_traits(
    db: &Database,
    provider: &mut ResourceProvider,
    names: &[String],
) -> Result<(), PlacementError> {
    db.write(|tx| {
        let mut wanted = BTreeSet::new();
        let mut missing = Vec::new();
        for name in names {
            match tx.tables().trait_by_name(name) {
                Some(row) => {
                    wanted.insert(row.id);
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(PlacementError::TraitNotFound(missing.join(", ")));
        }

        let current: BTreeSet<TraitId> = tx.tables().trait_ids_of(provider.id).collect();
        for trait_id in current.difference(&wanted) {
            tx.delete::<ProviderTraitRow>(&(provider.id, *trait_id))?;
        }
        for trait_id in wanted.difference(&current) {
            tx.insert(ProviderTraitRow {
                provider_id: provider.id,
                trait_id: *trait_id,
            })?;
        }
        increment_generation_in_tx(tx, provider.id, provider.generation)?;
        provider.refresh(tx.tables());
        Ok(())
    })
}

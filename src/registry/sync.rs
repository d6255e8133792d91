//! One-time synchronization of the standard catalog into the store.

use crate::error::PlacementError;
use crate::registry::catalog::{STANDARD_RESOURCE_CLASSES, STANDARD_TRAITS};
use crate::store::{Database, ResourceClassRow, TraitRow, Transaction};
use crate::types::ResourceClassId;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Merges the standard resource classes and traits into the store at most
/// once per instance.
///
/// The service is owned by whoever owns the [`Database`] (normally
/// `PlacementApi`) and shared by reference; there is no process-global state.
#[derive(Debug, Default)]
pub struct StandardSync {
    synced: AtomicBool,
    lock: Mutex<()>,
}

impl StandardSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Insert any missing standard names. Cheap after the first success.
    pub fn ensure_synced(&self, db: &Database) -> Result<(), PlacementError> {
        if self.is_synced() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        if self.is_synced() {
            return Ok(());
        }

        let (classes, traits) = db.write(|tx| -> Result<(usize, usize), PlacementError> {
            Ok((sync_resource_classes(tx)?, sync_traits(tx)?))
        })?;
        self.synced.store(true, Ordering::Release);
        info!(
            resource_classes = classes,
            traits = traits,
            "Synchronized standard resource classes and traits"
        );
        Ok(())
    }
}

fn sync_resource_classes(tx: &mut Transaction) -> Result<usize, PlacementError> {
    let mut inserted = 0;
    for (index, name) in STANDARD_RESOURCE_CLASSES.iter().enumerate() {
        if tx.tables().resource_class_by_name(name).is_some() {
            continue;
        }
        let row = ResourceClassRow {
            id: index as ResourceClassId,
            name: (*name).to_string(),
            created_at: Utc::now(),
        };
        match tx.insert(row) {
            Ok(()) => inserted += 1,
            // Someone else already wrote it; that is as good as writing it.
            Err(err) if err.is_duplicate() => {
                debug!(resource_class = %name, "Standard resource class already present");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(inserted)
}

fn sync_traits(tx: &mut Transaction) -> Result<usize, PlacementError> {
    let mut inserted = 0;
    for name in STANDARD_TRAITS {
        if tx.tables().trait_by_name(name).is_some() {
            continue;
        }
        let row = TraitRow {
            id: tx.next_id::<TraitRow>(),
            name: (*name).to_string(),
            created_at: Utc::now(),
        };
        match tx.insert(row) {
            Ok(()) => inserted += 1,
            Err(err) if err.is_duplicate() => {
                debug!(trait_name = %name, "Standard trait already present");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(inserted)
}

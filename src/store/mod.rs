//! Placement Store
//!
//! Relational tables for providers, inventories, allocations, consumers,
//! traits, aggregates and resource classes, persisted row by row in sled.
//!
//! Readers take an immutable [`Snapshot`] and never block writers. Writers are
//! serialized; each runs against a private copy of the tables and either
//! publishes all of its changes or none of them.

pub mod persistence;
pub mod rows;
pub mod tables;
pub mod transaction;

pub use persistence::SledPersistence;
pub use rows::{
    AggregateRow, AllocationRow, ConsumerRow, ConsumerTypeRow, InventoryRow, ProjectRow,
    ProviderAggregateRow, ProviderRow, ProviderTraitRow, ResourceClassRow, Row, TraitRow, UserRow,
};
pub use tables::{Table, Tables};
pub use transaction::Transaction;

use crate::error::StorageError;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;

/// Consistent, immutable view of every table
pub type Snapshot = Arc<Tables>;

/// Shared handle to the placement tables
pub struct Database {
    persistence: SledPersistence,
    current: RwLock<Snapshot>,
    writer: Mutex<()>,
}

impl Database {
    /// Open the database stored at `path`, loading every table into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_persistence(SledPersistence::open(path)?)
    }

    /// Open a throwaway database backed by a temporary sled instance.
    pub fn temporary() -> Result<Self, StorageError> {
        Self::with_persistence(SledPersistence::temporary()?)
    }

    fn with_persistence(persistence: SledPersistence) -> Result<Self, StorageError> {
        let tables = persistence.load()?;
        Ok(Self {
            persistence,
            current: RwLock::new(Arc::new(tables)),
            writer: Mutex::new(()),
        })
    }

    /// Current committed state.
    pub fn snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    /// Run `f` as one atomic write transaction.
    ///
    /// On `Ok` the transaction's changes are persisted and published together;
    /// on `Err` they are discarded.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        let _guard = self.writer.lock();
        let base = self.snapshot();
        let mut tx = Transaction::new((*base).clone());
        let value = f(&mut tx)?;
        let (tables, journal) = tx.into_parts();
        if journal.is_empty() {
            return Ok(value);
        }
        tables.check_touched(&journal.touched)?;
        self.persistence.apply(&journal)?;
        *self.current.write() = Arc::new(tables);
        Ok(value)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.persistence.flush()
    }
}

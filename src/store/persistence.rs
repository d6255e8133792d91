//! Persistence layer for the placement tables

use crate::error::{to_storage_data, to_storage_io, StorageError};
use crate::store::rows::{
    AggregateRow, AllocationRow, ConsumerRow, ConsumerTypeRow, InventoryRow, ProjectRow,
    ProviderAggregateRow, ProviderRow, ProviderTraitRow, ResourceClassRow, Row, TraitRow, UserRow,
};
use crate::store::tables::Tables;
use crate::store::transaction::Journal;
use std::path::Path;
use tracing::debug;

/// Sled-backed row persistence
///
/// Every row is stored under `<table>:<key>`; a committed transaction is
/// written as one `sled::Batch`, which sled applies atomically.
pub struct SledPersistence {
    db: sled::Db,
}

impl SledPersistence {
    /// Open (or create) a sled database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Ok(Self { db })
    }

    /// Open a sled database that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(to_storage_io)?;
        Ok(Self { db })
    }

    /// Read every table back into memory.
    pub fn load(&self) -> Result<Tables, StorageError> {
        let mut tables = Tables::default();
        self.load_table::<ProviderRow>(&mut tables)?;
        self.load_table::<InventoryRow>(&mut tables)?;
        self.load_table::<AllocationRow>(&mut tables)?;
        self.load_table::<ConsumerRow>(&mut tables)?;
        self.load_table::<ProjectRow>(&mut tables)?;
        self.load_table::<UserRow>(&mut tables)?;
        self.load_table::<ConsumerTypeRow>(&mut tables)?;
        self.load_table::<TraitRow>(&mut tables)?;
        self.load_table::<ResourceClassRow>(&mut tables)?;
        self.load_table::<AggregateRow>(&mut tables)?;
        self.load_table::<ProviderTraitRow>(&mut tables)?;
        self.load_table::<ProviderAggregateRow>(&mut tables)?;
        tables.check_integrity()?;
        Ok(tables)
    }

    fn load_table<R: Row>(&self, tables: &mut Tables) -> Result<(), StorageError> {
        let prefix = format!("{}:", R::TABLE);
        let mut count = 0usize;
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item.map_err(to_storage_io)?;
            let row: R = bincode::deserialize(&value).map_err(to_storage_data)?;
            tables.load(row);
            count += 1;
        }
        debug!(table = R::TABLE, rows = count, "Loaded table");
        Ok(())
    }

    /// Apply a committed transaction's journal atomically.
    pub(crate) fn apply(&self, journal: &Journal) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, value) in &journal.entries {
            match value {
                Some(bytes) => batch.insert(key.as_bytes(), bytes.as_slice()),
                None => batch.remove(key.as_bytes()),
            }
        }
        self.db.apply_batch(batch).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to apply batch: {}", e),
            ))
        })?;
        Ok(())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to flush database: {}", e),
            ))
        })?;
        Ok(())
    }
}

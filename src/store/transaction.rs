//! Write transactions
//!
//! A transaction mutates a private copy of the tables and journals every row
//! change so the commit can be persisted as a single atomic batch.

use crate::error::{to_storage_data, StorageError};
use crate::store::rows::Row;
use crate::store::tables::{Tables, Touched};

/// Ordered list of row writes made by one transaction.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    pub(crate) entries: Vec<(String, Option<Vec<u8>>)>,
    pub(crate) touched: Touched,
}

impl Journal {
    fn encode<R: Row>(row: &R) -> Result<(String, Option<Vec<u8>>), StorageError> {
        let value = bincode::serialize(row).map_err(to_storage_data)?;
        Ok((R::storage_key(&row.key()), Some(value)))
    }

    fn delete<R: Row>(&mut self, key: &R::Key) {
        self.entries.push((R::storage_key(key), None));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle passed to `Database::write` closures.
pub struct Transaction {
    tables: Tables,
    journal: Journal,
}

impl Transaction {
    pub(crate) fn new(tables: Tables) -> Self {
        Self {
            tables,
            journal: Journal::default(),
        }
    }

    /// Current state as seen by this transaction, including its own writes.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Insert a new row; a failed insert leaves the transaction untouched.
    pub fn insert<R: Row>(&mut self, row: R) -> Result<(), StorageError> {
        let entry = Journal::encode(&row)?;
        row.touch(&mut self.journal.touched);
        self.tables.insert(row)?;
        self.journal.entries.push(entry);
        Ok(())
    }

    pub fn update<R: Row>(&mut self, row: R) -> Result<(), StorageError> {
        let entry = Journal::encode(&row)?;
        row.touch(&mut self.journal.touched);
        self.tables.update(row)?;
        self.journal.entries.push(entry);
        Ok(())
    }

    pub fn delete<R: Row>(&mut self, key: &R::Key) -> Result<R, StorageError> {
        let removed = self.tables.delete::<R>(key)?;
        removed.touch(&mut self.journal.touched);
        self.journal.delete::<R>(key);
        Ok(removed)
    }

    /// Next auto-increment id for a table keyed by a single integer.
    pub fn next_id<R: Row<Key = i64>>(&self) -> i64 {
        R::table(&self.tables).next_id()
    }

    pub(crate) fn into_parts(self) -> (Tables, Journal) {
        (self.tables, self.journal)
    }
}

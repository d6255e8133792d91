//! Placement objects
//!
//! Read and write paths for every entity in the data model. Reads take a
//! snapshot (`&Tables`); writes take the `Database` and run one or more
//! transactions.

pub mod aggregate;
pub mod allocation;
pub mod consumer;
pub mod inventory;
pub mod provider;
pub mod reshape;
pub mod resource_class;
pub mod traits;
pub mod usage;

use crate::error::PlacementError;

/// Outcome of a get-or-create operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The record already existed (possibly created by a concurrent caller).
    Found(T),
    /// This call inserted the record.
    Created(T),
}

impl<T> Lookup<T> {
    pub fn into_inner(self) -> T {
        match self {
            Lookup::Found(value) | Lookup::Created(value) => value,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Lookup::Found(value) | Lookup::Created(value) => value,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Lookup::Created(_))
    }
}

/// Insert a record; if a concurrent caller won the uniqueness race, re-read
/// theirs instead.
///
/// `insert` must report the race with an error for which
/// [`PlacementError::is_creation_race`] holds. If the re-read still finds
/// nothing the original error is returned.
pub(crate) fn insert_or_reread<T, I, R>(insert: I, reread: R) -> Result<Lookup<T>, PlacementError>
where
    I: FnOnce() -> Result<T, PlacementError>,
    R: FnOnce() -> Option<T>,
{
    match insert() {
        Ok(created) => Ok(Lookup::Created(created)),
        Err(err) if err.is_creation_race() => match reread() {
            Some(existing) => Ok(Lookup::Found(existing)),
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

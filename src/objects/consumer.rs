//! Consumers and the project, user and consumer type records they reference

use crate::error::PlacementError;
use crate::objects::{insert_or_reread, Lookup};
use crate::store::{
    ConsumerRow, ConsumerTypeRow, Database, ProjectRow, Tables, Transaction, UserRow,
};
use crate::types::{ConsumerId, ConsumerTypeId, Generation, ProjectId, UserId, UNKNOWN_CONSUMER_TYPE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerType {
    pub id: ConsumerTypeId,
    pub name: String,
}

/// A consumer with its project, user and type resolved to external names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consumer {
    #[serde(skip)]
    pub id: ConsumerId,
    pub uuid: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub consumer_type: String,
    pub generation: Generation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consumer {
    pub(crate) fn from_row(tables: &Tables, row: &ConsumerRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            project_id: tables
                .project(row.project_id)
                .map(|p| p.external_id.clone())
                .unwrap_or_default(),
            user_id: tables
                .user(row.user_id)
                .map(|u| u.external_id.clone())
                .unwrap_or_default(),
            consumer_type: tables
                .consumer_type(row.consumer_type_id)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| UNKNOWN_CONSUMER_TYPE.to_string()),
            generation: row.generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub fn get_by_uuid(tables: &Tables, uuid: &Uuid) -> Result<Consumer, PlacementError> {
    tables
        .consumer_by_uuid(uuid)
        .map(|row| Consumer::from_row(tables, row))
        .ok_or(PlacementError::ConsumerNotFound(*uuid))
}

fn lookup_project(tables: &Tables, external_id: &str) -> Option<Project> {
    tables.project_by_external_id(external_id).map(|row| Project {
        id: row.id,
        external_id: row.external_id.clone(),
    })
}

fn lookup_user(tables: &Tables, external_id: &str) -> Option<User> {
    tables.user_by_external_id(external_id).map(|row| User {
        id: row.id,
        external_id: row.external_id.clone(),
    })
}

fn lookup_consumer_type(tables: &Tables, name: &str) -> Option<ConsumerType> {
    tables.consumer_type_by_name(name).map(|row| ConsumerType {
        id: row.id,
        name: row.name.clone(),
    })
}

pub fn ensure_project(db: &Database, external_id: &str) -> Result<Lookup<Project>, PlacementError> {
    if let Some(found) = lookup_project(&db.snapshot(), external_id) {
        return Ok(Lookup::Found(found));
    }
    insert_or_reread(
        || {
            db.write(|tx| {
                let row = ProjectRow {
                    id: tx.next_id::<ProjectRow>(),
                    external_id: external_id.to_string(),
                };
                tx.insert(row.clone()).map_err(|err| {
                    if err.is_duplicate_on("external_id") {
                        PlacementError::ProjectExists(external_id.to_string())
                    } else {
                        err.into()
                    }
                })?;
                Ok(Project {
                    id: row.id,
                    external_id: row.external_id,
                })
            })
        },
        || lookup_project(&db.snapshot(), external_id),
    )
}

pub fn ensure_user(db: &Database, external_id: &str) -> Result<Lookup<User>, PlacementError> {
    if let Some(found) = lookup_user(&db.snapshot(), external_id) {
        return Ok(Lookup::Found(found));
    }
    insert_or_reread(
        || {
            db.write(|tx| {
                let row = UserRow {
                    id: tx.next_id::<UserRow>(),
                    external_id: external_id.to_string(),
                };
                tx.insert(row.clone()).map_err(|err| {
                    if err.is_duplicate_on("external_id") {
                        PlacementError::UserExists(external_id.to_string())
                    } else {
                        err.into()
                    }
                })?;
                Ok(User {
                    id: row.id,
                    external_id: row.external_id,
                })
            })
        },
        || lookup_user(&db.snapshot(), external_id),
    )
}

pub fn ensure_consumer_type(
    db: &Database,
    name: &str,
) -> Result<Lookup<ConsumerType>, PlacementError> {
    if let Some(found) = lookup_consumer_type(&db.snapshot(), name) {
        return Ok(Lookup::Found(found));
    }
    insert_or_reread(
        || {
            db.write(|tx| {
                let row = ConsumerTypeRow {
                    id: tx.next_id::<ConsumerTypeRow>(),
                    name: name.to_string(),
                };
                tx.insert(row.clone()).map_err(|err| {
                    if err.is_duplicate_on("name") {
                        PlacementError::ConsumerTypeExists(name.to_string())
                    } else {
                        err.into()
                    }
                })?;
                Ok(ConsumerType {
                    id: row.id,
                    name: row.name,
                })
            })
        },
        || lookup_consumer_type(&db.snapshot(), name),
    )
}

/// Identity a caller supplies alongside a consumer's allocations.
#[derive(Debug, Clone)]
pub struct ConsumerIdentity<'a> {
    pub uuid: Uuid,
    pub project_id: &'a str,
    pub user_id: &'a str,
    pub consumer_type: Option<&'a str>,
    /// Generation the caller last saw; `None` when it expects a new consumer.
    pub generation: Option<Generation>,
}

/// A consumer resolved (or created) ahead of an allocation transaction.
#[derive(Debug, Clone)]
pub(crate) struct EnsuredConsumer {
    pub(crate) id: ConsumerId,
    pub(crate) uuid: Uuid,
    pub(crate) generation: Generation,
    pub(crate) created: bool,
    /// New (project, user, type) to record when the stored ones differ.
    pub(crate) pending_attributes: Option<(ProjectId, UserId, ConsumerTypeId)>,
}

fn create_consumer(
    db: &Database,
    uuid: Uuid,
    project_id: ProjectId,
    user_id: UserId,
    consumer_type_id: ConsumerTypeId,
) -> Result<ConsumerRow, PlacementError> {
    db.write(|tx| {
        let now = Utc::now();
        let row = ConsumerRow {
            id: tx.next_id::<ConsumerRow>(),
            uuid,
            project_id,
            user_id,
            consumer_type_id,
            generation: 0,
            created_at: now,
            updated_at: now,
        };
        tx.insert(row.clone()).map_err(|err| {
            if err.is_duplicate_on("uuid") {
                PlacementError::ConsumerExists(uuid)
            } else {
                err.into()
            }
        })?;
        Ok(row)
    })
}

/// Resolve or create the consumer and its project, user and type, checking
/// the caller's generation expectation.
///
/// Every creation here commits on its own; the caller is responsible for
/// deleting a created consumer if the follow-up transaction fails.
pub(crate) fn ensure_consumer(
    db: &Database,
    identity: &ConsumerIdentity<'_>,
) -> Result<EnsuredConsumer, PlacementError> {
    let project = ensure_project(db, identity.project_id)?.into_inner();
    let user = ensure_user(db, identity.user_id)?.into_inner();
    let consumer_type = ensure_consumer_type(
        db,
        identity.consumer_type.unwrap_or(UNKNOWN_CONSUMER_TYPE),
    )?
    .into_inner();

    let existing = db.snapshot().consumer_by_uuid(&identity.uuid).cloned();
    let lookup = match existing {
        Some(row) => Lookup::Found(row),
        None => {
            if let Some(expected) = identity.generation {
                return Err(PlacementError::ConsumerGenerationConflict {
                    consumer: identity.uuid,
                    expected: Some(expected),
                    actual: None,
                });
            }
            insert_or_reread(
                || create_consumer(db, identity.uuid, project.id, user.id, consumer_type.id),
                || db.snapshot().consumer_by_uuid(&identity.uuid).cloned(),
            )?
        }
    };

    match lookup {
        Lookup::Created(row) => {
            debug!(consumer = %row.uuid, "Created consumer");
            Ok(EnsuredConsumer {
                id: row.id,
                uuid: row.uuid,
                generation: row.generation,
                created: true,
                pending_attributes: None,
            })
        }
        Lookup::Found(row) => {
            if identity.generation != Some(row.generation) {
                return Err(PlacementError::ConsumerGenerationConflict {
                    consumer: row.uuid,
                    expected: identity.generation,
                    actual: Some(row.generation),
                });
            }
            let attributes = (project.id, user.id, consumer_type.id);
            let pending_attributes = (attributes
                != (row.project_id, row.user_id, row.consumer_type_id))
                .then_some(attributes);
            Ok(EnsuredConsumer {
                id: row.id,
                uuid: row.uuid,
                generation: row.generation,
                created: false,
                pending_attributes,
            })
        }
    }
}

/// Record changed project, user or type within the allocation transaction.
pub(crate) fn apply_attributes_in_tx(
    tx: &mut Transaction,
    consumer: &EnsuredConsumer,
) -> Result<(), PlacementError> {
    let Some((project_id, user_id, consumer_type_id)) = consumer.pending_attributes else {
        return Ok(());
    };
    let mut row = tx
        .tables()
        .consumer(consumer.id)
        .cloned()
        .ok_or(PlacementError::ConcurrentUpdateDetected)?;
    row.project_id = project_id;
    row.user_id = user_id;
    row.consumer_type_id = consumer_type_id;
    row.updated_at = Utc::now();
    tx.update(row)?;
    Ok(())
}

/// Bump a consumer's generation inside `tx`, provided it still equals `known`.
pub(crate) fn increment_generation_in_tx(
    tx: &mut Transaction,
    id: ConsumerId,
    known: Generation,
) -> Result<Generation, PlacementError> {
    let mut row = match tx.tables().consumer(id) {
        Some(row) if row.generation == known => row.clone(),
        _ => return Err(PlacementError::ConcurrentUpdateDetected),
    };
    row.generation = known + 1;
    row.updated_at = Utc::now();
    let generation = row.generation;
    tx.update(row)?;
    Ok(generation)
}

/// Compensation for a failed allocation write: remove consumers created for
/// it that still hold no allocations.
pub(crate) fn delete_created_consumers(db: &Database, consumers: &[EnsuredConsumer]) {
    let created: Vec<&EnsuredConsumer> = consumers.iter().filter(|c| c.created).collect();
    if created.is_empty() {
        return;
    }
    let result = db.write(|tx| {
        let mut deleted = Vec::new();
        for consumer in &created {
            let unused = tx.tables().consumer(consumer.id).is_some()
                && tx.tables().allocations_of_consumer(consumer.id).next().is_none();
            if unused {
                tx.delete::<ConsumerRow>(&consumer.id)?;
                deleted.push(consumer.uuid);
            }
        }
        Ok::<_, PlacementError>(deleted)
    });
    match result {
        Ok(deleted) => {
            for uuid in deleted {
                warn!(consumer = %uuid, "Deleted consumer created for a failed allocation write");
            }
        }
        Err(err) => {
            warn!(error = %err, "Failed to delete consumers created for a failed allocation write");
        }
    }
}

//! MVCC version records and the write log.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Lifecycle status of one stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Written by a pipeline that has not committed yet.
    Partial,
    /// A live committed value.
    Complete,
    /// Terminal marker written by delete.
    Deleted,
}

/// One version of an entity.
///
/// The payload is present for every status except [`Status::Deleted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccEntity {
    id: Id,
    version: Version,
    status: Status,
    entity: Option<Entity>,
}

impl MvccEntity {
    /// An uncommitted version carrying `entity`.
    #[must_use]
    pub fn partial(entity: Entity, version: Version) -> Self {
        Self::with_payload(entity, version, Status::Partial)
    }

    /// A committed version carrying `entity`.
    #[must_use]
    pub fn complete(entity: Entity, version: Version) -> Self {
        Self::with_payload(entity, version, Status::Complete)
    }

    /// A delete marker.
    #[must_use]
    pub fn deleted(id: Id, version: Version) -> Self {
        Self {
            id,
            version,
            status: Status::Deleted,
            entity: None,
        }
    }

    fn with_payload(entity: Entity, version: Version, status: Status) -> Self {
        Self {
            id: entity.id().clone(),
            version,
            status,
            entity: Some(entity),
        }
    }

    /// Rebuilds a record read from storage, checking the payload invariant.
    pub(crate) fn from_parts(
        id: Id,
        version: Version,
        status: Status,
        entity: Option<Entity>,
    ) -> CoreResult<Self> {
        match (status, &entity) {
            (Status::Deleted, None) => Ok(Self::deleted(id, version)),
            (Status::Partial | Status::Complete, Some(_)) => Ok(Self {
                id,
                version,
                status,
                entity,
            }),
            _ => Err(CoreError::invalid_operation(format!(
                "version {version} of {id} has status {status:?} with inconsistent payload"
            ))),
        }
    }

    /// The entity id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// The payload, absent for delete markers.
    #[must_use]
    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    /// The payload if this is a live committed value.
    #[must_use]
    pub fn into_live(self) -> Option<Entity> {
        match self.status {
            Status::Complete => self.entity,
            Status::Partial | Status::Deleted => None,
        }
    }
}

/// Progress of one write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// The write began; its payload is not visible.
    Started,
    /// The payload write succeeded; the version is live.
    Committed,
    /// The write was abandoned and cleaned up.
    RolledBack,
}

/// Append-only record of a write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Entity written.
    pub id: Id,
    /// Version of the attempt.
    pub version: Version,
    /// How far the attempt got.
    pub stage: Stage,
}

impl LogEntry {
    /// Creates a log entry.
    #[must_use]
    pub const fn new(id: Id, version: Version, stage: Stage) -> Self {
        Self { id, version, stage }
    }
}

//! Entity identifiers.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of an entity independent of its version.
///
/// An id is the pair (uuid, entity type). It is valid when the uuid is not
/// nil and the type is not empty, and it never changes once assigned.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id {
    uuid: Uuid,
    entity_type: String,
}

impl Id {
    /// Creates an id from its parts.
    #[must_use]
    pub fn new(uuid: Uuid, entity_type: impl Into<String>) -> Self {
        Self {
            uuid,
            entity_type: entity_type.into(),
        }
    }

    /// Creates an id with a fresh random uuid.
    #[must_use]
    pub fn generate(entity_type: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), entity_type)
    }

    /// An id with a nil uuid, to be assigned on first write.
    #[must_use]
    pub fn unassigned(entity_type: impl Into<String>) -> Self {
        Self::new(Uuid::nil(), entity_type)
    }

    /// The uuid part.
    #[inline]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The entity type part.
    #[inline]
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns true if the uuid is nil.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.uuid.is_nil()
    }

    /// Checks that the id can address a stored entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for a nil uuid or an empty type.
    pub fn validate(&self) -> CoreResult<()> {
        if self.entity_type.trim().is_empty() {
            return Err(CoreError::validation(format!(
                "id {} has an empty entity type",
                self.uuid
            )));
        }
        if self.uuid.is_nil() {
            return Err(CoreError::validation(format!(
                "id of type '{}' has a nil uuid",
                self.entity_type
            )));
        }
        Ok(())
    }

    pub(crate) fn with_uuid(&self, uuid: Uuid) -> Self {
        Self::new(uuid, self.entity_type.clone())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}:{})", self.entity_type, self.uuid)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.uuid)
    }
}

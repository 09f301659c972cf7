//! Tenancy scopes.

use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition of all stored data.
///
/// A scope is the triple (organization, owner, name). Two scopes are equal
/// only when all three parts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    organization: Id,
    owner: Id,
    name: String,
}

impl Scope {
    /// Creates a validated scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if either id is invalid or the name
    /// is empty.
    pub fn new(organization: Id, owner: Id, name: impl Into<String>) -> CoreResult<Self> {
        let scope = Self {
            organization,
            owner,
            name: name.into(),
        };
        scope.validate()?;
        Ok(scope)
    }

    /// The organization id.
    #[must_use]
    pub fn organization(&self) -> &Id {
        &self.organization
    }

    /// The owner id.
    #[must_use]
    pub fn owner(&self) -> &Id {
        &self.owner
    }

    /// The scope name, usually a collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Moves the scope to a new owner.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `owner` is invalid; the scope is
    /// left unchanged in that case.
    pub fn set_owner(&mut self, owner: Id) -> CoreResult<()> {
        owner
            .validate()
            .map_err(|e| CoreError::validation(format!("scope owner: {e}")))?;
        self.owner = owner;
        Ok(())
    }

    /// Checks every part of the scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] describing the first invalid part.
    pub fn validate(&self) -> CoreResult<()> {
        self.organization
            .validate()
            .map_err(|e| CoreError::validation(format!("scope organization: {e}")))?;
        self.owner
            .validate()
            .map_err(|e| CoreError::validation(format!("scope owner: {e}")))?;
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("scope name must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.owner, self.name)
    }
}

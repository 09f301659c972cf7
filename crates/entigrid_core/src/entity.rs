//! Entity value type.

use crate::id::Id;
use crate::version::Version;
use entigrid_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed bag of properties with an identity and a version.
///
/// `version`, `created` and `modified` are assigned by the write pipeline.
/// An entity read back from a collection always carries all three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    id: Id,
    version: Option<Version>,
    created: Option<u64>,
    modified: Option<u64>,
    properties: BTreeMap<String, Value>,
}

impl Entity {
    /// Creates an entity of `entity_type` whose uuid is assigned on first write.
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::with_id(Id::unassigned(entity_type))
    }

    /// Creates an entity with a known id.
    #[must_use]
    pub fn with_id(id: Id) -> Self {
        Self {
            id,
            version: None,
            created: None,
            modified: None,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// The entity id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Version of the committed write this value came from.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Creation time in unix milliseconds.
    #[must_use]
    pub fn created(&self) -> Option<u64> {
        self.created
    }

    /// Last modification time in unix milliseconds.
    #[must_use]
    pub fn modified(&self) -> Option<u64> {
        self.modified
    }

    /// Reads a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Sets a property, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    /// Removes a property, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    /// All properties, sorted by name.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Replaces the version this entity is based on.
    ///
    /// An update carrying a version fails if the stored entity has moved past it.
    pub fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    pub(crate) fn assign_id(&mut self, id: Id) {
        self.id = id;
    }

    pub(crate) fn stamp(&mut self, version: Version, created: Option<u64>) {
        let modified = version.millis();
        self.version = Some(version);
        self.modified = Some(modified);
        self.created = Some(created.unwrap_or(modified));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_properties() {
        let entity = Entity::new("user").property("name", "ann").property("age", 31);
        assert_eq!(entity.get("name"), Some(&Value::from("ann")));
        assert_eq!(entity.get("age"), Some(&Value::Integer(31)));
        assert!(entity.id().is_unassigned());
        assert!(entity.version().is_none());
    }

    #[test]
    fn set_and_remove() {
        let mut entity = Entity::new("user");
        assert!(entity.set("a", 1).is_none());
        assert_eq!(entity.set("a", 2), Some(Value::Integer(1)));
        assert_eq!(entity.remove("a"), Some(Value::Integer(2)));
        assert!(entity.properties().is_empty());
    }

    #[test]
    fn stamp_keeps_created() {
        let mut entity = Entity::new("user");
        let version = Version::from_parts(2_000, 0, [0; 8]);
        entity.stamp(version, Some(1_000));
        assert_eq!(entity.version(), Some(version));
        assert_eq!(entity.created(), Some(1_000));
        assert_eq!(entity.modified(), Some(2_000));

        let mut fresh = Entity::new("user");
        fresh.stamp(version, None);
        assert_eq!(fresh.created(), Some(2_000));
    }
}

//! Per-type property declarations.

use std::collections::{BTreeSet, HashMap};

/// Declares which properties of each entity type are unique within a scope.
///
/// ```rust
/// use entigrid_core::Schema;
///
/// let schema = Schema::new().unique("user", "email").unique("user", "username");
/// assert!(schema.is_unique("user", "email"));
/// assert!(!schema.is_unique("device", "email"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schema {
    unique: HashMap<String, BTreeSet<String>>,
}

impl Schema {
    /// Creates a schema without unique properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `property` of `entity_type` unique.
    #[must_use]
    pub fn unique(mut self, entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        self.unique
            .entry(entity_type.into())
            .or_default()
            .insert(property.into());
        self
    }

    /// Returns true if `property` of `entity_type` is unique.
    #[must_use]
    pub fn is_unique(&self, entity_type: &str, property: &str) -> bool {
        self.unique
            .get(entity_type)
            .is_some_and(|props| props.contains(property))
    }

    /// Unique properties of `entity_type`, in name order.
    pub fn unique_properties<'a>(&'a self, entity_type: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.unique
            .get(entity_type)
            .into_iter()
            .flat_map(|props| props.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_properties_are_sorted() {
        let schema = Schema::new().unique("user", "username").unique("user", "email");
        let props: Vec<_> = schema.unique_properties("user").collect();
        assert_eq!(props, vec!["email", "username"]);
        assert_eq!(schema.unique_properties("device").count(), 0);
    }
}

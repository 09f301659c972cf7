//! Property-level change log between entity versions.

use super::mvcc::MvccEntity;
use crate::id::Id;
use crate::version::Version;
use entigrid_codec::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Kind of property change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// The property is new or its value changed.
    Write,
    /// The property no longer exists; the entry carries its last value.
    Delete,
    /// The property kept its value but now belongs to a newer version.
    Unchanged,
}

/// One property delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    /// Entity the change belongs to.
    pub entity_id: Id,
    /// Newest version the delta is relative to.
    pub version: Version,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Property name.
    pub property: String,
    /// New value for writes and unchanged entries, last value for deletes.
    pub value: Value,
}

/// Reduces the versions of one entity to property deltas.
///
/// `versions` must be ordered oldest to newest. Versions older than
/// `min_version` form the baseline and are never reported on their own; every
/// property of the baseline or of a newer version yields one entry relative to
/// the newest version. A deleted newest version reports every property as
/// deleted. Entries are ordered by property name.
#[must_use]
pub fn generate(versions: &[MvccEntity], min_version: Version) -> Vec<ChangeLogEntry> {
    let split = versions.partition_point(|v| v.version() < min_version);
    let (older, newer) = versions.split_at(split);
    let Some(newest) = newer.last() else {
        return Vec::new();
    };

    let baseline: BTreeMap<&str, &Value> = older
        .last()
        .and_then(MvccEntity::entity)
        .map(|e| e.properties().iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default();

    // Last value seen for each property, newest wins.
    let mut last_seen = baseline.clone();
    for entity in newer.iter().filter_map(MvccEntity::entity) {
        for (name, value) in entity.properties() {
            last_seen.insert(name.as_str(), value);
        }
    }
    let names: BTreeSet<&str> = last_seen.keys().copied().collect();
    let current = newest.entity();

    names
        .into_iter()
        .filter_map(|name| {
            let (change_type, value) = match current.and_then(|e| e.get(name)) {
                Some(now) if baseline.get(name) == Some(&now) => (ChangeType::Unchanged, now),
                Some(now) => (ChangeType::Write, now),
                None => (ChangeType::Delete, *last_seen.get(name)?),
            };
            Some(ChangeLogEntry {
                entity_id: newest.id().clone(),
                version: newest.version(),
                change_type,
                property: name.to_string(),
                value: value.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn version(ms: u64) -> Version {
        Version::from_parts(ms, 0, [0; 8])
    }

    fn complete(id: &Id, ms: u64, props: &[(&str, i64)]) -> MvccEntity {
        let mut entity = Entity::with_id(id.clone());
        for (name, value) in props {
            entity.set(*name, *value);
        }
        MvccEntity::complete(entity, version(ms))
    }

    fn summary(entries: &[ChangeLogEntry]) -> Vec<(&str, ChangeType, Value)> {
        entries
            .iter()
            .map(|e| (e.property.as_str(), e.change_type, e.value.clone()))
            .collect()
    }

    #[test]
    fn removed_and_changed_relative_to_floor() {
        let id = Id::generate("user");
        let versions = vec![
            complete(&id, 1, &[("a", 1)]),
            complete(&id, 2, &[("a", 1), ("b", 2)]),
            complete(&id, 3, &[("b", 3)]),
        ];
        let log = generate(&versions, version(2));
        assert_eq!(
            summary(&log),
            vec![
                ("a", ChangeType::Delete, Value::Integer(1)),
                ("b", ChangeType::Write, Value::Integer(3)),
            ]
        );
        assert!(log.iter().all(|e| e.version == version(3)));
    }

    #[test]
    fn unchanged_properties_move_to_newest_version() {
        let id = Id::generate("user");
        let versions = vec![
            complete(&id, 1, &[("a", 1), ("b", 1)]),
            complete(&id, 2, &[("a", 1), ("b", 2)]),
        ];
        let log = generate(&versions, version(2));
        assert_eq!(
            summary(&log),
            vec![
                ("a", ChangeType::Unchanged, Value::Integer(1)),
                ("b", ChangeType::Write, Value::Integer(2)),
            ]
        );
    }

    #[test]
    fn floor_below_history_reports_all_writes() {
        let id = Id::generate("user");
        let versions = vec![complete(&id, 5, &[("a", 1)]), complete(&id, 6, &[("a", 2)])];
        let log = generate(&versions, version(1));
        assert_eq!(summary(&log), vec![("a", ChangeType::Write, Value::Integer(2))]);
    }

    #[test]
    fn floor_above_history_is_empty() {
        let id = Id::generate("user");
        let versions = vec![complete(&id, 1, &[("a", 1)])];
        assert!(generate(&versions, version(9)).is_empty());
        assert!(generate(&[], version(1)).is_empty());
    }

    #[test]
    fn deleted_newest_deletes_everything() {
        let id = Id::generate("user");
        let versions = vec![
            complete(&id, 1, &[("a", 1)]),
            complete(&id, 2, &[("a", 1), ("b", 2)]),
            MvccEntity::deleted(id.clone(), version(3)),
        ];
        let log = generate(&versions, version(2));
        assert_eq!(
            summary(&log),
            vec![
                ("a", ChangeType::Delete, Value::Integer(1)),
                ("b", ChangeType::Delete, Value::Integer(2)),
            ]
        );
    }

    #[test]
    fn property_added_and_removed_after_floor_is_deleted() {
        let id = Id::generate("user");
        let versions = vec![
            complete(&id, 1, &[]),
            complete(&id, 2, &[("tmp", 7)]),
            complete(&id, 3, &[]),
        ];
        let log = generate(&versions, version(2));
        assert_eq!(summary(&log), vec![("tmp", ChangeType::Delete, Value::Integer(7))]);
    }
}

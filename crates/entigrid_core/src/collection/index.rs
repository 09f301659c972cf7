//! Search index seam and the handler that keeps it current.

use super::changelog::{self, ChangeLogEntry, ChangeType};
use super::mvcc::{MvccEntity, Status};
use super::serialization::EntityStore;
use crate::consistency::{ConsistencyTask, TaskHandler};
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::scope::Scope;
use crate::version::Version;
use async_trait::async_trait;
use entigrid_codec::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// External query index fed from committed entities.
///
/// Entities reach the index only after they commit. Calls may repeat, so
/// implementations must be idempotent.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Brings the document for `entity` up to date with `changes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    async fn index(&self, scope: &Scope, entity: &Entity, changes: &[ChangeLogEntry])
        -> CoreResult<()>;

    /// Removes the document for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    async fn deindex(&self, scope: &Scope, id: &Id) -> CoreResult<()>;

    /// Version of the indexed document for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    async fn indexed_version(&self, scope: &Scope, id: &Id) -> CoreResult<Option<Version>>;

    /// Ids whose indexed `property` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    async fn query(&self, scope: &Scope, property: &str, value: &Value) -> CoreResult<Vec<Id>>;
}

#[derive(Debug)]
struct Document {
    version: Version,
    properties: BTreeMap<String, Value>,
}

/// Process-local [`SearchIndex`] with exact-match queries.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    documents: RwLock<HashMap<(Scope, Id), Document>>,
}

impl InMemorySearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents across all scopes.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn index(
        &self,
        scope: &Scope,
        entity: &Entity,
        changes: &[ChangeLogEntry],
    ) -> CoreResult<()> {
        let version = entity.version().ok_or_else(|| {
            CoreError::invalid_operation(format!("cannot index uncommitted entity {}", entity.id()))
        })?;
        let mut documents = self.documents.write();
        let document = documents
            .entry((scope.clone(), entity.id().clone()))
            .or_insert_with(|| Document {
                version,
                properties: BTreeMap::new(),
            });
        for change in changes {
            match change.change_type {
                ChangeType::Write | ChangeType::Unchanged => {
                    document
                        .properties
                        .insert(change.property.clone(), change.value.clone());
                }
                ChangeType::Delete => {
                    document.properties.remove(&change.property);
                }
            }
        }
        document.version = version;
        Ok(())
    }

    async fn deindex(&self, scope: &Scope, id: &Id) -> CoreResult<()> {
        self.documents.write().remove(&(scope.clone(), id.clone()));
        Ok(())
    }

    async fn indexed_version(&self, scope: &Scope, id: &Id) -> CoreResult<Option<Version>> {
        Ok(self
            .documents
            .read()
            .get(&(scope.clone(), id.clone()))
            .map(|d| d.version))
    }

    async fn query(&self, scope: &Scope, property: &str, value: &Value) -> CoreResult<Vec<Id>> {
        let mut ids: Vec<Id> = self
            .documents
            .read()
            .iter()
            .filter(|((s, _), doc)| s == scope && doc.properties.get(property) == Some(value))
            .map(|((_, id), _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Reindexes an entity after a commit.
///
/// Compares the committed head with the version the index already holds and
/// hands the index only the property changes since then.
pub struct EntityIndexHandler {
    entities: EntityStore,
    index: Arc<dyn SearchIndex>,
}

impl EntityIndexHandler {
    pub(crate) fn new(entities: EntityStore, index: Arc<dyn SearchIndex>) -> Self {
        Self { entities, index }
    }
}

#[async_trait]
impl TaskHandler for EntityIndexHandler {
    async fn handle(&self, task: &ConsistencyTask) -> CoreResult<()> {
        let (scope, id) = (&task.scope, &task.entity_id);
        let versions = self.entities.load_committed(scope, id).await?;
        let Some(head) = versions.last() else {
            debug!(entity_id = %id, "nothing committed, skipping reindex");
            return Ok(());
        };
        let entity = match (head.status(), head.entity()) {
            (Status::Complete, Some(entity)) => entity,
            _ => return self.index.deindex(scope, id).await,
        };

        let indexed = self.index.indexed_version(scope, id).await?;
        let Some(floor) = versions
            .iter()
            .map(MvccEntity::version)
            .find(|v| Some(*v) > indexed)
        else {
            debug!(entity_id = %id, version = %head.version(), "index already current");
            return Ok(());
        };

        let changes = changelog::generate(&versions, floor);
        debug!(entity_id = %id, changes = changes.len(), "reindexing entity");
        self.index.index(scope, entity, &changes).await?;

        // A delete that committed while the document was written has already
        // run its deindex, so the document it left behind is removed here.
        let live = self.entities.load_head(scope, id).await?.and_then(MvccEntity::into_live);
        if live.is_none() {
            debug!(entity_id = %id, "entity deleted during reindex");
            self.index.deindex(scope, id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new(Id::generate("organization"), Id::generate("application"), "users").unwrap()
    }

    fn committed(id: &Id, ms: u64, props: &[(&str, &str)]) -> (Entity, Vec<ChangeLogEntry>) {
        let mut entity = Entity::with_id(id.clone());
        for (k, v) in props {
            entity.set(*k, *v);
        }
        let version = Version::from_parts(ms, 0, [0; 8]);
        entity.stamp(version, None);
        let changes = changelog::generate(&[MvccEntity::complete(entity.clone(), version)], version);
        (entity, changes)
    }

    #[tokio::test]
    async fn index_query_and_deindex() {
        let index = InMemorySearchIndex::new();
        let scope = scope();
        let id = Id::generate("user");
        let (entity, changes) = committed(&id, 1, &[("name", "ann")]);

        index.index(&scope, &entity, &changes).await.unwrap();
        assert_eq!(index.query(&scope, "name", &Value::from("ann")).await.unwrap(), vec![id.clone()]);
        assert_eq!(index.indexed_version(&scope, &id).await.unwrap(), entity.version());

        index.deindex(&scope, &id).await.unwrap();
        assert!(index.query(&scope, "name", &Value::from("ann")).await.unwrap().is_empty());
        assert_eq!(index.document_count(), 0);
    }

    #[tokio::test]
    async fn delete_changes_drop_properties() {
        let index = InMemorySearchIndex::new();
        let scope = scope();
        let id = Id::generate("user");
        let (entity, changes) = committed(&id, 1, &[("name", "ann")]);
        index.index(&scope, &entity, &changes).await.unwrap();

        let removal = vec![ChangeLogEntry {
            entity_id: id.clone(),
            version: Version::from_parts(2, 0, [0; 8]),
            change_type: ChangeType::Delete,
            property: "name".into(),
            value: Value::from("ann"),
        }];
        let mut newer = entity.clone();
        newer.stamp(Version::from_parts(2, 0, [0; 8]), entity.created());
        index.index(&scope, &newer, &removal).await.unwrap();
        assert!(index.query(&scope, "name", &Value::from("ann")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uncommitted_entity_is_rejected() {
        let index = InMemorySearchIndex::new();
        let result = index.index(&scope(), &Entity::new("user"), &[]).await;
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }
}

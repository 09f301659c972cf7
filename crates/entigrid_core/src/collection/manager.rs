//! Scoped entry point for entity reads and writes.

use super::changelog::{self, ChangeLogEntry};
use super::mvcc::MvccEntity;
use super::pipeline::WritePipeline;
use super::CollectionContext;
use crate::consistency::ConsistencyTask;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::scope::Scope;
use crate::version::Version;
use entigrid_codec::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reads and writes the entities of one [`Scope`].
///
/// Writes go through an optimistic pipeline: they fail with
/// [`CoreError::OptimisticConflict`] instead of waiting when another writer
/// got there first, and with [`CoreError::UniqueConflict`] when a unique
/// property value belongs to another entity. Indexing runs after the write
/// returns.
#[derive(Clone)]
pub struct EntityCollectionManager {
    scope: Scope,
    ctx: Arc<CollectionContext>,
    pipeline: WritePipeline,
}

impl EntityCollectionManager {
    pub(crate) fn new(scope: Scope, ctx: Arc<CollectionContext>) -> Self {
        let pipeline = WritePipeline::new(Arc::clone(&ctx));
        Self {
            scope,
            ctx,
            pipeline,
        }
    }

    /// The scope this manager writes to.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Writes `entity`, creating it if needed.
    ///
    /// An entity without a uuid gets one. If the entity carries a version,
    /// the write fails unless that version is still the committed head.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an entity without a type, a conflict
    /// error when verification fails, or the underlying storage error.
    pub async fn write(&self, mut entity: Entity) -> CoreResult<Entity> {
        if entity.id().is_unassigned() {
            let id = entity.id().with_uuid(self.ctx.versions.next_uuid());
            entity.assign_id(id);
        }
        entity.id().validate()?;

        let committed = self.pipeline.write(&self.scope, entity).await?;
        self.schedule(committed.id()).await;
        Ok(committed)
    }

    /// Updates an existing entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotFound`] if there is no live entity with
    /// this id, plus every error [`write`](Self::write) can return.
    pub async fn update(&self, entity: Entity) -> CoreResult<Entity> {
        entity.id().validate()?;
        let committed = self.pipeline.update(&self.scope, entity).await?;
        self.schedule(committed.id()).await;
        Ok(committed)
    }

    /// Creates a new entity of `entity_type` with `properties`.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub async fn create<K, V>(
        &self,
        entity_type: &str,
        properties: impl IntoIterator<Item = (K, V)>,
    ) -> CoreResult<Entity>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut entity = Entity::new(entity_type);
        for (name, value) in properties {
            entity.set(name, value);
        }
        self.write(entity).await
    }

    /// The committed head of `id`, or `None` if absent or deleted.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed id or the storage error.
    pub async fn load(&self, id: &Id) -> CoreResult<Option<Entity>> {
        id.validate()?;
        let head = self.ctx.entities.load_head(&self.scope, id).await?;
        Ok(head.and_then(MvccEntity::into_live))
    }

    /// Like [`load`](Self::load) but a missing entity is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotFound`] if there is no live entity.
    pub async fn get(&self, id: &Id) -> CoreResult<Entity> {
        self.load(id)
            .await?
            .ok_or_else(|| CoreError::entity_not_found(id))
    }

    /// Deletes `id`, removing it from the search index first.
    ///
    /// Deleting an entity that does not exist still writes a delete marker.
    /// A reindex task is queued after the marker commits, so indexing work
    /// still in flight from earlier writes cannot leave a document behind.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed id, or the index or
    /// storage error.
    pub async fn delete(&self, id: &Id) -> CoreResult<()> {
        id.validate()?;
        if let Some(index) = &self.ctx.index {
            index.deindex(&self.scope, id).await?;
        }
        let version = self.pipeline.delete(&self.scope, id).await?;
        debug!(scope = %self.scope, entity_id = %id, %version, "entity deleted");
        self.schedule(id).await;
        Ok(())
    }

    /// Every committed version of `id`, oldest first, delete markers included.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed id or the storage error.
    pub async fn load_versions(&self, id: &Id) -> CoreResult<Vec<MvccEntity>> {
        id.validate()?;
        self.ctx.entities.load_committed(&self.scope, id).await
    }

    /// Property changes of `id` from `min_version` to the committed head.
    ///
    /// # Errors
    ///
    /// See [`load_versions`](Self::load_versions).
    pub async fn change_log(&self, id: &Id, min_version: Version) -> CoreResult<Vec<ChangeLogEntry>> {
        let versions = self.load_versions(id).await?;
        Ok(changelog::generate(&versions, min_version))
    }

    /// Uuids of the entities owning `value` for a unique property.
    ///
    /// Normally empty or a single uuid. More than one means the index is
    /// corrupt; every owner is returned.
    ///
    /// # Errors
    ///
    /// Returns the storage or codec error.
    pub async fn get_uuids_for_unique_property(
        &self,
        entity_type: &str,
        property: &str,
        value: &Value,
    ) -> CoreResult<BTreeSet<Uuid>> {
        if entity_type.is_empty() {
            return Err(CoreError::validation("entity type must not be empty"));
        }
        self.ctx
            .unique
            .owners(&self.scope, entity_type, property, value)
            .await
    }

    /// Queues post-commit work for `id`. The write already succeeded, so a
    /// queue failure is only logged.
    async fn schedule(&self, id: &Id) {
        let task = ConsistencyTask::entity_update(self.scope.clone(), id.clone());
        match self
            .ctx
            .processor
            .enqueue(task, self.ctx.config.verification_timeout)
            .await
        {
            Ok(message) => {
                self.ctx.processor.start(message);
            }
            Err(e) => {
                warn!(scope = %self.scope, entity_id = %id, error = %e, "failed to queue post-commit work");
            }
        }
    }
}

impl fmt::Debug for EntityCollectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollectionManager")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::changelog::ChangeType;
    use crate::collection::index::{InMemorySearchIndex, SearchIndex};
    use crate::collection::mvcc::Status;
    use crate::collection::testing::{harness, Harness};
    use crate::schema::Schema;
    use std::time::Duration;

    fn scope() -> Scope {
        Scope::new(Id::generate("organization"), Id::generate("application"), "users").unwrap()
    }

    fn schema() -> Schema {
        Schema::new().unique("user", "email")
    }

    async fn manager() -> (EntityCollectionManager, Harness) {
        let h = harness(schema(), None).await;
        (EntityCollectionManager::new(scope(), Arc::clone(&h.ctx)), h)
    }

    fn user(email: &str) -> Entity {
        Entity::new("user").property("email", email).property("age", 30)
    }

    #[tokio::test]
    async fn write_assigns_id_and_loads_back() {
        let (users, _h) = manager().await;
        let written = users.write(user("a@x")).await.unwrap();

        assert!(!written.id().is_unassigned());
        assert!(written.version().is_some());
        assert_eq!(written.created(), written.modified());

        let loaded = users.get(written.id()).await.unwrap();
        assert_eq!(loaded, written);
        assert_eq!(loaded.get("email"), Some(&Value::from("a@x")));
    }

    #[tokio::test]
    async fn write_without_type_is_rejected() {
        let (users, h) = manager().await;
        let result = users.write(Entity::new("")).await;
        assert!(matches!(result, Err(CoreError::Validation { .. })));
        assert_eq!(h.store.live_row_count(crate::collection::CF_ENTITY_LOG), 0);
    }

    #[tokio::test]
    async fn update_keeps_created_and_moves_modified() {
        let (users, _h) = manager().await;
        let first = users.write(user("a@x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;

        let mut next = first.clone();
        next.set("age", 31);
        let second = users.update(next).await.unwrap();

        assert_eq!(second.created(), first.created());
        assert!(second.modified() > first.modified());
        assert!(second.version() > first.version());
        assert_eq!(users.get(first.id()).await.unwrap().get("age"), Some(&Value::from(31)));
    }

    #[tokio::test]
    async fn update_of_missing_entity_is_not_found() {
        let (users, _h) = manager().await;
        let ghost = Entity::with_id(Id::generate("user")).property("age", 1);
        let result = users.update(ghost.clone()).await;
        assert!(matches!(result, Err(CoreError::EntityNotFound { .. })));
        assert!(users.load(ghost.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_from_stale_version_conflicts() {
        let (users, _h) = manager().await;
        let first = users.write(user("a@x")).await.unwrap();
        users.update(first.clone().property("age", 40)).await.unwrap();

        let result = users.update(first.property("age", 50)).await;
        assert!(matches!(result, Err(CoreError::OptimisticConflict { .. })));
    }

    #[tokio::test]
    async fn concurrent_updates_from_same_head_commit_once() {
        let (users, _h) = manager().await;
        let head = users.write(user("a@x")).await.unwrap();

        let (a, b) = tokio::join!(
            users.update(head.clone().property("age", 1)),
            users.update(head.clone().property("age", 2)),
        );
        let failures: Vec<_> = [&a, &b].into_iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].is_conflict());

        let versions = users.load_versions(head.id()).await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn unique_value_has_one_owner() {
        let (users, _h) = manager().await;
        let (a, b) = tokio::join!(users.write(user("same@x")), users.write(user("same@x")));
        let winner = match (a, b) {
            (Ok(w), Err(e)) | (Err(e), Ok(w)) => {
                assert!(matches!(e, CoreError::UniqueConflict { .. }));
                w
            }
            other => panic!("expected exactly one winner, got {other:?}"),
        };

        let owners = users
            .get_uuids_for_unique_property("user", "email", &Value::from("same@x"))
            .await
            .unwrap();
        assert_eq!(owners, BTreeSet::from([winner.id().uuid()]));
    }

    #[tokio::test]
    async fn unique_value_of_unwritten_entity_has_no_owner() {
        let (users, _h) = manager().await;
        let owners = users
            .get_uuids_for_unique_property("user", "email", &Value::from("nobody@x"))
            .await
            .unwrap();
        assert!(owners.is_empty());
    }

    #[tokio::test]
    async fn changing_a_unique_value_frees_the_old_one() {
        let (users, _h) = manager().await;
        let first = users.write(user("old@x")).await.unwrap();
        users.update(first.property("email", "new@x")).await.unwrap();

        let other = users.write(user("old@x")).await.unwrap();
        let owners = users
            .get_uuids_for_unique_property("user", "email", &Value::from("old@x"))
            .await
            .unwrap();
        assert_eq!(owners, BTreeSet::from([other.id().uuid()]));
    }

    #[tokio::test]
    async fn rejected_write_is_rolled_back() {
        let (users, _h) = manager().await;
        users.write(user("taken@x")).await.unwrap();

        let loser = Entity::with_id(Id::generate("user")).property("email", "taken@x");
        let result = users.write(loser.clone()).await;
        assert!(matches!(result, Err(CoreError::UniqueConflict { .. })));
        assert!(users.load(loser.id()).await.unwrap().is_none());

        // A rolled back attempt does not block the next writer of the same id.
        let retried = users.write(loser.property("email", "free@x")).await.unwrap();
        assert_eq!(users.get(retried.id()).await.unwrap(), retried);
    }

    #[tokio::test]
    async fn delete_hides_entity_and_frees_unique_values() {
        let (users, _h) = manager().await;
        let written = users.write(user("gone@x")).await.unwrap();

        users.delete(written.id()).await.unwrap();
        assert!(users.load(written.id()).await.unwrap().is_none());
        assert!(matches!(
            users.get(written.id()).await,
            Err(CoreError::EntityNotFound { .. })
        ));

        let versions = users.load_versions(written.id()).await.unwrap();
        assert_eq!(versions.last().map(MvccEntity::status), Some(Status::Deleted));
        assert!(users
            .get_uuids_for_unique_property("user", "email", &Value::from("gone@x"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn write_after_delete_revives_entity() {
        let (users, _h) = manager().await;
        let written = users.write(user("a@x")).await.unwrap();
        users.delete(written.id()).await.unwrap();

        let revived = Entity::with_id(written.id().clone()).property("email", "a@x");
        let revived = users.write(revived).await.unwrap();
        assert_eq!(users.get(written.id()).await.unwrap(), revived);
    }

    #[tokio::test]
    async fn change_log_reports_property_deltas() {
        let (users, _h) = manager().await;
        let v1 = users.write(Entity::new("note").property("a", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let v2 = users.update(v1.clone().property("b", 2)).await.unwrap();
        let mut v3 = v2.clone();
        v3.remove("a");
        v3.set("b", 3);
        users.update(v3).await.unwrap();

        let changes = users
            .change_log(v1.id(), v2.version().unwrap())
            .await
            .unwrap();
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.property.as_str(), c.change_type, c.value.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", ChangeType::Delete, Value::from(1)),
                ("b", ChangeType::Write, Value::from(3)),
            ]
        );
    }

    #[tokio::test]
    async fn committed_write_reaches_index_and_delete_removes_it() {
        let index = Arc::new(InMemorySearchIndex::new());
        let h = harness(schema(), Some(index.clone() as Arc<dyn SearchIndex>)).await;
        let users = EntityCollectionManager::new(scope(), Arc::clone(&h.ctx));

        let written = users.write(user("find@x")).await.unwrap();
        for _ in 0..100 {
            if h.ctx.processor.pending().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let hits = index
            .query(users.scope(), "email", &Value::from("find@x"))
            .await
            .unwrap();
        assert_eq!(hits, vec![written.id().clone()]);

        users.delete(written.id()).await.unwrap();
        assert_eq!(index.document_count(), 0);
    }
}

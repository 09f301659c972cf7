//! Scoped entry point for graph writes and reads.

use super::edge::{MarkedEdge, SearchByEdgeType, SearchByIdType};
use super::reader::MergedEdgeReader;
use super::serialization::{EdgeSerialization, EdgeStream};
use crate::error::CoreResult;
use crate::id::Id;
use crate::scope::Scope;
use crate::version::VersionGenerator;
use entigrid_storage::{ColumnStore, MutationBatch};
use futures::{future, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Writes and reads the edges of one [`Scope`].
///
/// New edges and delete marks go to the commit log. [`persist`](Self::persist)
/// copies edges into durable storage; reads merge both.
#[derive(Clone)]
pub struct EdgeManager {
    scope: Scope,
    store: Arc<dyn ColumnStore>,
    commit_log: Arc<dyn EdgeSerialization>,
    storage: Arc<dyn EdgeSerialization>,
    reader: MergedEdgeReader,
    versions: Arc<dyn VersionGenerator>,
}

impl EdgeManager {
    pub(crate) fn new(
        scope: Scope,
        store: Arc<dyn ColumnStore>,
        commit_log: Arc<dyn EdgeSerialization>,
        storage: Arc<dyn EdgeSerialization>,
        versions: Arc<dyn VersionGenerator>,
    ) -> Self {
        let reader = MergedEdgeReader::new(Arc::clone(&commit_log), Arc::clone(&storage));
        Self {
            scope,
            store,
            commit_log,
            storage,
            reader,
            versions,
        }
    }

    /// The scope this manager reads and writes.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The merged reader, for callers that want delete marks.
    #[must_use]
    pub fn reader(&self) -> &MergedEdgeReader {
        &self.reader
    }

    /// Connects `source` to `target` with an edge stamped now.
    ///
    /// # Errors
    ///
    /// See [`write_edge`](Self::write_edge).
    pub async fn connect(&self, source: Id, edge_type: &str, target: Id) -> CoreResult<MarkedEdge> {
        let timestamp = self.versions.next_version().timestamp();
        self.write_edge(MarkedEdge::new(source, edge_type, target, timestamp))
            .await
    }

    /// Appends `edge` to the commit log.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed edge or the storage error.
    pub async fn write_edge(&self, edge: MarkedEdge) -> CoreResult<MarkedEdge> {
        let mut batch = MutationBatch::new();
        self.commit_log.write_edge(&mut batch, &self.scope, &edge)?;
        self.store.mutate(batch).await?;
        debug!(scope = %self.scope, %edge, "edge written");
        Ok(edge)
    }

    /// Marks `edge` deleted. The mark keeps the edge's timestamp.
    ///
    /// # Errors
    ///
    /// See [`write_edge`](Self::write_edge).
    pub async fn mark_edge(&self, edge: MarkedEdge) -> CoreResult<MarkedEdge> {
        self.write_edge(edge.into_deleted()).await
    }

    /// Copies `edges` into durable storage in one batch.
    ///
    /// The commit log keeps its copies; reads collapse the duplicates.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed edge or the storage error.
    pub async fn persist(&self, edges: &[MarkedEdge]) -> CoreResult<()> {
        let mut batch = MutationBatch::new();
        for edge in edges {
            self.storage.write_edge(&mut batch, &self.scope, edge)?;
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.store.mutate(batch).await?;
        debug!(scope = %self.scope, count = edges.len(), "edges persisted");
        Ok(())
    }

    /// Outgoing edges, delete marks included.
    #[must_use]
    pub fn get_edges_from_source(&self, search: &SearchByEdgeType) -> EdgeStream {
        self.reader.get_edges_from_source(&self.scope, search)
    }

    /// Incoming edges, delete marks included.
    #[must_use]
    pub fn get_edges_to_target(&self, search: &SearchByEdgeType) -> EdgeStream {
        self.reader.get_edges_to_target(&self.scope, search)
    }

    /// Outgoing edges to one target type, delete marks included.
    #[must_use]
    pub fn get_edges_from_source_by_target_type(&self, search: &SearchByIdType) -> EdgeStream {
        self.reader
            .get_edges_from_source_by_target_type(&self.scope, search)
    }

    /// Incoming edges from one source type, delete marks included.
    #[must_use]
    pub fn get_edges_to_target_by_source_type(&self, search: &SearchByIdType) -> EdgeStream {
        self.reader
            .get_edges_to_target_by_source_type(&self.scope, search)
    }

    /// Live outgoing edges.
    #[must_use]
    pub fn load_edges_from_source(&self, search: &SearchByEdgeType) -> EdgeStream {
        live(self.get_edges_from_source(search))
    }

    /// Live incoming edges.
    #[must_use]
    pub fn load_edges_to_target(&self, search: &SearchByEdgeType) -> EdgeStream {
        live(self.get_edges_to_target(search))
    }

    /// Live outgoing edges to one target type.
    #[must_use]
    pub fn load_edges_from_source_by_target_type(&self, search: &SearchByIdType) -> EdgeStream {
        live(self.get_edges_from_source_by_target_type(search))
    }

    /// Live incoming edges from one source type.
    #[must_use]
    pub fn load_edges_to_target_by_source_type(&self, search: &SearchByIdType) -> EdgeStream {
        live(self.get_edges_to_target_by_source_type(search))
    }
}

fn live(stream: EdgeStream) -> EdgeStream {
    stream
        .try_filter(|edge| future::ready(!edge.is_deleted()))
        .boxed()
}

impl fmt::Debug for EdgeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeManager")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::serialization::{ColumnEdgeSerialization, CF_EDGES, CF_EDGE_COMMIT_LOG};
    use crate::migration::migrate;
    use crate::version::TimeVersionGenerator;
    use entigrid_storage::InMemoryColumnStore;

    async fn manager() -> EdgeManager {
        let store = Arc::new(InMemoryColumnStore::new());
        migrate(store.as_ref()).await.unwrap();
        let scope = Scope::new(Id::generate("organization"), Id::generate("application"), "graph").unwrap();
        EdgeManager::new(
            scope,
            store.clone(),
            Arc::new(ColumnEdgeSerialization::new(store.clone(), CF_EDGE_COMMIT_LOG, 100)),
            Arc::new(ColumnEdgeSerialization::new(store, CF_EDGES, 100)),
            Arc::new(TimeVersionGenerator::new()),
        )
    }

    #[tokio::test]
    async fn marked_edge_is_hidden_from_loads_only() {
        let graph = manager().await;
        let user = Id::generate("user");
        let kept = graph.connect(user.clone(), "owns", Id::generate("car")).await.unwrap();
        let dropped = graph.connect(user.clone(), "owns", Id::generate("car")).await.unwrap();
        graph.mark_edge(dropped.clone()).await.unwrap();

        let search = SearchByEdgeType::new(user, "owns", u64::MAX);
        let all: Vec<_> = graph.get_edges_from_source(&search).try_collect().await.unwrap();
        assert_eq!(all, vec![dropped.into_deleted(), kept.clone()]);

        let live: Vec<_> = graph.load_edges_from_source(&search).try_collect().await.unwrap();
        assert_eq!(live, vec![kept]);
    }

    #[tokio::test]
    async fn persisted_edges_are_read_once() {
        let graph = manager().await;
        let user = Id::generate("user");
        let car = Id::generate("car");
        let edge = graph.connect(user.clone(), "owns", car.clone()).await.unwrap();
        graph.persist(std::slice::from_ref(&edge)).await.unwrap();

        let out: Vec<_> = graph
            .load_edges_from_source(&SearchByEdgeType::new(user.clone(), "owns", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(out, vec![edge.clone()]);

        let incoming: Vec<_> = graph
            .load_edges_to_target_by_source_type(&SearchByIdType::new(car, "owns", "user", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(incoming, vec![edge]);
    }

    #[tokio::test]
    async fn mark_after_persist_hides_stored_copy() {
        let graph = manager().await;
        let user = Id::generate("user");
        let edge = graph.connect(user.clone(), "owns", Id::generate("car")).await.unwrap();
        graph.persist(std::slice::from_ref(&edge)).await.unwrap();
        graph.mark_edge(edge).await.unwrap();

        let live: Vec<_> = graph
            .load_edges_from_source_by_target_type(&SearchByIdType::new(user, "owns", "car", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn invalid_edge_is_rejected_before_io() {
        let graph = manager().await;
        let result = graph
            .write_edge(MarkedEdge::new(Id::generate("user"), "", Id::generate("car"), 1))
            .await;
        assert!(matches!(result, Err(crate::error::CoreError::Validation { .. })));
    }
}

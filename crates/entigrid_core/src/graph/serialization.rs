//! Column layout of edges.
//!
//! Each edge is written to four rows so every search reads a single row:
//! outgoing and incoming edges by type, and both again narrowed by the entity
//! type of the far end. Columns are named by timestamp, then the far end's
//! uuid and type, so a reversed scan yields edges newest first.

use super::edge::{MarkedEdge, SearchByEdgeType, SearchByIdType};
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::keys::KeyBuilder;
use crate::scope::Scope;
use bytes::Bytes;
use entigrid_storage::{Column, ColumnRange, ColumnStore, MutationBatch, StorageError};
use futures::stream::{self, BoxStream, StreamExt};
use std::ops::Bound;
use std::sync::Arc;
use uuid::Uuid;

/// Column family buffering recently written edges.
pub const CF_EDGE_COMMIT_LOG: &str = "graph_edge_commit_log";

/// Column family holding durable edges.
pub const CF_EDGES: &str = "graph_edges";

/// A lazy stream of edges, newest first.
pub type EdgeStream = BoxStream<'static, CoreResult<MarkedEdge>>;

/// A readable and writable set of edges.
///
/// Every read returns edges in descending timestamp order. Reads are lazy:
/// nothing is fetched until the stream is polled.
pub trait EdgeSerialization: Send + Sync {
    /// Adds `edge` (or its delete mark) to `batch`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed edge.
    fn write_edge(&self, batch: &mut MutationBatch, scope: &Scope, edge: &MarkedEdge)
        -> CoreResult<()>;

    /// Edges of the searched type leaving the searched node.
    fn get_edges_from_source(&self, scope: &Scope, search: &SearchByEdgeType) -> EdgeStream;

    /// Edges of the searched type arriving at the searched node.
    fn get_edges_to_target(&self, scope: &Scope, search: &SearchByEdgeType) -> EdgeStream;

    /// Outgoing edges whose target has the searched entity type.
    fn get_edges_from_source_by_target_type(
        &self,
        scope: &Scope,
        search: &SearchByIdType,
    ) -> EdgeStream;

    /// Incoming edges whose source has the searched entity type.
    fn get_edges_to_target_by_source_type(
        &self,
        scope: &Scope,
        search: &SearchByIdType,
    ) -> EdgeStream;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    fn tag(self, typed: bool) -> &'static str {
        match (self, typed) {
            (Self::Outgoing, false) => "out",
            (Self::Incoming, false) => "in",
            (Self::Outgoing, true) => "out_t",
            (Self::Incoming, true) => "in_t",
        }
    }
}

fn row(scope: &Scope, direction: Direction, node: &Id, edge_type: &str, far_type: Option<&str>) -> Bytes {
    let key = KeyBuilder::new()
        .scope(scope)
        .str(direction.tag(far_type.is_some()))
        .id(node)
        .str(edge_type);
    match far_type {
        Some(far_type) => key.str(far_type).build(),
        None => key.build(),
    }
}

fn column_name(timestamp: u64, far: &Id) -> Bytes {
    KeyBuilder::new()
        .fixed(&timestamp.to_be_bytes())
        .fixed(far.uuid().as_bytes())
        .fixed(far.entity_type().as_bytes())
        .build()
}

fn corrupted(message: String) -> CoreError {
    CoreError::Storage(StorageError::Corrupted(message))
}

/// Rebuilds an edge from a column of a row belonging to `node`.
fn decode(column: &Column, direction: Direction, node: &Id, edge_type: &str) -> CoreResult<MarkedEdge> {
    let name = &column.name;
    if name.len() < 24 {
        return Err(corrupted(format!("edge column of {} bytes", name.len())));
    }
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&name[..8]);
    let timestamp = u64::from_be_bytes(timestamp);
    let uuid = Uuid::from_slice(&name[8..24]).map_err(|e| corrupted(e.to_string()))?;
    let far_type = std::str::from_utf8(&name[24..]).map_err(|e| corrupted(e.to_string()))?;
    let far = Id::new(uuid, far_type);
    let deleted = match column.value.first() {
        Some(0) => false,
        Some(1) => true,
        other => return Err(corrupted(format!("edge mark {other:?}"))),
    };

    let edge = match direction {
        Direction::Outgoing => MarkedEdge::new(node.clone(), edge_type, far, timestamp),
        Direction::Incoming => MarkedEdge::new(far, edge_type, node.clone(), timestamp),
    };
    Ok(edge.with_deleted(deleted))
}

/// Edges stored in one column family of a [`ColumnStore`].
///
/// The commit log and durable storage are two instances over different
/// column families.
#[derive(Clone)]
pub struct ColumnEdgeSerialization {
    store: Arc<dyn ColumnStore>,
    column_family: &'static str,
    page_size: usize,
}

impl ColumnEdgeSerialization {
    /// Edges in `column_family`, read `page_size` columns at a time.
    #[must_use]
    pub fn new(store: Arc<dyn ColumnStore>, column_family: &'static str, page_size: usize) -> Self {
        Self {
            store,
            column_family,
            page_size: page_size.max(1),
        }
    }

    /// The backing column family.
    #[must_use]
    pub fn column_family(&self) -> &'static str {
        self.column_family
    }

    fn scan(
        &self,
        scope: &Scope,
        direction: Direction,
        search: &SearchByEdgeType,
        far_type: Option<&str>,
    ) -> EdgeStream {
        let row = row(scope, direction, &search.node, &search.edge_type, far_type);
        let upper = match &search.last {
            Some(last) => {
                let far = match direction {
                    Direction::Outgoing => last.target(),
                    Direction::Incoming => last.source(),
                };
                Bound::Excluded(column_name(last.timestamp(), far))
            }
            None => match search.max_timestamp.checked_add(1) {
                Some(next) => Bound::Excluded(Bytes::copy_from_slice(&next.to_be_bytes())),
                None => Bound::Unbounded,
            },
        };

        let store = Arc::clone(&self.store);
        let cf = self.column_family;
        let page_size = self.page_size;
        let node = search.node.clone();
        let edge_type = search.edge_type.clone();

        stream::unfold(Some(upper), move |upper| {
            let store = Arc::clone(&store);
            let row = row.clone();
            let node = node.clone();
            let edge_type = edge_type.clone();
            async move {
                let upper = upper?;
                let range = ColumnRange::all().upper(upper).reversed().limit(page_size);
                let columns = match store.scan_columns(cf, &row, &range).await {
                    Ok(columns) => columns,
                    Err(e) => return Some((vec![Err(CoreError::from(e))], None)),
                };
                let next = if columns.len() < page_size {
                    None
                } else {
                    columns.last().map(|c| Bound::Excluded(c.name.clone()))
                };
                let edges = columns
                    .iter()
                    .map(|c| decode(c, direction, &node, &edge_type))
                    .collect::<Vec<_>>();
                Some((edges, next))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}

impl EdgeSerialization for ColumnEdgeSerialization {
    fn write_edge(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        edge: &MarkedEdge,
    ) -> CoreResult<()> {
        edge.validate()?;
        let (source, target) = (edge.source(), edge.target());
        let ty = edge.edge_type();
        let value = Bytes::copy_from_slice(&[u8::from(edge.is_deleted())]);
        let ts = edge.timestamp();

        let rows = [
            (row(scope, Direction::Outgoing, source, ty, None), target),
            (row(scope, Direction::Incoming, target, ty, None), source),
            (row(scope, Direction::Outgoing, source, ty, Some(target.entity_type())), target),
            (row(scope, Direction::Incoming, target, ty, Some(source.entity_type())), source),
        ];
        for (row, far) in rows {
            batch.put(self.column_family, row, column_name(ts, far), value.clone(), ts);
        }
        Ok(())
    }

    fn get_edges_from_source(&self, scope: &Scope, search: &SearchByEdgeType) -> EdgeStream {
        self.scan(scope, Direction::Outgoing, search, None)
    }

    fn get_edges_to_target(&self, scope: &Scope, search: &SearchByEdgeType) -> EdgeStream {
        self.scan(scope, Direction::Incoming, search, None)
    }

    fn get_edges_from_source_by_target_type(
        &self,
        scope: &Scope,
        search: &SearchByIdType,
    ) -> EdgeStream {
        self.scan(scope, Direction::Outgoing, &search.search, Some(&search.id_type))
    }

    fn get_edges_to_target_by_source_type(
        &self,
        scope: &Scope,
        search: &SearchByIdType,
    ) -> EdgeStream {
        self.scan(scope, Direction::Incoming, &search.search, Some(&search.id_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigrid_storage::InMemoryColumnStore;
    use futures::TryStreamExt;

    fn scope() -> Scope {
        Scope::new(Id::generate("organization"), Id::generate("application"), "graph").unwrap()
    }

    async fn edges(page_size: usize) -> ColumnEdgeSerialization {
        let store = Arc::new(InMemoryColumnStore::new());
        store.create_column_family(CF_EDGES).await.unwrap();
        ColumnEdgeSerialization::new(store, CF_EDGES, page_size)
    }

    async fn write(edges: &ColumnEdgeSerialization, scope: &Scope, list: &[MarkedEdge]) {
        let mut batch = MutationBatch::new();
        for edge in list {
            edges.write_edge(&mut batch, scope, edge).unwrap();
        }
        edges.store.mutate(batch).await.unwrap();
    }

    #[tokio::test]
    async fn reads_are_newest_first_across_pages() {
        let edges = edges(2).await;
        let scope = scope();
        let user = Id::generate("user");
        let written: Vec<_> = (1..=5)
            .map(|ts| MarkedEdge::new(user.clone(), "owns", Id::generate("car"), ts))
            .collect();
        write(&edges, &scope, &written).await;

        let read: Vec<_> = edges
            .get_edges_from_source(&scope, &SearchByEdgeType::new(user, "owns", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        let timestamps: Vec<_> = read.iter().map(MarkedEdge::timestamp).collect();
        assert_eq!(timestamps, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn max_timestamp_and_resume_bound_the_scan() {
        let edges = edges(10).await;
        let scope = scope();
        let user = Id::generate("user");
        let written: Vec<_> = (1..=4)
            .map(|ts| MarkedEdge::new(user.clone(), "owns", Id::generate("car"), ts))
            .collect();
        write(&edges, &scope, &written).await;

        let search = SearchByEdgeType::new(user, "owns", 3);
        let read: Vec<_> = edges.get_edges_from_source(&scope, &search).try_collect().await.unwrap();
        assert_eq!(read.iter().map(MarkedEdge::timestamp).collect::<Vec<_>>(), vec![3, 2, 1]);

        let resumed = search.resume_after(read[0].clone());
        let read: Vec<_> = edges.get_edges_from_source(&scope, &resumed).try_collect().await.unwrap();
        assert_eq!(read.iter().map(MarkedEdge::timestamp).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn each_direction_and_type_filter_sees_the_edge() {
        let edges = edges(10).await;
        let scope = scope();
        let user = Id::generate("user");
        let car = Id::generate("car");
        let boat = Id::generate("boat");
        let to_car = MarkedEdge::new(user.clone(), "owns", car.clone(), 1);
        let to_boat = MarkedEdge::new(user.clone(), "owns", boat, 2);
        write(&edges, &scope, &[to_car.clone(), to_boat]).await;

        let incoming: Vec<_> = edges
            .get_edges_to_target(&scope, &SearchByEdgeType::new(car.clone(), "owns", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(incoming, vec![to_car.clone()]);

        let cars: Vec<_> = edges
            .get_edges_from_source_by_target_type(&scope, &SearchByIdType::new(user.clone(), "owns", "car", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(cars, vec![to_car.clone()]);

        let from_users: Vec<_> = edges
            .get_edges_to_target_by_source_type(&scope, &SearchByIdType::new(car, "owns", "user", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(from_users, vec![to_car]);
    }

    #[tokio::test]
    async fn delete_mark_replaces_edge() {
        let edges = edges(10).await;
        let scope = scope();
        let edge = MarkedEdge::new(Id::generate("user"), "owns", Id::generate("car"), 9);
        write(&edges, &scope, &[edge.clone()]).await;
        write(&edges, &scope, &[edge.clone().into_deleted()]).await;

        let read: Vec<_> = edges
            .get_edges_from_source(&scope, &SearchByEdgeType::new(edge.source().clone(), "owns", u64::MAX))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(read, vec![edge.into_deleted()]);
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_in_stream() {
        let store = Arc::new(InMemoryColumnStore::new());
        store.create_column_family(CF_EDGES).await.unwrap();
        store.set_available(false);
        let edges = ColumnEdgeSerialization::new(store, CF_EDGES, 10);
        let result: CoreResult<Vec<_>> = edges
            .get_edges_from_source(&scope(), &SearchByEdgeType::new(Id::generate("user"), "owns", 1))
            .try_collect()
            .await;
        assert!(matches!(result, Err(CoreError::Storage(StorageError::Unavailable(_)))));
    }
}

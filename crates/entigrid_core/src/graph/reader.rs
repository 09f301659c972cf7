//! Merged reads over the edge commit log and durable storage.
//!
//! Recent edges live in the commit log until they are copied to storage, so
//! an edge can be in either source or in both. Reads merge the two sorted
//! streams into one, newest first. When both hold the same edge the commit
//! log copy wins, since it carries the latest delete mark.

use super::edge::{MarkedEdge, SearchByEdgeType, SearchByIdType};
use super::serialization::{EdgeSerialization, EdgeStream};
use crate::error::CoreResult;
use crate::id::Id;
use crate::scope::Scope;
use futures::StreamExt;
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use stream_more::{KMerge, StreamMore};

/// Where a merged edge was read from. Earlier variants win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    CommitLog,
    Storage,
}

#[derive(Debug)]
struct Sourced {
    edge: MarkedEdge,
    origin: Origin,
}

type SourcedResult = CoreResult<Sourced>;

/// Sort key shared by every edge row layout.
///
/// Within one row either the source or the target is fixed, so comparing
/// both ends agrees with the column order of each source stream.
fn order_key(edge: &MarkedEdge) -> (u64, &Id, &Id, &str) {
    (edge.timestamp(), edge.target(), edge.source(), edge.edge_type())
}

/// Returns true if `r1` is yielded before `r2`: newer first, commit log first
/// on a tie.
fn by_time_desc(r1: &SourcedResult, r2: &SourcedResult) -> bool {
    match (r1, r2) {
        (Ok(s1), Ok(s2)) => {
            (order_key(&s1.edge), Reverse(s1.origin)) >= (order_key(&s2.edge), Reverse(s2.origin))
        }
        // Errors are yielded as they come; the caller stops on them.
        _ => true,
    }
}

/// Collapses the same edge read from both sources into the commit log copy.
fn keep_commit_log(
    r1: SourcedResult,
    r2: SourcedResult,
) -> Result<SourcedResult, (SourcedResult, SourcedResult)> {
    match (r1, r2) {
        (Ok(s1), Ok(s2)) if s1.origin != s2.origin && s1.edge.same_edge(&s2.edge) => {
            Ok(Ok(if s1.origin < s2.origin { s1 } else { s2 }))
        }
        (r1, r2) => Err((r1, r2)),
    }
}

fn tagged(stream: EdgeStream, origin: Origin) -> futures::stream::BoxStream<'static, SourcedResult> {
    stream
        .map(move |r| r.map(|edge| Sourced { edge, origin }))
        .boxed()
}

fn merge(commit_log: EdgeStream, storage: EdgeStream) -> EdgeStream {
    let kmerge = KMerge::by(by_time_desc)
        .merge(tagged(commit_log, Origin::CommitLog))
        .merge(tagged(storage, Origin::Storage));

    kmerge
        .coalesce(keep_commit_log)
        .map(|r| r.map(|s| s.edge))
        .boxed()
}

/// Reads edges from a commit log and durable storage as one stream.
///
/// Each call issues fresh reads against both sources; nothing is cached.
#[derive(Clone)]
pub struct MergedEdgeReader {
    commit_log: Arc<dyn EdgeSerialization>,
    storage: Arc<dyn EdgeSerialization>,
}

impl MergedEdgeReader {
    /// Merges `commit_log` over `storage`.
    #[must_use]
    pub fn new(commit_log: Arc<dyn EdgeSerialization>, storage: Arc<dyn EdgeSerialization>) -> Self {
        Self {
            commit_log,
            storage,
        }
    }

    /// Outgoing edges of the searched type, newest first.
    #[must_use]
    pub fn get_edges_from_source(&self, scope: &Scope, search: &SearchByEdgeType) -> EdgeStream {
        merge(
            self.commit_log.get_edges_from_source(scope, search),
            self.storage.get_edges_from_source(scope, search),
        )
    }

    /// Incoming edges of the searched type, newest first.
    #[must_use]
    pub fn get_edges_to_target(&self, scope: &Scope, search: &SearchByEdgeType) -> EdgeStream {
        merge(
            self.commit_log.get_edges_to_target(scope, search),
            self.storage.get_edges_to_target(scope, search),
        )
    }

    /// Outgoing edges whose target has the searched type, newest first.
    #[must_use]
    pub fn get_edges_from_source_by_target_type(
        &self,
        scope: &Scope,
        search: &SearchByIdType,
    ) -> EdgeStream {
        merge(
            self.commit_log.get_edges_from_source_by_target_type(scope, search),
            self.storage.get_edges_from_source_by_target_type(scope, search),
        )
    }

    /// Incoming edges whose source has the searched type, newest first.
    #[must_use]
    pub fn get_edges_to_target_by_source_type(
        &self,
        scope: &Scope,
        search: &SearchByIdType,
    ) -> EdgeStream {
        merge(
            self.commit_log.get_edges_to_target_by_source_type(scope, search),
            self.storage.get_edges_to_target_by_source_type(scope, search),
        )
    }
}

impl fmt::Debug for MergedEdgeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedEdgeReader").finish_non_exhaustive()
    }
}

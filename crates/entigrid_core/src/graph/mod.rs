//! Graph edges.
//!
//! Edges are written to a commit log and later copied to durable storage.
//! Reads go through [`MergedEdgeReader`], which merges both sources into a
//! single stream ordered by timestamp, newest first.

mod edge;
mod manager;
mod reader;
mod serialization;

pub use edge::{MarkedEdge, SearchByEdgeType, SearchByIdType};
pub use manager::EdgeManager;
pub use reader::MergedEdgeReader;
pub use serialization::{
    ColumnEdgeSerialization, EdgeSerialization, EdgeStream, CF_EDGES, CF_EDGE_COMMIT_LOG,
};

//! Edges and edge searches.

use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A directed, typed edge between two entities.
///
/// Edges are never updated in place. Removing an edge writes a second record
/// with the same identity and the `deleted` mark set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkedEdge {
    source: Id,
    edge_type: String,
    target: Id,
    timestamp: u64,
    deleted: bool,
}

impl MarkedEdge {
    /// A live edge.
    #[must_use]
    pub fn new(source: Id, edge_type: impl Into<String>, target: Id, timestamp: u64) -> Self {
        Self {
            source,
            edge_type: edge_type.into(),
            target,
            timestamp,
            deleted: false,
        }
    }

    /// A delete mark for the edge with the same identity.
    #[must_use]
    pub fn into_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    #[must_use]
    pub(crate) fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// The node the edge leaves.
    #[must_use]
    pub fn source(&self) -> &Id {
        &self.source
    }

    /// The edge type, e.g. `"owns"`.
    #[must_use]
    pub fn edge_type(&self) -> &str {
        &self.edge_type
    }

    /// The node the edge points at.
    #[must_use]
    pub fn target(&self) -> &Id {
        &self.target
    }

    /// Write time of the edge.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Whether this record marks the edge deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// True if both records describe the same edge, ignoring the mark.
    #[must_use]
    pub fn same_edge(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.edge_type == other.edge_type
            && self.source == other.source
            && self.target == other.target
    }

    /// Checks that both ends are valid ids and the type is not empty.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        self.source.validate()?;
        self.target.validate()?;
        if self.edge_type.is_empty() {
            return Err(CoreError::validation("edge type must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for MarkedEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -{}-> {} @{}",
            self.source, self.edge_type, self.target, self.timestamp
        )?;
        if self.deleted {
            f.write_str(" (deleted)")?;
        }
        Ok(())
    }
}

/// Edges of one type at a node, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchByEdgeType {
    /// The node whose edges are read.
    pub node: Id,
    /// The edge type.
    pub edge_type: String,
    /// Only edges written at or before this timestamp are returned.
    pub max_timestamp: u64,
    /// Resume after this edge, as returned by an earlier page.
    pub last: Option<MarkedEdge>,
}

impl SearchByEdgeType {
    /// Searches every edge of `edge_type` at `node` up to `max_timestamp`.
    #[must_use]
    pub fn new(node: Id, edge_type: impl Into<String>, max_timestamp: u64) -> Self {
        Self {
            node,
            edge_type: edge_type.into(),
            max_timestamp,
            last: None,
        }
    }

    /// Continues after `last`.
    #[must_use]
    pub fn resume_after(mut self, last: MarkedEdge) -> Self {
        self.last = Some(last);
        self
    }
}

/// Edges of one type at a node whose other end has a given entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchByIdType {
    /// Node, edge type and paging.
    pub search: SearchByEdgeType,
    /// Entity type of the other end of the edge.
    pub id_type: String,
}

impl SearchByIdType {
    /// Searches edges of `edge_type` at `node` whose other end is an `id_type`.
    #[must_use]
    pub fn new(
        node: Id,
        edge_type: impl Into<String>,
        id_type: impl Into<String>,
        max_timestamp: u64,
    ) -> Self {
        Self {
            search: SearchByEdgeType::new(node, edge_type, max_timestamp),
            id_type: id_type.into(),
        }
    }

    /// Continues after `last`.
    #[must_use]
    pub fn resume_after(mut self, last: MarkedEdge) -> Self {
        self.search.last = Some(last);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_mark_is_same_edge() {
        let edge = MarkedEdge::new(Id::generate("user"), "owns", Id::generate("car"), 10);
        let mark = edge.clone().into_deleted();
        assert!(mark.is_deleted());
        assert!(edge.same_edge(&mark));
        assert_ne!(edge, mark);
    }

    #[test]
    fn validate_rejects_empty_type() {
        let edge = MarkedEdge::new(Id::generate("user"), "", Id::generate("car"), 10);
        assert!(matches!(edge.validate(), Err(CoreError::Validation { .. })));
    }

    #[test]
    fn display_shows_mark() {
        let edge = MarkedEdge::new(Id::generate("user"), "owns", Id::generate("car"), 7).into_deleted();
        let shown = edge.to_string();
        assert!(shown.contains("-owns->"));
        assert!(shown.ends_with("(deleted)"));
    }
}

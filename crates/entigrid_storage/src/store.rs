//! Column store trait definition.

use crate::batch::MutationBatch;
use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Bound;

/// A single live cell read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name. Columns within a row are ordered by name bytes.
    pub name: Bytes,
    /// Opaque cell value.
    pub value: Bytes,
    /// Write timestamp that produced this cell.
    pub timestamp: u64,
}

/// A slice of columns within one row.
///
/// Bounds are expressed in ascending column order. When `reversed` is set
/// the columns inside the bounds are returned from the highest name down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRange {
    /// Lower bound on column names.
    pub lower: Bound<Bytes>,
    /// Upper bound on column names.
    pub upper: Bound<Bytes>,
    /// Iterate from the upper bound downwards.
    pub reversed: bool,
    /// Maximum number of live columns to return.
    pub limit: usize,
}

impl ColumnRange {
    /// A range covering the whole row, ascending, without limit.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            reversed: false,
            limit: usize::MAX,
        }
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn lower(mut self, bound: Bound<Bytes>) -> Self {
        self.lower = bound;
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn upper(mut self, bound: Bound<Bytes>) -> Self {
        self.upper = bound;
        self
    }

    /// Returns columns in descending name order.
    #[must_use]
    pub const fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    /// Caps the number of returned columns.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for ColumnRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Client of a wide-column store.
///
/// Data is addressed as column family / row key / column name. Every write
/// carries an explicit timestamp and conflicting writes to the same cell are
/// resolved last-write-wins by that timestamp. On equal timestamps a delete
/// beats a put, and a later put replaces an earlier one.
///
/// # Invariants
///
/// - A batch passed to `mutate` is applied as a unit
/// - Reads never return cells shadowed by a newer delete
/// - Implementations must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryColumnStore`] - For testing and single-process use
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Creates a column family if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn create_column_family(&self, name: &str) -> StorageResult<()>;

    /// Reads a single column.
    ///
    /// # Errors
    ///
    /// Returns an error if the column family is unknown or the store cannot be
    /// reached.
    async fn get_column(&self, cf: &str, row: &[u8], column: &[u8])
        -> StorageResult<Option<Column>>;

    /// Reads the named columns of a row, skipping missing ones.
    ///
    /// Columns are returned in the order of `columns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the column family is unknown or the store cannot be
    /// reached.
    async fn get_columns(&self, cf: &str, row: &[u8], columns: &[Bytes])
        -> StorageResult<Vec<Column>>;

    /// Reads a slice of a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the column family is unknown or the store cannot be
    /// reached.
    async fn scan_columns(&self, cf: &str, row: &[u8], range: &ColumnRange)
        -> StorageResult<Vec<Column>>;

    /// Applies a batch of timestamped puts and deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if any column family in the batch is unknown or the
    /// store cannot be reached. No mutation is applied in that case.
    async fn mutate(&self, batch: MutationBatch) -> StorageResult<()>;
}

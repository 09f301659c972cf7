//! In-memory column store for testing.

use crate::batch::{Mutation, MutationBatch};
use crate::error::{StorageError, StorageResult};
use crate::store::{Column, ColumnRange, ColumnStore};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct Cell {
    /// `None` is a tombstone.
    value: Option<Bytes>,
    timestamp: u64,
}

impl Cell {
    fn is_superseded_by(&self, timestamp: u64, is_delete: bool) -> bool {
        timestamp > self.timestamp
            || (timestamp == self.timestamp && (is_delete || self.value.is_some()))
    }

    fn live(&self, name: &Bytes) -> Option<Column> {
        self.value.as_ref().map(|value| Column {
            name: name.clone(),
            value: value.clone(),
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, Default)]
struct Row {
    cells: BTreeMap<Bytes, Cell>,
}

impl Row {
    fn write(&mut self, column: Bytes, value: Option<Bytes>, timestamp: u64) {
        let is_delete = value.is_none();
        match self.cells.get_mut(&column) {
            Some(cell) if !cell.is_superseded_by(timestamp, is_delete) => {}
            Some(cell) => *cell = Cell { value, timestamp },
            None => {
                self.cells.insert(column, Cell { value, timestamp });
            }
        }
    }
}

type Family = HashMap<Bytes, Row>;

/// An in-memory wide-column store.
///
/// Cells keep their write timestamp and tombstones are retained, so
/// last-write-wins resolution behaves like a distributed store: a delete
/// issued at `t - 1` never removes a value written at `t`.
///
/// # Thread Safety
///
/// Batches are applied under a single write lock, so each batch is atomic
/// with respect to concurrent readers.
///
/// # Example
///
/// ```rust
/// use entigrid_storage::{ColumnStore, InMemoryColumnStore, MutationBatch};
///
/// # async fn demo() -> entigrid_storage::StorageResult<()> {
/// let store = InMemoryColumnStore::new();
/// store.create_column_family("users").await?;
///
/// let mut batch = MutationBatch::new();
/// batch.put("users", b"alice".to_vec(), b"email".to_vec(), b"a@x".to_vec(), 1);
/// store.mutate(batch).await?;
///
/// let column = store.get_column("users", b"alice", b"email").await?;
/// assert_eq!(column.map(|c| c.value.to_vec()), Some(b"a@x".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryColumnStore {
    families: RwLock<HashMap<String, Family>>,
    unavailable: AtomicBool,
}

impl InMemoryColumnStore {
    /// Creates an empty store without column families.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Names of the column families created so far.
    #[must_use]
    pub fn column_families(&self) -> Vec<String> {
        let mut names: Vec<_> = self.families.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of rows that hold at least one live column.
    #[must_use]
    pub fn live_row_count(&self, cf: &str) -> usize {
        self.families.read().get(cf).map_or(0, |family| {
            family
                .values()
                .filter(|row| row.cells.values().any(|cell| cell.value.is_some()))
                .count()
        })
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn with_row<T>(
        &self,
        cf: &str,
        row: &[u8],
        read: impl FnOnce(Option<&Row>) -> T,
    ) -> StorageResult<T> {
        self.check_available()?;
        let families = self.families.read();
        let family = families
            .get(cf)
            .ok_or_else(|| StorageError::UnknownColumnFamily(cf.to_string()))?;
        Ok(read(family.get(row)))
    }
}

fn range_is_empty(lower: &Bound<Bytes>, upper: &Bound<Bytes>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

#[async_trait]
impl ColumnStore for InMemoryColumnStore {
    async fn create_column_family(&self, name: &str) -> StorageResult<()> {
        self.check_available()?;
        self.families.write().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn get_column(
        &self,
        cf: &str,
        row: &[u8],
        column: &[u8],
    ) -> StorageResult<Option<Column>> {
        self.with_row(cf, row, |row| {
            row.and_then(|row| {
                row.cells
                    .get_key_value(column)
                    .and_then(|(name, cell)| cell.live(name))
            })
        })
    }

    async fn get_columns(
        &self,
        cf: &str,
        row: &[u8],
        columns: &[Bytes],
    ) -> StorageResult<Vec<Column>> {
        self.with_row(cf, row, |row| {
            let Some(row) = row else {
                return Vec::new();
            };
            columns
                .iter()
                .filter_map(|column| {
                    row.cells
                        .get_key_value(column)
                        .and_then(|(name, cell)| cell.live(name))
                })
                .collect()
        })
    }

    async fn scan_columns(
        &self,
        cf: &str,
        row: &[u8],
        range: &ColumnRange,
    ) -> StorageResult<Vec<Column>> {
        self.with_row(cf, row, |row| {
            let Some(row) = row else {
                return Vec::new();
            };
            if range.limit == 0 || range_is_empty(&range.lower, &range.upper) {
                return Vec::new();
            }
            let slice = row.cells.range((range.lower.clone(), range.upper.clone()));
            let live = |(name, cell): (&Bytes, &Cell)| cell.live(name);
            if range.reversed {
                slice.rev().filter_map(live).take(range.limit).collect()
            } else {
                slice.filter_map(live).take(range.limit).collect()
            }
        })
    }

    async fn mutate(&self, batch: MutationBatch) -> StorageResult<()> {
        self.check_available()?;
        let mut families = self.families.write();
        if let Some(missing) = batch
            .iter()
            .map(Mutation::column_family)
            .find(|cf| !families.contains_key(*cf))
        {
            return Err(StorageError::UnknownColumnFamily(missing.to_string()));
        }

        for mutation in batch {
            match mutation {
                Mutation::Put {
                    cf,
                    row,
                    column,
                    value,
                    timestamp,
                } => {
                    let family = families.entry(cf).or_default();
                    family.entry(row).or_default().write(column, Some(value), timestamp);
                }
                Mutation::Delete {
                    cf,
                    row,
                    column,
                    timestamp,
                } => {
                    let family = families.entry(cf).or_default();
                    family.entry(row).or_default().write(column, None, timestamp);
                }
            }
        }
        Ok(())
    }
}

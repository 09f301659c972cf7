//! Timestamped mutation batches.

use bytes::Bytes;

/// One change to a cell or row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Writes a column value.
    Put {
        /// Column family.
        cf: String,
        /// Row key.
        row: Bytes,
        /// Column name.
        column: Bytes,
        /// New value.
        value: Bytes,
        /// Write timestamp.
        timestamp: u64,
    },
    /// Deletes a column.
    Delete {
        /// Column family.
        cf: String,
        /// Row key.
        row: Bytes,
        /// Column name.
        column: Bytes,
        /// Delete timestamp.
        timestamp: u64,
    },
}

impl Mutation {
    /// Column family the mutation targets.
    #[must_use]
    pub fn column_family(&self) -> &str {
        match self {
            Self::Put { cf, .. } | Self::Delete { cf, .. } => cf,
        }
    }
}

/// An ordered group of mutations applied together.
///
/// ```rust
/// use entigrid_storage::MutationBatch;
///
/// let mut batch = MutationBatch::new();
/// batch
///     .put("cf", b"row".to_vec(), b"col".to_vec(), b"value".to_vec(), 10)
///     .delete("cf", b"row".to_vec(), b"old".to_vec(), 9);
/// assert_eq!(batch.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    mutations: Vec<Mutation>,
}

impl MutationBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column write.
    pub fn put(
        &mut self,
        cf: &str,
        row: impl Into<Bytes>,
        column: impl Into<Bytes>,
        value: impl Into<Bytes>,
        timestamp: u64,
    ) -> &mut Self {
        self.mutations.push(Mutation::Put {
            cf: cf.to_string(),
            row: row.into(),
            column: column.into(),
            value: value.into(),
            timestamp,
        });
        self
    }

    /// Adds a column delete.
    pub fn delete(
        &mut self,
        cf: &str,
        row: impl Into<Bytes>,
        column: impl Into<Bytes>,
        timestamp: u64,
    ) -> &mut Self {
        self.mutations.push(Mutation::Delete {
            cf: cf.to_string(),
            row: row.into(),
            column: column.into(),
            timestamp,
        });
        self
    }

    /// Appends all mutations of `other`.
    pub fn merge(&mut self, other: MutationBatch) -> &mut Self {
        self.mutations.extend(other.mutations);
        self
    }

    /// Number of mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if the batch holds no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Iterates the mutations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl IntoIterator for MutationBatch {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

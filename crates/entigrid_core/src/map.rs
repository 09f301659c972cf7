//! Scoped key/value storage.
//!
//! A [`MapManager`] stores serde values under string keys in one row per
//! scope. Values are CBOR encoded and bounded in size.

use crate::error::{CoreError, CoreResult};
use crate::keys::KeyBuilder;
use crate::scope::Scope;
use crate::version::VersionGenerator;
use bytes::Bytes;
use entigrid_storage::{ColumnRange, ColumnStore, MutationBatch, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

/// Column family holding map entries.
pub const CF_MAP_ENTRIES: &str = "map_entries";

/// A string-keyed map of serialized values within one [`Scope`].
///
/// Writes are stamped by the version generator, so of two writes to the same
/// key the later one wins, including a delete following a put.
#[derive(Clone)]
pub struct MapManager {
    scope: Scope,
    row: Bytes,
    store: Arc<dyn ColumnStore>,
    versions: Arc<dyn VersionGenerator>,
    size_limit: usize,
    page_size: usize,
}

impl MapManager {
    pub(crate) fn new(
        scope: Scope,
        store: Arc<dyn ColumnStore>,
        versions: Arc<dyn VersionGenerator>,
        size_limit: usize,
        page_size: usize,
    ) -> Self {
        let row = KeyBuilder::new().scope(&scope).str("map").build();
        Self {
            scope,
            row,
            store,
            versions,
            size_limit,
            page_size: page_size.max(1),
        }
    }

    /// The scope of this map.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectTooLarge`] if the encoded value exceeds the
    /// configured limit, or the codec or storage error.
    pub async fn put<T>(&self, key: &str, value: &T) -> CoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = entigrid_codec::to_vec(value)?;
        if encoded.len() > self.size_limit {
            return Err(CoreError::ObjectTooLarge {
                size: encoded.len(),
                limit: self.size_limit,
            });
        }

        let mut batch = MutationBatch::new();
        batch.put(
            CF_MAP_ENTRIES,
            self.row.clone(),
            Bytes::copy_from_slice(key.as_bytes()),
            encoded,
            self.timestamp(),
        );
        self.store.mutate(batch).await?;
        debug!(scope = %self.scope, key, "map entry written");
        Ok(())
    }

    /// The value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns the storage error, or a codec error if the stored value does
    /// not decode as `T`.
    pub async fn get<T>(&self, key: &str) -> CoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let column = self
            .store
            .get_column(CF_MAP_ENTRIES, &self.row, key.as_bytes())
            .await?;
        column
            .map(|c| entigrid_codec::from_slice(&c.value).map_err(CoreError::from))
            .transpose()
    }

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns the storage error.
    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        let mut batch = MutationBatch::new();
        batch.delete(
            CF_MAP_ENTRIES,
            self.row.clone(),
            Bytes::copy_from_slice(key.as_bytes()),
            self.timestamp(),
        );
        self.store.mutate(batch).await?;
        Ok(())
    }

    /// Every key in the map, in byte order.
    ///
    /// # Errors
    ///
    /// Returns the storage error, or a corruption error for a key that is not
    /// UTF-8.
    pub async fn keys(&self) -> CoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut lower = Bound::Unbounded;
        loop {
            let range = ColumnRange::all().lower(lower).limit(self.page_size);
            let columns = self
                .store
                .scan_columns(CF_MAP_ENTRIES, &self.row, &range)
                .await?;
            for column in &columns {
                let key = std::str::from_utf8(&column.name).map_err(|e| {
                    CoreError::Storage(StorageError::Corrupted(format!("map key: {e}")))
                })?;
                keys.push(key.to_string());
            }
            match columns.last() {
                Some(last) if columns.len() == self.page_size => {
                    lower = Bound::Excluded(last.name.clone());
                }
                _ => return Ok(keys),
            }
        }
    }

    fn timestamp(&self) -> u64 {
        self.versions.next_version().timestamp()
    }
}

impl fmt::Debug for MapManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapManager")
            .field("scope", &self.scope)
            .field("size_limit", &self.size_limit)
            .finish_non_exhaustive()
    }
}

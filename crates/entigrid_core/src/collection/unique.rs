//! Reverse index enforcing unique property values.
//!
//! Each (scope, entity type, property, value) maps to one row whose columns
//! are the uuids of the entities owning that value. A healthy row has at most
//! one column; more than one is corruption, reported but tolerated.

use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::keys::{self, KeyBuilder};
use crate::scope::Scope;
use bytes::Bytes;
use entigrid_codec::Value;
use entigrid_storage::{ColumnRange, ColumnStore, MutationBatch};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Column family holding unique value ownership.
pub const CF_UNIQUE_VALUES: &str = "unique_values";

/// Reads and writes unique value ownership rows.
#[derive(Clone)]
pub(crate) struct UniqueValueIndex {
    store: Arc<dyn ColumnStore>,
}

impl UniqueValueIndex {
    pub(crate) fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self { store }
    }

    fn row(scope: &Scope, entity_type: &str, property: &str, value: &Value) -> CoreResult<Bytes> {
        Ok(KeyBuilder::new()
            .scope(scope)
            .str(entity_type)
            .str(property)
            .bytes(&entigrid_codec::to_vec(value)?)
            .build())
    }

    /// Lock key serializing writers of one unique value.
    pub(crate) fn lock_key(
        scope: &Scope,
        entity_type: &str,
        property: &str,
        value: &Value,
    ) -> CoreResult<String> {
        let row = Self::row(scope, entity_type, property, value)?;
        Ok(keys::lock_key("u/", &row))
    }

    /// Uuids of every entity owning `value`.
    pub(crate) async fn owners(
        &self,
        scope: &Scope,
        entity_type: &str,
        property: &str,
        value: &Value,
    ) -> CoreResult<BTreeSet<Uuid>> {
        let row = Self::row(scope, entity_type, property, value)?;
        let columns = self
            .store
            .scan_columns(CF_UNIQUE_VALUES, &row, &ColumnRange::all())
            .await?;
        let owners: BTreeSet<Uuid> = columns
            .iter()
            .filter_map(|c| Uuid::from_slice(&c.name).ok())
            .collect();
        if owners.len() > 1 {
            error!(
                %scope,
                entity_type,
                property,
                %value,
                ?owners,
                "unique value has more than one owner, index is corrupt"
            );
        }
        Ok(owners)
    }

    /// Succeeds if `value` is free or already owned by `id`.
    pub(crate) async fn verify(
        &self,
        scope: &Scope,
        id: &Id,
        property: &str,
        value: &Value,
    ) -> CoreResult<()> {
        let owners = self.owners(scope, id.entity_type(), property, value).await?;
        if owners.is_empty() || owners.contains(&id.uuid()) {
            return Ok(());
        }
        let owner = owners.into_iter().next().unwrap_or_default();
        Err(CoreError::UniqueConflict {
            entity_type: id.entity_type().to_string(),
            property: property.to_string(),
            value: value.to_string(),
            owner,
        })
    }

    pub(crate) fn claim(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        id: &Id,
        property: &str,
        value: &Value,
        timestamp: u64,
    ) -> CoreResult<()> {
        let row = Self::row(scope, id.entity_type(), property, value)?;
        batch.put(
            CF_UNIQUE_VALUES,
            row,
            Bytes::copy_from_slice(id.uuid().as_bytes()),
            Bytes::new(),
            timestamp,
        );
        Ok(())
    }

    pub(crate) fn release(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        id: &Id,
        property: &str,
        value: &Value,
        timestamp: u64,
    ) -> CoreResult<()> {
        let row = Self::row(scope, id.entity_type(), property, value)?;
        batch.delete(
            CF_UNIQUE_VALUES,
            row,
            Bytes::copy_from_slice(id.uuid().as_bytes()),
            timestamp,
        );
        Ok(())
    }

    /// Moves ownership from `old` to `new` for a write at `timestamp`.
    ///
    /// A changed or removed old value is released at `timestamp - 1` so the
    /// release can never shadow a claim made at `timestamp`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn reassign(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        id: &Id,
        property: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        timestamp: u64,
    ) -> CoreResult<()> {
        if let Some(old) = old.filter(|old| Some(*old) != new) {
            self.release(batch, scope, id, property, old, timestamp.saturating_sub(1))?;
        }
        if let Some(new) = new {
            self.claim(batch, scope, id, property, new, timestamp)?;
        }
        Ok(())
    }
}

//! Column layout of entity versions and write logs.
//!
//! Both column families use one row per (scope, entity id) and one column per
//! version, named by the 16 version bytes so columns sort by version.

use super::mvcc::{LogEntry, MvccEntity, Stage, Status};
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::keys::entity_row;
use crate::scope::Scope;
use crate::version::Version;
use bytes::Bytes;
use entigrid_storage::{Column, ColumnRange, ColumnStore, MutationBatch, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;

/// Column family holding entity versions.
pub const CF_ENTITY_VERSIONS: &str = "entity_versions";

/// Column family holding write log entries.
pub const CF_ENTITY_LOG: &str = "entity_log";

#[derive(Serialize)]
struct StoredVersionRef<'a> {
    status: Status,
    entity: Option<&'a Entity>,
}

#[derive(Deserialize)]
struct StoredVersion {
    status: Status,
    entity: Option<Entity>,
}

fn version_column(version: Version) -> Bytes {
    Bytes::copy_from_slice(version.as_bytes())
}

fn decode_version(column: &Column) -> CoreResult<Version> {
    Version::from_slice(&column.name).ok_or_else(|| {
        CoreError::Storage(StorageError::Corrupted(format!(
            "column name of {} bytes is not a version",
            column.name.len()
        )))
    })
}

/// Reads and writes entity versions and their log entries.
#[derive(Clone)]
pub(crate) struct EntityStore {
    store: Arc<dyn ColumnStore>,
    page_size: usize,
}

impl EntityStore {
    pub(crate) fn new(store: Arc<dyn ColumnStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub(crate) fn write_version(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        mvcc: &MvccEntity,
    ) -> CoreResult<()> {
        let record = StoredVersionRef {
            status: mvcc.status(),
            entity: mvcc.entity(),
        };
        let version = mvcc.version();
        batch.put(
            CF_ENTITY_VERSIONS,
            entity_row(scope, mvcc.id()),
            version_column(version),
            entigrid_codec::to_vec(&record)?,
            version.timestamp(),
        );
        Ok(())
    }

    pub(crate) fn remove_version(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        id: &Id,
        version: Version,
    ) {
        batch.delete(
            CF_ENTITY_VERSIONS,
            entity_row(scope, id),
            version_column(version),
            version.timestamp(),
        );
    }

    /// Stages share the version's timestamp; a later stage replaces an earlier one.
    pub(crate) fn write_log(
        &self,
        batch: &mut MutationBatch,
        scope: &Scope,
        entry: &LogEntry,
    ) -> CoreResult<()> {
        batch.put(
            CF_ENTITY_LOG,
            entity_row(scope, &entry.id),
            version_column(entry.version),
            entigrid_codec::to_vec(&entry.stage)?,
            entry.version.timestamp(),
        );
        Ok(())
    }

    /// One page of log entries below `upper`, newest first.
    pub(crate) async fn log_page(
        &self,
        scope: &Scope,
        id: &Id,
        upper: Option<Version>,
    ) -> CoreResult<Vec<LogEntry>> {
        let columns = self
            .scan_page(CF_ENTITY_LOG, &entity_row(scope, id), upper)
            .await?;
        columns
            .iter()
            .map(|column| -> CoreResult<LogEntry> {
                Ok(LogEntry::new(
                    id.clone(),
                    decode_version(column)?,
                    entigrid_codec::from_slice(&column.value)?,
                ))
            })
            .collect()
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    /// Newest committed version, live or deleted.
    pub(crate) async fn load_head(&self, scope: &Scope, id: &Id) -> CoreResult<Option<MvccEntity>> {
        let mut upper = None;
        loop {
            let (page, full) = self.committed_page(scope, id, upper).await?;
            if let Some(head) = page.first() {
                return Ok(Some(head.clone()));
            }
            match full {
                Some(last) => upper = Some(last),
                None => return Ok(None),
            }
        }
    }

    /// Every committed version, oldest first.
    pub(crate) async fn load_committed(&self, scope: &Scope, id: &Id) -> CoreResult<Vec<MvccEntity>> {
        let mut versions = Vec::new();
        let mut upper = None;
        loop {
            let (page, full) = self.committed_page(scope, id, upper).await?;
            versions.extend(page);
            match full {
                Some(last) => upper = Some(last),
                None => break,
            }
        }
        versions.reverse();
        Ok(versions)
    }

    /// Committed versions of one page below `upper`, newest first, plus the
    /// last version scanned when the page was full.
    async fn committed_page(
        &self,
        scope: &Scope,
        id: &Id,
        upper: Option<Version>,
    ) -> CoreResult<(Vec<MvccEntity>, Option<Version>)> {
        let row = entity_row(scope, id);
        let columns = self.scan_page(CF_ENTITY_VERSIONS, &row, upper).await?;
        let names: Vec<Bytes> = columns.iter().map(|c| c.name.clone()).collect();
        let stages: HashMap<Bytes, Stage> = self
            .store
            .get_columns(CF_ENTITY_LOG, &row, &names)
            .await?
            .into_iter()
            .map(|c| -> CoreResult<(Bytes, Stage)> {
                Ok((c.name, entigrid_codec::from_slice(&c.value)?))
            })
            .collect::<CoreResult<_>>()?;

        let mut committed = Vec::new();
        for column in &columns {
            if stages.get(&column.name) != Some(&Stage::Committed) {
                continue;
            }
            let record: StoredVersion = entigrid_codec::from_slice(&column.value)?;
            committed.push(MvccEntity::from_parts(
                id.clone(),
                decode_version(column)?,
                record.status,
                record.entity,
            )?);
        }

        let next = if columns.len() == self.page_size {
            columns.last().map(decode_version).transpose()?
        } else {
            None
        };
        Ok((committed, next))
    }

    async fn scan_page(
        &self,
        cf: &str,
        row: &[u8],
        upper: Option<Version>,
    ) -> CoreResult<Vec<Column>> {
        let upper = upper.map_or(Bound::Unbounded, |v| Bound::Excluded(version_column(v)));
        let range = ColumnRange::all().upper(upper).reversed().limit(self.page_size);
        Ok(self.store.scan_columns(cf, row, &range).await?)
    }
}

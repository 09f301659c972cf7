//! Column family provisioning.
//!
//! Every column family the core reads or writes is created up front by
//! [`migrate`]. Creation is idempotent, so it runs on every start.

use crate::collection::{CF_ENTITY_LOG, CF_ENTITY_VERSIONS, CF_UNIQUE_VALUES};
use crate::error::CoreResult;
use crate::graph::{CF_EDGES, CF_EDGE_COMMIT_LOG};
use crate::map::CF_MAP_ENTRIES;
use entigrid_storage::ColumnStore;
use tracing::info;

/// Column families owned by the core.
pub const COLUMN_FAMILIES: &[&str] = &[
    CF_ENTITY_VERSIONS,
    CF_ENTITY_LOG,
    CF_UNIQUE_VALUES,
    CF_EDGE_COMMIT_LOG,
    CF_EDGES,
    CF_MAP_ENTRIES,
];

/// Result of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Column families ensured, in creation order.
    pub column_families: Vec<&'static str>,
}

/// Ensures every column family in [`COLUMN_FAMILIES`] exists.
///
/// # Errors
///
/// Returns the first storage error; families created before it remain.
pub async fn migrate(store: &dyn ColumnStore) -> CoreResult<MigrationReport> {
    let mut column_families = Vec::with_capacity(COLUMN_FAMILIES.len());
    for &name in COLUMN_FAMILIES {
        store.create_column_family(name).await?;
        column_families.push(name);
    }
    info!(count = column_families.len(), "column families ready");
    Ok(MigrationReport { column_families })
}

//! Versioned entity collections.
//!
//! An [`EntityCollectionManager`] is the entry point for one [`Scope`]. It
//! drives the staged write pipeline, enforces unique properties and schedules
//! post-commit indexing on the consistency processor.
//!
//! [`Scope`]: crate::scope::Scope

pub mod changelog;
mod index;
mod manager;
mod mvcc;
mod pipeline;
mod serialization;
mod unique;

pub use changelog::{ChangeLogEntry, ChangeType};
pub use index::{EntityIndexHandler, InMemorySearchIndex, SearchIndex};
pub use manager::EntityCollectionManager;
pub use mvcc::{LogEntry, MvccEntity, Stage, Status};
pub use pipeline::WriteStage;
pub use serialization::{CF_ENTITY_LOG, CF_ENTITY_VERSIONS};
pub use unique::CF_UNIQUE_VALUES;

use crate::config::Config;
use crate::consistency::AsyncProcessor;
use crate::schema::Schema;
use crate::version::VersionGenerator;
use entigrid_storage::{ColumnStore, Locker};
use serialization::EntityStore;
use std::sync::Arc;
use unique::UniqueValueIndex;

/// Collaborators shared by every collection of one core.
pub(crate) struct CollectionContext {
    pub(crate) store: Arc<dyn ColumnStore>,
    pub(crate) entities: EntityStore,
    pub(crate) unique: UniqueValueIndex,
    pub(crate) locker: Arc<dyn Locker>,
    pub(crate) versions: Arc<dyn VersionGenerator>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) index: Option<Arc<dyn SearchIndex>>,
    pub(crate) processor: AsyncProcessor,
    pub(crate) config: Config,
}

impl CollectionContext {
    pub(crate) fn new(
        store: Arc<dyn ColumnStore>,
        locker: Arc<dyn Locker>,
        versions: Arc<dyn VersionGenerator>,
        schema: Arc<Schema>,
        index: Option<Arc<dyn SearchIndex>>,
        processor: AsyncProcessor,
        config: Config,
    ) -> Self {
        Self {
            entities: EntityStore::new(Arc::clone(&store), config.scan_page_size),
            unique: UniqueValueIndex::new(Arc::clone(&store)),
            store,
            locker,
            versions,
            schema,
            index,
            processor,
            config,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::consistency::{InMemoryTimeoutQueue, TaskKind};
    use crate::migration::migrate;
    use crate::version::TimeVersionGenerator;
    use entigrid_storage::{InMemoryColumnStore, InMemoryLocker};

    pub(crate) struct Harness {
        pub(crate) store: Arc<InMemoryColumnStore>,
        pub(crate) ctx: Arc<CollectionContext>,
    }

    pub(crate) async fn harness(schema: Schema, index: Option<Arc<dyn SearchIndex>>) -> Harness {
        let store = Arc::new(InMemoryColumnStore::new());
        migrate(store.as_ref()).await.unwrap();
        let config = Config::default();
        let processor = AsyncProcessor::new(Arc::new(InMemoryTimeoutQueue::new()), &config);
        let ctx = Arc::new(CollectionContext::new(
            store.clone(),
            Arc::new(InMemoryLocker::new()),
            Arc::new(TimeVersionGenerator::new()),
            Arc::new(schema),
            index.clone(),
            processor.clone(),
            config,
        ));
        if let Some(index) = index {
            processor.register(
                TaskKind::EntityUpdate,
                Arc::new(EntityIndexHandler::new(ctx.entities.clone(), index)),
            );
        }
        Harness { store, ctx }
    }
}

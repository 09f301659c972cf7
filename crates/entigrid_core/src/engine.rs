//! The core handle and its builder.

use crate::collection::{
    CollectionContext, EntityCollectionManager, EntityIndexHandler, SearchIndex,
};
use crate::config::Config;
use crate::consistency::{AsyncProcessor, InMemoryTimeoutQueue, TaskKind, TimeoutQueue};
use crate::error::CoreResult;
use crate::graph::{ColumnEdgeSerialization, EdgeManager, CF_EDGES, CF_EDGE_COMMIT_LOG};
use crate::map::MapManager;
use crate::migration::migrate;
use crate::schema::Schema;
use crate::scope::Scope;
use crate::version::{TimeVersionGenerator, VersionGenerator};
use entigrid_storage::{ColumnStore, InMemoryColumnStore, InMemoryLocker, Locker};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Configures and starts a [`Core`].
///
/// Every collaborator defaults to its in-memory implementation, so
/// `Core::builder(Config::default()).init().await` yields a working,
/// non-persistent core.
///
/// # Example
///
/// ```rust,no_run
/// use entigrid_core::{Config, Core, Schema};
///
/// # async fn demo() -> entigrid_core::CoreResult<()> {
/// let core = Core::builder(Config::default())
///     .schema(Schema::new().unique("user", "email"))
///     .init()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct CoreBuilder {
    config: Config,
    store: Option<Arc<dyn ColumnStore>>,
    locker: Option<Arc<dyn Locker>>,
    index: Option<Arc<dyn SearchIndex>>,
    schema: Schema,
    versions: Option<Arc<dyn VersionGenerator>>,
    queue: Option<Arc<dyn TimeoutQueue>>,
}

impl CoreBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            locker: None,
            index: None,
            schema: Schema::new(),
            versions: None,
            queue: None,
        }
    }

    /// The column store holding all data.
    pub fn column_store(mut self, store: Arc<dyn ColumnStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The lock service serializing writers.
    pub fn locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// A search index kept up to date after each commit.
    pub fn search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Unique property declarations.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// The source of entity versions and write timestamps.
    pub fn version_generator(mut self, versions: Arc<dyn VersionGenerator>) -> Self {
        self.versions = Some(versions);
        self
    }

    /// The queue backing post-commit work.
    pub fn timeout_queue(mut self, queue: Arc<dyn TimeoutQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Creates missing column families and starts background work.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the column families cannot be created.
    pub async fn init(self) -> CoreResult<Core> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryColumnStore::new()));
        migrate(store.as_ref()).await?;

        let config = self.config;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryTimeoutQueue::new()));
        let processor = AsyncProcessor::new(queue, &config);
        let versions = self
            .versions
            .unwrap_or_else(|| Arc::new(TimeVersionGenerator::new()));

        let ctx = Arc::new(CollectionContext::new(
            Arc::clone(&store),
            self.locker.unwrap_or_else(|| Arc::new(InMemoryLocker::new())),
            Arc::clone(&versions),
            Arc::new(self.schema),
            self.index.clone(),
            processor.clone(),
            config.clone(),
        ));
        if let Some(index) = self.index {
            processor.register(
                TaskKind::EntityUpdate,
                Arc::new(EntityIndexHandler::new(ctx.entities.clone(), index)),
            );
        }

        let sweeper = processor.spawn_sweeper(config.sweep_interval);
        info!(
            indexed = ctx.index.is_some(),
            page_size = config.scan_page_size,
            "core started"
        );

        Ok(Core {
            commit_log: Arc::new(ColumnEdgeSerialization::new(
                Arc::clone(&store),
                CF_EDGE_COMMIT_LOG,
                config.scan_page_size,
            )),
            edges: Arc::new(ColumnEdgeSerialization::new(
                Arc::clone(&store),
                CF_EDGES,
                config.scan_page_size,
            )),
            store,
            versions,
            processor,
            ctx,
            config,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

/// Handle to a running core.
///
/// Hands out managers bound to a [`Scope`]. Managers are cheap to create and
/// share the handle's collaborators. Dropping the handle stops the
/// background redelivery sweeper.
pub struct Core {
    config: Config,
    store: Arc<dyn ColumnStore>,
    versions: Arc<dyn VersionGenerator>,
    processor: AsyncProcessor,
    ctx: Arc<CollectionContext>,
    commit_log: Arc<ColumnEdgeSerialization>,
    edges: Arc<ColumnEdgeSerialization>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    /// Starts configuring a core.
    pub fn builder(config: Config) -> CoreBuilder {
        CoreBuilder::new(config)
    }

    /// Starts a core with every collaborator in memory.
    ///
    /// # Errors
    ///
    /// See [`CoreBuilder::init`].
    pub async fn open_in_memory() -> CoreResult<Self> {
        Self::builder(Config::default()).init().await
    }

    /// Entity collection of `scope`.
    #[must_use]
    pub fn collection(&self, scope: Scope) -> EntityCollectionManager {
        EntityCollectionManager::new(scope, Arc::clone(&self.ctx))
    }

    /// Key/value map of `scope`.
    #[must_use]
    pub fn map(&self, scope: Scope) -> MapManager {
        MapManager::new(
            scope,
            Arc::clone(&self.store),
            Arc::clone(&self.versions),
            self.config.map_object_size_limit,
            self.config.scan_page_size,
        )
    }

    /// Graph edges of `scope`.
    #[must_use]
    pub fn graph(&self, scope: Scope) -> EdgeManager {
        EdgeManager::new(
            scope,
            Arc::clone(&self.store),
            self.commit_log.clone(),
            self.edges.clone(),
            Arc::clone(&self.versions),
        )
    }

    /// The post-commit work processor.
    #[must_use]
    pub fn processor(&self) -> &AsyncProcessor {
        &self.processor
    }

    /// The configuration the core was started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops background redelivery. Queued work stays queued.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
            info!("core stopped");
        }
    }

    /// Whether background redelivery is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::InMemorySearchIndex;
    use crate::entity::Entity;
    use crate::id::Id;
    use entigrid_codec::Value;
    use std::time::Duration;

    fn scope() -> Scope {
        Scope::new(Id::generate("organization"), Id::generate("application"), "users").unwrap()
    }

    #[tokio::test]
    async fn in_memory_core_runs_until_shutdown() {
        let core = Core::open_in_memory().await.unwrap();
        assert!(core.is_running());
        core.shutdown();
        assert!(!core.is_running());
        core.shutdown();
    }

    #[tokio::test]
    async fn managers_share_one_store() {
        let store = Arc::new(InMemoryColumnStore::new());
        let core = Core::builder(Config::default())
            .column_store(store.clone())
            .init()
            .await
            .unwrap();
        let scope = scope();

        let written = core
            .collection(scope.clone())
            .write(Entity::new("user").property("name", "ann"))
            .await
            .unwrap();
        let again = core.collection(scope.clone()).get(written.id()).await.unwrap();
        assert_eq!(again, written);

        core.map(scope).put("k", "v").await.unwrap();
        assert!(store.live_row_count(crate::map::CF_MAP_ENTRIES) > 0);
    }

    #[tokio::test]
    async fn configured_index_is_fed_after_commit() {
        let index = Arc::new(InMemorySearchIndex::new());
        let core = Core::builder(Config::default())
            .search_index(index.clone())
            .init()
            .await
            .unwrap();
        let users = core.collection(scope());
        let written = users
            .write(Entity::new("user").property("name", "ann"))
            .await
            .unwrap();

        for _ in 0..100 {
            if core.processor().pending().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let hits = index
            .query(users.scope(), "name", &Value::from("ann"))
            .await
            .unwrap();
        assert_eq!(hits, vec![written.id().clone()]);
    }
}

//! Test fixtures and core helpers.

use entigrid_core::{Config, Core, Entity, Id, InMemorySearchIndex, Schema, Scope};
use entigrid_storage::InMemoryColumnStore;
use std::sync::Arc;
use std::time::Duration;

/// A core over in-memory collaborators that stay reachable from the test.
pub struct TestCore {
    /// The core instance.
    pub core: Core,
    /// The column store behind the core.
    pub store: Arc<InMemoryColumnStore>,
    /// The search index fed by the core.
    pub index: Arc<InMemorySearchIndex>,
}

impl TestCore {
    /// Starts a core where `user.email` is unique.
    pub async fn start() -> Self {
        Self::with_schema(Schema::new().unique("user", "email")).await
    }

    /// Starts a core with `schema`.
    pub async fn with_schema(schema: Schema) -> Self {
        Self::with_config(schema, Config::default()).await
    }

    /// Starts a core with `schema` and `config`.
    pub async fn with_config(schema: Schema, config: Config) -> Self {
        let store = Arc::new(InMemoryColumnStore::new());
        let index = Arc::new(InMemorySearchIndex::new());
        let core = Core::builder(config)
            .column_store(store.clone())
            .search_index(index.clone())
            .schema(schema)
            .init()
            .await
            .expect("Failed to start test core");
        Self { core, store, index }
    }

    /// Waits until every queued consistency task has been acknowledged.
    ///
    /// Panics if work is still pending after five seconds.
    pub async fn settle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let pending = self
                .core
                .processor()
                .pending()
                .await
                .expect("Failed to read pending tasks");
            if pending == 0 {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{pending} consistency tasks still pending"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl std::ops::Deref for TestCore {
    type Target = Core;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// A fresh scope named `name` under a new organization and application.
pub fn test_scope(name: &str) -> Scope {
    Scope::new(
        Id::generate("organization"),
        Id::generate("application"),
        name,
    )
    .expect("Failed to build scope")
}

/// A new `user` entity with `email` and a display name.
pub fn user(email: &str) -> Entity {
    let name = email.split('@').next().unwrap_or(email).to_string();
    Entity::new("user")
        .property("email", email)
        .property("name", name)
}

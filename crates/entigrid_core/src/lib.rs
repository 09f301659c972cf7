//! # EntiGrid Core
//!
//! Persistence core of a multi-tenant entity store.
//!
//! This crate provides:
//! - Versioned entity collections with optimistic concurrency control
//! - Unique property enforcement through a reverse value index
//! - At-least-once post-commit work, such as search indexing
//! - Graph edges read through a merged commit log and durable store
//! - Scoped key/value maps
//!
//! All data is partitioned by a [`Scope`]. Storage, locking and search are
//! reached through traits so deployments can swap in real services; each has
//! an in-memory implementation.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use entigrid_core::{Core, Entity, Id, Scope};
//!
//! # async fn demo() -> entigrid_core::CoreResult<()> {
//! let core = Core::open_in_memory().await?;
//! let scope = Scope::new(Id::generate("organization"), Id::generate("application"), "users")?;
//!
//! let users = core.collection(scope);
//! let ann = users.write(Entity::new("user").property("name", "ann")).await?;
//! assert_eq!(users.get(ann.id()).await?, ann);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
mod config;
pub mod consistency;
mod engine;
mod entity;
mod error;
pub mod graph;
mod id;
mod keys;
pub mod map;
pub mod migration;
mod schema;
mod scope;
mod version;

pub use collection::{EntityCollectionManager, InMemorySearchIndex, MvccEntity, SearchIndex};
pub use config::Config;
pub use consistency::AsyncProcessor;
pub use engine::{Core, CoreBuilder};
pub use entity::Entity;
pub use error::{CoreError, CoreResult};
pub use graph::{EdgeManager, MarkedEdge, SearchByEdgeType, SearchByIdType};
pub use id::Id;
pub use map::MapManager;
pub use schema::Schema;
pub use scope::Scope;
pub use version::{system_millis, Clock, TimeVersionGenerator, Version, VersionGenerator};

pub use entigrid_codec::Value;

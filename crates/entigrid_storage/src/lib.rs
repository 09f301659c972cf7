//! # EntiGrid Storage
//!
//! Column store client abstraction and lock service for EntiGrid.
//!
//! This crate is the lowest layer of EntiGrid. A column store is an
//! **opaque, timestamped cell store**: it resolves conflicting writes
//! last-write-wins and never interprets the bytes it holds.
//!
//! ## Design Principles
//!
//! - Every write carries an explicit timestamp chosen by the caller
//! - Deletes are tombstones and take part in timestamp resolution
//! - Batches are the unit of atomicity
//! - Stores and lockers must be `Send + Sync` for concurrent access
//!
//! ## Available Implementations
//!
//! - [`InMemoryColumnStore`] - For testing and single-process deployments
//! - [`InMemoryLocker`] - Process-local [`Locker`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod lock;
mod memory;
mod store;

pub use batch::{Mutation, MutationBatch};
pub use error::{StorageError, StorageResult};
pub use lock::{InMemoryLocker, LockGuard, Locker};
pub use memory::InMemoryColumnStore;
pub use store::{Column, ColumnRange, ColumnStore};

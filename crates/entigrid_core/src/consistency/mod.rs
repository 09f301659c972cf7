//! Asynchronous post-commit consistency work.
//!
//! Writes return as soon as they commit. Work derived from a commit, such as
//! search indexing, runs later on the [`AsyncProcessor`] with at-least-once
//! delivery guarded by a per-message timeout.

mod processor;
mod queue;
mod task;

pub use processor::{AsyncProcessor, TaskHandler};
pub use queue::{InMemoryTimeoutQueue, TimeoutQueue};
pub use task::{AsynchronousMessage, ConsistencyTask, TaskKind};

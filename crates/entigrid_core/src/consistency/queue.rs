//! Storage for in-flight consistency messages.

use super::task::AsynchronousMessage;
use crate::error::CoreResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// Holds messages from enqueue until acknowledgement.
///
/// A message stays in the queue while it is being processed, so a crash or a
/// slow handler leaves it behind for redelivery.
#[async_trait]
pub trait TimeoutQueue: Send + Sync {
    /// Inserts or replaces a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    async fn put(&self, message: AsynchronousMessage) -> CoreResult<()>;

    /// Removes a message. Returns false if it was not queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    async fn remove(&self, id: Uuid) -> CoreResult<bool>;

    /// Messages whose deadline is at or before `now_millis`, oldest deadline first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    async fn expired(&self, now_millis: u64) -> CoreResult<Vec<AsynchronousMessage>>;

    /// Number of queued messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    async fn count(&self) -> CoreResult<usize>;
}

/// Process-local [`TimeoutQueue`].
#[derive(Debug, Default)]
pub struct InMemoryTimeoutQueue {
    messages: Mutex<HashMap<Uuid, AsynchronousMessage>>,
}

impl InMemoryTimeoutQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeoutQueue for InMemoryTimeoutQueue {
    async fn put(&self, message: AsynchronousMessage) -> CoreResult<()> {
        self.messages.lock().insert(message.id(), message);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> CoreResult<bool> {
        Ok(self.messages.lock().remove(&id).is_some())
    }

    async fn expired(&self, now_millis: u64) -> CoreResult<Vec<AsynchronousMessage>> {
        let mut expired: Vec<_> = self
            .messages
            .lock()
            .values()
            .filter(|m| m.is_expired(now_millis))
            .cloned()
            .collect();
        expired.sort_by_key(AsynchronousMessage::deadline_millis);
        Ok(expired)
    }

    async fn count(&self) -> CoreResult<usize> {
        Ok(self.messages.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::ConsistencyTask;
    use crate::id::Id;
    use crate::scope::Scope;
    use std::time::Duration;

    fn message(timeout_ms: u64, now: u64) -> AsynchronousMessage {
        let scope =
            Scope::new(Id::generate("organization"), Id::generate("application"), "users").unwrap();
        AsynchronousMessage::new(
            ConsistencyTask::entity_update(scope, Id::generate("user")),
            Duration::from_millis(timeout_ms),
            now,
        )
    }

    #[tokio::test]
    async fn expired_filters_by_deadline() {
        let queue = InMemoryTimeoutQueue::new();
        let soon = message(10, 0);
        let later = message(1_000, 0);
        queue.put(soon.clone()).await.unwrap();
        queue.put(later).await.unwrap();

        let expired = queue.expired(50).await.unwrap();
        assert_eq!(expired, vec![soon]);
        assert_eq!(queue.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let queue = InMemoryTimeoutQueue::new();
        let m = message(10, 0);
        queue.put(m.clone()).await.unwrap();
        assert!(queue.remove(m.id()).await.unwrap());
        assert!(!queue.remove(m.id()).await.unwrap());
    }
}

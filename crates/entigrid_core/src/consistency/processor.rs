//! Timeout-guarded background task processor.

use super::queue::TimeoutQueue;
use super::task::{AsynchronousMessage, ConsistencyTask, TaskKind};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::version::system_millis;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Receives consistency tasks of one kind.
///
/// Delivery is at-least-once, so handlers must be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Processes one delivery of `task`.
    ///
    /// # Errors
    ///
    /// An error leaves the message queued for redelivery.
    async fn handle(&self, task: &ConsistencyTask) -> CoreResult<()>;
}

struct ProcessorInner {
    queue: Arc<dyn TimeoutQueue>,
    handlers: RwLock<HashMap<TaskKind, Vec<Arc<dyn TaskHandler>>>>,
    permits: Arc<Semaphore>,
    max_attempts: u32,
}

/// At-least-once processor for post-commit work.
///
/// A message is queued by [`enqueue`](Self::enqueue), run by
/// [`start`](Self::start) and removed by [`ack`](Self::ack) once every
/// handler succeeded. A message not acknowledged before its timeout is picked
/// up again by [`redeliver_expired`](Self::redeliver_expired).
#[derive(Clone)]
pub struct AsyncProcessor {
    inner: Arc<ProcessorInner>,
}

impl AsyncProcessor {
    /// Creates a processor over `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn TimeoutQueue>, config: &Config) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                queue,
                handlers: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
                max_attempts: config.max_task_attempts.max(1),
            }),
        }
    }

    /// Adds a handler for `kind`. Handlers run in registration order.
    pub fn register(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        self.inner.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Queues `task`; it must be acknowledged within `timeout` once started.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn enqueue(
        &self,
        task: ConsistencyTask,
        timeout: Duration,
    ) -> CoreResult<AsynchronousMessage> {
        let message = AsynchronousMessage::new(task, timeout, system_millis());
        self.inner.queue.put(message.clone()).await?;
        debug!(message_id = %message.id(), entity_id = %message.task().entity_id, "consistency task queued");
        Ok(message)
    }

    /// Runs `message` in the background.
    pub fn start(&self, message: AsynchronousMessage) -> JoinHandle<CoreResult<()>> {
        let processor = self.clone();
        tokio::spawn(async move { processor.process(message).await })
    }

    /// Runs every handler for `message` and acknowledges it on success.
    ///
    /// # Errors
    ///
    /// Returns the first handler error; the message then stays queued.
    pub async fn process(&self, message: AsynchronousMessage) -> CoreResult<()> {
        let _permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|e| CoreError::task_failed(format!("worker pool closed: {e}")))?;

        let handlers = self
            .inner
            .handlers
            .read()
            .get(&message.task().kind)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(kind = ?message.task().kind, "no handler registered for consistency task");
        }

        for handler in handlers {
            if let Err(e) = handler.handle(message.task()).await {
                warn!(
                    message_id = %message.id(),
                    attempt = message.attempts(),
                    error = %e,
                    "consistency task failed, leaving it for redelivery"
                );
                return Err(e);
            }
        }
        self.ack(message.id()).await?;
        Ok(())
    }

    /// Removes an acknowledged message. Returns false if it was not queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn ack(&self, message_id: Uuid) -> CoreResult<bool> {
        self.inner.queue.remove(message_id).await
    }

    /// Restarts every expired message, dropping those out of attempts.
    ///
    /// Returns how many messages were restarted.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub async fn redeliver_expired(&self) -> CoreResult<usize> {
        let now = system_millis();
        let mut restarted = 0;
        for mut message in self.inner.queue.expired(now).await? {
            if message.attempts() >= self.inner.max_attempts {
                error!(
                    message_id = %message.id(),
                    entity_id = %message.task().entity_id,
                    attempts = message.attempts(),
                    "consistency task exhausted its attempts, dropping it"
                );
                self.inner.queue.remove(message.id()).await?;
                continue;
            }
            message.redeliver(now);
            self.inner.queue.put(message.clone()).await?;
            warn!(
                message_id = %message.id(),
                attempt = message.attempts(),
                "redelivering expired consistency task"
            );
            self.start(message);
            restarted += 1;
        }
        Ok(restarted)
    }

    /// Number of messages not yet acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn pending(&self) -> CoreResult<usize> {
        self.inner.queue.count().await
    }

    /// Spawns a loop calling [`redeliver_expired`](Self::redeliver_expired)
    /// every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let processor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = processor.redeliver_expired().await {
                    warn!(error = %e, "redelivery sweep failed");
                }
            }
        })
    }
}

impl fmt::Debug for AsyncProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncProcessor")
            .field("kinds", &self.inner.handlers.read().len())
            .field("max_attempts", &self.inner.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::InMemoryTimeoutQueue;
    use crate::id::Id;
    use crate::scope::Scope;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` deliveries.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _task: &ConsistencyTask) -> CoreResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CoreError::invalid_operation("not yet"));
            }
            Ok(())
        }
    }

    fn task() -> ConsistencyTask {
        let scope =
            Scope::new(Id::generate("organization"), Id::generate("application"), "users").unwrap();
        ConsistencyTask::entity_update(scope, Id::generate("user"))
    }

    fn processor(max_attempts: u32, failures: u32) -> (AsyncProcessor, Arc<Flaky>) {
        let config = Config::default().max_task_attempts(max_attempts);
        let processor = AsyncProcessor::new(Arc::new(InMemoryTimeoutQueue::new()), &config);
        let handler = Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        });
        processor.register(TaskKind::EntityUpdate, handler.clone());
        (processor, handler)
    }

    #[tokio::test]
    async fn successful_task_is_acknowledged() {
        let (processor, handler) = processor(3, 0);
        let message = processor.enqueue(task(), Duration::from_secs(20)).await.unwrap();
        assert_eq!(processor.pending().await.unwrap(), 1);

        processor.start(message).await.unwrap().unwrap();
        assert_eq!(processor.pending().await.unwrap(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_task_is_redelivered_after_timeout() {
        let (processor, handler) = processor(5, 1);
        let message = processor.enqueue(task(), Duration::from_millis(20)).await.unwrap();
        assert!(processor.process(message).await.is_err());
        assert_eq!(processor.pending().await.unwrap(), 1);

        // Not expired yet.
        assert_eq!(processor.redeliver_expired().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(processor.redeliver_expired().await.unwrap(), 1);

        for _ in 0..50 {
            if processor.pending().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(processor.pending().await.unwrap(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_task_is_dropped() {
        let (processor, handler) = processor(2, u32::MAX);
        let message = processor.enqueue(task(), Duration::from_millis(10)).await.unwrap();
        assert!(processor.process(message).await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(processor.redeliver_expired().await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second delivery used the last attempt.
        assert_eq!(processor.redeliver_expired().await.unwrap(), 0);
        assert_eq!(processor.pending().await.unwrap(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sweeper_redelivers_in_background() {
        let (processor, handler) = processor(5, 1);
        let message = processor.enqueue(task(), Duration::from_millis(10)).await.unwrap();
        assert!(processor.process(message).await.is_err());

        let sweeper = processor.spawn_sweeper(Duration::from_millis(5));
        for _ in 0..100 {
            if processor.pending().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sweeper.abort();
        assert_eq!(processor.pending().await.unwrap(), 0);
        assert!(handler.calls.load(Ordering::SeqCst) >= 2);
    }
}

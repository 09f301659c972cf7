//! Consistency task payloads.

use crate::id::Id;
use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Discriminates which handlers receive a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// An entity version was committed and derived state must catch up.
    EntityUpdate,
}

/// Work item for the consistency processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyTask {
    /// Handler selector.
    pub kind: TaskKind,
    /// Scope of the entity.
    pub scope: Scope,
    /// The entity.
    pub entity_id: Id,
}

impl ConsistencyTask {
    /// A post-commit task for `entity_id`.
    #[must_use]
    pub fn entity_update(scope: Scope, entity_id: Id) -> Self {
        Self {
            kind: TaskKind::EntityUpdate,
            scope,
            entity_id,
        }
    }
}

/// A queued task together with its delivery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsynchronousMessage {
    id: Uuid,
    task: ConsistencyTask,
    timeout: Duration,
    deadline_millis: u64,
    attempts: u32,
}

impl AsynchronousMessage {
    pub(crate) fn new(task: ConsistencyTask, timeout: Duration, now_millis: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            timeout,
            deadline_millis: now_millis.saturating_add(millis(timeout)),
            attempts: 1,
        }
    }

    /// Message id used for acknowledgement.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The task.
    #[must_use]
    pub fn task(&self) -> &ConsistencyTask {
        &self.task
    }

    /// Time allowed per delivery.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Unix millis after which the message may be redelivered.
    #[must_use]
    pub fn deadline_millis(&self) -> u64 {
        self.deadline_millis
    }

    /// Deliveries so far, including the current one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.deadline_millis
    }

    pub(crate) fn redeliver(&mut self, now_millis: u64) {
        self.attempts += 1;
        self.deadline_millis = now_millis.saturating_add(millis(self.timeout));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

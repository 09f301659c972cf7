//! The staged MVCC write pipeline.
//!
//! A write moves through [`WriteStage::Start`], [`WriteStage::Verify`] and
//! [`WriteStage::Commit`]. A delete uses the shorter
//! [`WriteStage::MarkStart`] and [`WriteStage::MarkCommit`]. Any stage error
//! rolls the attempt back before the error is returned.

use super::mvcc::{LogEntry, MvccEntity, Stage};
use super::unique::UniqueValueIndex;
use super::CollectionContext;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::keys::{self, entity_row};
use crate::scope::Scope;
use crate::version::Version;
use entigrid_codec::Value;
use entigrid_storage::{LockGuard, MutationBatch};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Position of a write attempt in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Assign a version and log the attempt.
    Start,
    /// Check uniqueness and optimistic concurrency in parallel.
    Verify,
    /// Write the payload and unique entries, then commit the log entry.
    Commit,
    /// Log a delete attempt.
    MarkStart,
    /// Write the delete marker and release unique values.
    MarkCommit,
    /// Finished.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Write,
    Update,
    Delete,
}

struct WriteState {
    stage: WriteStage,
    kind: WriteKind,
    scope: Scope,
    candidate: Entity,
    /// Head version the attempt builds on.
    base: Option<Version>,
    /// Version assigned by the start stage.
    version: Option<Version>,
    previous: Option<Entity>,
    guards: Vec<LockGuard>,
}

impl WriteState {
    fn new(kind: WriteKind, scope: &Scope, candidate: Entity) -> Self {
        let stage = match kind {
            WriteKind::Write | WriteKind::Update => WriteStage::Start,
            WriteKind::Delete => WriteStage::MarkStart,
        };
        Self {
            stage,
            kind,
            scope: scope.clone(),
            base: candidate.version(),
            candidate,
            version: None,
            previous: None,
            guards: Vec::new(),
        }
    }

    fn assigned_version(&self) -> CoreResult<Version> {
        self.version.ok_or_else(|| {
            CoreError::invalid_operation(format!("{:?} stage reached without a version", self.stage))
        })
    }

    fn unique_value<'a>(entity: Option<&'a Entity>, property: &str) -> Option<&'a Value> {
        entity.and_then(|e| e.get(property)).filter(|v| !v.is_null())
    }
}

/// Drives write attempts through their stages.
#[derive(Clone)]
pub(crate) struct WritePipeline {
    ctx: Arc<CollectionContext>,
}

impl WritePipeline {
    pub(crate) fn new(ctx: Arc<CollectionContext>) -> Self {
        Self { ctx }
    }

    pub(crate) async fn write(&self, scope: &Scope, entity: Entity) -> CoreResult<Entity> {
        let state = self.run(WriteState::new(WriteKind::Write, scope, entity)).await?;
        Ok(state.candidate)
    }

    pub(crate) async fn update(&self, scope: &Scope, entity: Entity) -> CoreResult<Entity> {
        let state = self.run(WriteState::new(WriteKind::Update, scope, entity)).await?;
        Ok(state.candidate)
    }

    /// Returns the version of the delete marker.
    pub(crate) async fn delete(&self, scope: &Scope, id: &Id) -> CoreResult<Version> {
        let candidate = Entity::with_id(id.clone());
        let state = self.run(WriteState::new(WriteKind::Delete, scope, candidate)).await?;
        state.assigned_version()
    }

    async fn run(&self, mut state: WriteState) -> CoreResult<WriteState> {
        loop {
            let stage = state.stage;
            let result = match stage {
                WriteStage::Start => self.start(&mut state).await,
                WriteStage::Verify => self.verify(&mut state).await,
                WriteStage::Commit => self.commit(&mut state).await,
                WriteStage::MarkStart => self.mark_start(&mut state).await,
                WriteStage::MarkCommit => self.mark_commit(&mut state).await,
                WriteStage::Done => {
                    // Releases entity and uniqueness locks.
                    state.guards.clear();
                    return Ok(state);
                }
            };
            if let Err(e) = result {
                debug!(entity_id = %state.candidate.id(), ?stage, error = %e, "write failed, rolling back");
                self.rollback(&mut state).await;
                return Err(e);
            }
        }
    }

    async fn begin(&self, state: &mut WriteState) -> CoreResult<()> {
        let id = state.candidate.id().clone();
        let head = self.ctx.entities.load_head(&state.scope, &id).await?;
        let head_version = head.as_ref().map(MvccEntity::version);
        let previous = head.and_then(MvccEntity::into_live);

        if state.kind == WriteKind::Update && previous.is_none() {
            return Err(CoreError::entity_not_found(&id));
        }
        if state.base.is_none() {
            state.base = head_version;
        }

        let version = self.ctx.versions.next_version();
        state.version = Some(version);
        state.previous = previous;

        let mut batch = MutationBatch::new();
        self.ctx
            .entities
            .write_log(&mut batch, &state.scope, &LogEntry::new(id, version, Stage::Started))?;
        self.ctx.store.mutate(batch).await?;
        Ok(())
    }

    async fn start(&self, state: &mut WriteState) -> CoreResult<()> {
        self.begin(state).await?;
        let version = state.assigned_version()?;
        let created = state.previous.as_ref().and_then(Entity::created);
        state.candidate.stamp(version, created);
        debug!(entity_id = %state.candidate.id(), %version, "write started");
        state.stage = WriteStage::Verify;
        Ok(())
    }

    async fn verify(&self, state: &mut WriteState) -> CoreResult<()> {
        let version = state.assigned_version()?;
        let partial = MvccEntity::partial(state.candidate.clone(), version);

        // Locks are taken in one sorted pass before the checks fan out, so
        // concurrent writers never wait on each other in a cycle.
        let mut keys = vec![entity_lock_key(&state.scope, partial.id())];
        keys.extend(self.unique_lock_keys(&state.scope, Some(&state.candidate))?);
        self.acquire(state, keys).await?;

        let unique = tokio::spawn(verify_unique(
            Arc::clone(&self.ctx),
            state.scope.clone(),
            partial.clone(),
        ));
        let optimistic = tokio::spawn(verify_optimistic(
            Arc::clone(&self.ctx),
            state.scope.clone(),
            partial,
            state.base,
        ));
        tokio::try_join!(joined(unique), joined(optimistic))?;

        state.stage = WriteStage::Commit;
        Ok(())
    }

    async fn commit(&self, state: &mut WriteState) -> CoreResult<()> {
        let version = state.assigned_version()?;
        let timestamp = version.timestamp();
        let id = state.candidate.id().clone();
        let complete = MvccEntity::complete(state.candidate.clone(), version);

        let mut batch = MutationBatch::new();
        self.ctx.entities.write_version(&mut batch, &state.scope, &complete)?;
        for property in self.ctx.schema.unique_properties(id.entity_type()) {
            self.ctx.unique.reassign(
                &mut batch,
                &state.scope,
                &id,
                property,
                WriteState::unique_value(state.previous.as_ref(), property),
                WriteState::unique_value(Some(&state.candidate), property),
                timestamp,
            )?;
        }
        self.ctx.store.mutate(batch).await?;

        self.commit_log(&state.scope, id, version).await?;
        debug!(entity_id = %state.candidate.id(), %version, "write committed");
        state.stage = WriteStage::Done;
        Ok(())
    }

    /// Holds the entity lock across the head read so an in-flight write
    /// commits before the delete decides which unique values to release.
    async fn mark_start(&self, state: &mut WriteState) -> CoreResult<()> {
        let entity_key = entity_lock_key(&state.scope, state.candidate.id());
        self.acquire(state, vec![entity_key]).await?;
        self.begin(state).await?;
        // "e/" sorts before "u/", so this keeps the global lock order.
        let keys = self.unique_lock_keys(&state.scope, state.previous.as_ref())?;
        self.acquire(state, keys).await?;
        state.stage = WriteStage::MarkCommit;
        Ok(())
    }

    async fn mark_commit(&self, state: &mut WriteState) -> CoreResult<()> {
        let version = state.assigned_version()?;
        let id = state.candidate.id().clone();

        let mut batch = MutationBatch::new();
        self.ctx.entities.write_version(
            &mut batch,
            &state.scope,
            &MvccEntity::deleted(id.clone(), version),
        )?;
        for property in self.ctx.schema.unique_properties(id.entity_type()) {
            self.ctx.unique.reassign(
                &mut batch,
                &state.scope,
                &id,
                property,
                WriteState::unique_value(state.previous.as_ref(), property),
                None,
                version.timestamp(),
            )?;
        }
        self.ctx.store.mutate(batch).await?;

        self.commit_log(&state.scope, id, version).await?;
        debug!(entity_id = %state.candidate.id(), %version, "delete committed");
        state.stage = WriteStage::Done;
        Ok(())
    }

    fn unique_lock_keys(&self, scope: &Scope, entity: Option<&Entity>) -> CoreResult<Vec<String>> {
        let Some(entity) = entity else {
            return Ok(Vec::new());
        };
        let entity_type = entity.id().entity_type();
        self.ctx
            .schema
            .unique_properties(entity_type)
            .filter_map(|property| {
                WriteState::unique_value(Some(entity), property).map(|value| (property, value))
            })
            .map(|(property, value)| UniqueValueIndex::lock_key(scope, entity_type, property, value))
            .collect()
    }

    /// Acquires `keys` in sorted order. Guards stay in `state` until the
    /// attempt finishes or rolls back.
    async fn acquire(&self, state: &mut WriteState, mut keys: Vec<String>) -> CoreResult<()> {
        keys.sort();
        keys.dedup();
        for key in &keys {
            let guard = self
                .ctx
                .locker
                .acquire(key, self.ctx.config.unique_lock_timeout)
                .await?;
            state.guards.push(guard);
        }
        Ok(())
    }

    async fn commit_log(&self, scope: &Scope, id: Id, version: Version) -> CoreResult<()> {
        let mut batch = MutationBatch::new();
        self.ctx
            .entities
            .write_log(&mut batch, scope, &LogEntry::new(id, version, Stage::Committed))?;
        self.ctx.store.mutate(batch).await?;
        Ok(())
    }

    /// Undoes whatever the failed attempt may have written.
    ///
    /// Failures here are logged and do not replace the error that caused the
    /// rollback.
    async fn rollback(&self, state: &mut WriteState) {
        let Some(version) = state.version else {
            state.guards.clear();
            return;
        };
        let id = state.candidate.id().clone();
        let timestamp = version.timestamp();

        let result = async {
            let mut batch = MutationBatch::new();
            self.ctx.entities.write_log(
                &mut batch,
                &state.scope,
                &LogEntry::new(id.clone(), version, Stage::RolledBack),
            )?;

            if matches!(state.stage, WriteStage::Commit | WriteStage::MarkCommit) {
                self.ctx
                    .entities
                    .remove_version(&mut batch, &state.scope, &id, version);
                let candidate = (state.kind != WriteKind::Delete).then_some(&state.candidate);
                for property in self.ctx.schema.unique_properties(id.entity_type()) {
                    let old = WriteState::unique_value(state.previous.as_ref(), property);
                    let new = WriteState::unique_value(candidate, property);
                    if old == new {
                        continue;
                    }
                    if let Some(new) = new {
                        self.ctx
                            .unique
                            .release(&mut batch, &state.scope, &id, property, new, timestamp)?;
                    }
                    if let Some(old) = old {
                        self.ctx
                            .unique
                            .claim(&mut batch, &state.scope, &id, property, old, timestamp)?;
                    }
                }
            }
            self.ctx.store.mutate(batch).await?;
            CoreResult::Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(entity_id = %id, %version, error = %e, "rollback failed");
        }
        state.guards.clear();
    }
}

fn entity_lock_key(scope: &Scope, id: &Id) -> String {
    keys::lock_key("e/", &entity_row(scope, id))
}

async fn joined<T>(handle: JoinHandle<CoreResult<T>>) -> CoreResult<T> {
    handle
        .await
        .map_err(|e| CoreError::task_failed(format!("verification task: {e}")))?
}

/// Fails if a unique value of the candidate belongs to another entity.
async fn verify_unique(
    ctx: Arc<CollectionContext>,
    scope: Scope,
    partial: MvccEntity,
) -> CoreResult<()> {
    let Some(entity) = partial.entity() else {
        return Ok(());
    };
    let id = partial.id();
    let checks = ctx
        .schema
        .unique_properties(id.entity_type())
        .filter_map(|property| {
            WriteState::unique_value(Some(entity), property).map(|value| (property, value))
        })
        .map(|(property, value)| ctx.unique.verify(&scope, id, property, value));
    futures::future::try_join_all(checks).await?;
    Ok(())
}

/// Fails if the head moved past `base` or an older writer is still in flight.
///
/// Entries newer than this attempt are ignored unless committed: a younger
/// in-flight writer yields to this one when it verifies.
async fn verify_optimistic(
    ctx: Arc<CollectionContext>,
    scope: Scope,
    partial: MvccEntity,
    base: Option<Version>,
) -> CoreResult<()> {
    let id = partial.id();
    let own = partial.version();
    let stale_millis = u64::try_from(ctx.config.stale_write_timeout.as_millis()).unwrap_or(u64::MAX);
    let page_size = ctx.entities.page_size();

    let mut upper = None;
    loop {
        let entries = ctx.entities.log_page(&scope, id, upper).await?;
        for entry in &entries {
            if Some(entry.version) <= base {
                return Ok(());
            }
            match entry.stage {
                Stage::Committed if entry.version != own => {
                    return Err(CoreError::optimistic_conflict(
                        id,
                        format!(
                            "version {} committed after base {}",
                            entry.version,
                            base.map_or_else(|| "none".to_string(), |b| b.to_string())
                        ),
                    ));
                }
                Stage::Started if entry.version < own => {
                    let abandoned = own.millis().saturating_sub(entry.version.millis()) > stale_millis;
                    if !abandoned {
                        return Err(CoreError::optimistic_conflict(
                            id,
                            format!("write {} is still in flight", entry.version),
                        ));
                    }
                }
                _ => {}
            }
        }
        if entries.len() < page_size {
            break;
        }
        upper = entries.last().map(|e| e.version);
    }

    match base {
        Some(base) => Err(CoreError::optimistic_conflict(
            id,
            format!("base version {base} was never committed"),
        )),
        None => Ok(()),
    }
}

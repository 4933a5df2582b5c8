/// Task context store
///
/// Optimistic concurrency over a per-task document. A patch names the version
/// it was computed against; the store applies it only if that is still the
/// current version, journals it, and snapshots every `snapshot_interval`
/// versions. Each operation is one transaction.

use crate::context::diff::ContextDiff;
use crate::context::types::{
    PatchPage, SnapshotTrigger, TaskContextPatch, TaskContextSnapshot, TaskContextState,
};
use crate::error::StoreError;
use crate::storage::{self, Repositories, UnitOfWork};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_SNAPSHOT_INTERVAL: i64 = 20;
pub const DEFAULT_PATCH_LIMIT: i64 = 100;
pub const MAX_PATCH_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct TaskContextStore {
    uow: Arc<dyn UnitOfWork>,
    snapshot_interval: i64,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl TaskContextStore {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self {
            uow,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            retry_attempts: 8,
            retry_backoff: Duration::from_millis(10),
        }
    }

    /// Snapshot cadence in versions; 0 disables periodic snapshots
    pub fn with_snapshot_interval(mut self, interval: i64) -> Self {
        self.snapshot_interval = interval.max(0);
        self
    }

    /// Attempts and base backoff used by `apply_with_retry`
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// Create version 1 with empty data
    pub async fn initialize_state(&self, task_id: Uuid) -> Result<TaskContextState, StoreError> {
        self.initialize_state_with(task_id, Map::new()).await
    }

    /// Create version 1 with `data`; the task must exist and be visible
    pub async fn initialize_state_with(
        &self,
        task_id: Uuid,
        data: Map<String, Value>,
    ) -> Result<TaskContextState, StoreError> {
        storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move {
                repos.get_task(task_id).await?;
                let state = TaskContextState::initial(task_id, data);
                repos.insert_context_state(&state).await?;
                Ok::<_, StoreError>(state)
            })
        })
        .await
    }

    pub async fn get_state(&self, task_id: Uuid) -> Result<TaskContextState, StoreError> {
        storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move { repos.get_context_state(task_id).await })
        })
        .await
    }

    /// Apply `patch` against its `before_version`
    ///
    /// Returns the journaled patch (with `after_version` and `created_at`
    /// filled in). Fails with `VersionConflict` when the document has moved on;
    /// the caller re-reads and re-diffs.
    pub async fn apply_patch(&self, patch: TaskContextPatch) -> Result<TaskContextPatch, StoreError> {
        let interval = self.snapshot_interval;
        storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move {
                let mut patch = patch;
                apply_in(repos, &mut patch, interval).await?;
                Ok::<_, StoreError>(patch)
            })
        })
        .await
    }

    /// Read the current version and apply `diff` against it, retrying on conflict
    pub async fn apply_with_retry(
        &self,
        task_id: Uuid,
        writer_node_key: &str,
        diff: ContextDiff,
    ) -> Result<TaskContextPatch, StoreError> {
        for attempt in 0..self.retry_attempts {
            let interval = self.snapshot_interval;
            let writer = writer_node_key.to_string();
            let diff = diff.clone();
            let result = storage::run(self.uow.as_ref(), move |repos| {
                Box::pin(async move {
                    // Lock before reading so the read and the write see the same version
                    repos.lock_context_state(task_id).await?;
                    let current = repos.get_context_state(task_id).await?;
                    let mut patch = TaskContextPatch::new(task_id, writer, current.version, diff);
                    apply_in(repos, &mut patch, interval).await?;
                    Ok::<_, StoreError>(patch)
                })
            })
            .await;

            match result {
                Err(StoreError::VersionConflict) => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        "🔁 Context version conflict for task {} (writer '{}', attempt {}), retrying in {:?}",
                        task_id, writer_node_key, attempt + 1, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
        Err(StoreError::VersionConflict)
    }

    /// Patches newest first; `limit` defaults to 100 and is capped at 1000
    pub async fn list_patches(&self, task_id: Uuid, limit: i64, offset: i64) -> Result<PatchPage, StoreError> {
        let limit = match limit {
            l if l <= 0 => DEFAULT_PATCH_LIMIT,
            l => l.min(MAX_PATCH_LIMIT),
        };
        let offset = offset.max(0);
        let (patches, total) = storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move { repos.list_context_patches(task_id, limit, offset).await })
        })
        .await?;
        Ok(PatchPage { patches, total })
    }

    /// Copy the current document into a manual snapshot
    pub async fn create_snapshot(&self, task_id: Uuid) -> Result<TaskContextSnapshot, StoreError> {
        storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move {
                let state = repos.get_context_state(task_id).await?;
                let snapshot = TaskContextSnapshot::of(&state, SnapshotTrigger::Manual);
                repos.insert_context_snapshot(&snapshot).await?;
                Ok::<_, StoreError>(snapshot)
            })
        })
        .await
    }

    pub async fn list_snapshots(&self, task_id: Uuid) -> Result<Vec<TaskContextSnapshot>, StoreError> {
        storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move { repos.list_context_snapshots(task_id).await })
        })
        .await
    }
}

async fn apply_in(
    repos: &mut dyn Repositories,
    patch: &mut TaskContextPatch,
    snapshot_interval: i64,
) -> Result<TaskContextState, StoreError> {
    repos.lock_context_state(patch.task_id).await?;
    let mut state = repos.get_context_state(patch.task_id).await?;
    if state.version != patch.before_version {
        return Err(StoreError::VersionConflict);
    }

    patch.diff.apply(&mut state.data);
    patch.after_version = patch.before_version + 1;
    patch.created_at = Utc::now();
    repos.insert_context_patch(patch).await?;

    state.version = patch.after_version;
    state.updated_at = patch.created_at;
    if !repos.update_context_state(&state, patch.before_version).await? {
        return Err(StoreError::VersionConflict);
    }

    if snapshot_interval > 0 && state.version % snapshot_interval == 0 {
        let snapshot = TaskContextSnapshot::of(&state, SnapshotTrigger::Periodic);
        repos.insert_context_snapshot(&snapshot).await?;
        tracing::debug!("📸 Periodic context snapshot for task {} at version {}", state.task_id, state.version);
    }

    Ok(state)
}

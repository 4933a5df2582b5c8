/// Persistence Layer
///
/// The engine and the context store never touch the database directly. They
/// open a unit of work, call repository primitives on the transaction it
/// yields, and commit. Dropping an uncommitted unit rolls it back.

use crate::context::{TaskContextPatch, TaskContextSnapshot, TaskContextState};
use crate::error::StoreError;
use crate::operator::Operator;
use crate::workflow::{Artifact, Task};
use async_trait::async_trait;
use futures::future::BoxFuture;
use uuid::Uuid;

// SQLite implementation with tenant scoping
pub mod sqlite;

pub use sqlite::{Scope, SqliteUnitOfWork};

/// Opens transactions
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Repositories>, StoreError>;
}

/// Repository primitives bound to one open transaction
///
/// Every task-bound call is filtered by the unit's tenant scope; rows outside
/// it behave as missing.
#[async_trait]
pub trait Repositories: Send {
    // Tasks
    async fn insert_task(&mut self, task: &Task) -> Result<(), StoreError>;
    async fn get_task(&mut self, id: Uuid) -> Result<Task, StoreError>;
    async fn update_task(&mut self, task: &Task) -> Result<(), StoreError>;

    // Operators
    async fn upsert_operator(&mut self, operator: &Operator) -> Result<(), StoreError>;
    async fn get_operator(&mut self, id: Uuid) -> Result<Operator, StoreError>;

    // Artifacts
    async fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError>;
    async fn list_artifacts(&mut self, task_id: Uuid) -> Result<Vec<Artifact>, StoreError>;

    // Task context
    async fn insert_context_state(&mut self, state: &TaskContextState) -> Result<(), StoreError>;
    /// Take the write lock on a task's context row before reading it
    async fn lock_context_state(&mut self, task_id: Uuid) -> Result<(), StoreError>;
    async fn get_context_state(&mut self, task_id: Uuid) -> Result<TaskContextState, StoreError>;
    /// Conditional write; returns false when `expected_version` no longer matches
    async fn update_context_state(
        &mut self,
        state: &TaskContextState,
        expected_version: i64,
    ) -> Result<bool, StoreError>;
    async fn insert_context_patch(&mut self, patch: &TaskContextPatch) -> Result<(), StoreError>;
    async fn list_context_patches(
        &mut self,
        task_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TaskContextPatch>, i64), StoreError>;
    async fn insert_context_snapshot(&mut self, snapshot: &TaskContextSnapshot) -> Result<(), StoreError>;
    async fn list_context_snapshots(&mut self, task_id: Uuid) -> Result<Vec<TaskContextSnapshot>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Run `f` inside one transaction, committing only when it succeeds
///
/// ```ignore
/// let task = storage::run(uow, move |repos| Box::pin(async move {
///     repos.get_task(task_id).await
/// })).await?;
/// ```
pub async fn run<T, E, F>(uow: &dyn UnitOfWork, f: F) -> Result<T, E>
where
    F: for<'r> FnOnce(&'r mut dyn Repositories) -> BoxFuture<'r, Result<T, E>> + Send,
    E: From<StoreError>,
    T: Send,
{
    let mut repos = uow.begin().await?;
    let value = f(repos.as_mut()).await?;
    repos.commit().await?;
    Ok(value)
}

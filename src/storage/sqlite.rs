/// SQLite unit of work
///
/// Each `begin()` opens a sqlx transaction and hands it out behind the
/// `Repositories` trait. Documents (tasks, operators, artifacts, context data)
/// are stored as JSON text next to the indexed columns used for lookups.

use super::{Repositories, UnitOfWork};
use crate::context::{SnapshotTrigger, TaskContextPatch, TaskContextSnapshot, TaskContextState};
use crate::error::StoreError;
use crate::operator::Operator;
use crate::workflow::{Artifact, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Tenant visibility applied beneath every task-bound query
///
/// `tenant_id: None` sees everything (system scope).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scope {
    pub tenant_id: Option<Uuid>,
}

impl Scope {
    pub fn system() -> Self {
        Self { tenant_id: None }
    }

    pub fn tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
        }
    }
}

/// Filters a `tasks` row alias `t`; binds the tenant twice
const TASK_VISIBLE: &str = "(? IS NULL OR t.tenant_id = ?)";

#[derive(Debug, Clone)]
pub struct SqliteUnitOfWork {
    pool: SqlitePool,
    scope: Scope,
}

impl SqliteUnitOfWork {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            scope: Scope::system(),
        }
    }

    /// Connect to `url`, creating the database file if needed
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        // Every connection to an in-memory database is a separate database
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;
        let uow = Self::new(pool);
        uow.init_schema().await?;
        Ok(uow)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Same pool, different tenant visibility
    pub fn scoped(&self, scope: Scope) -> Self {
        Self {
            pool: self.pool.clone(),
            scope,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id BLOB PRIMARY KEY,
                tenant_id BLOB,
                workflow_id BLOB NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_tasks_tenant ON tasks(tenant_id)",
            r#"
            CREATE TABLE IF NOT EXISTS operators (
                id BLOB PRIMARY KEY,
                tenant_id BLOB,
                code TEXT NOT NULL,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id BLOB PRIMARY KEY,
                task_id BLOB NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_artifacts_task ON artifacts(task_id)",
            r#"
            CREATE TABLE IF NOT EXISTS task_context_states (
                task_id BLOB PRIMARY KEY,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS task_context_patches (
                id BLOB PRIMARY KEY,
                task_id BLOB NOT NULL,
                writer_node_key TEXT NOT NULL,
                before_version INTEGER NOT NULL,
                after_version INTEGER NOT NULL,
                diff TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (task_id, after_version)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_context_patches_task ON task_context_patches(task_id, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS task_context_snapshots (
                id BLOB PRIMARY KEY,
                task_id BLOB NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                trigger TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_context_snapshots_task ON task_context_snapshots(task_id, version)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::debug!("🗄️ SQLite schema ready");
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn begin(&self) -> Result<Box<dyn Repositories>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteRepositories {
            tx,
            scope: self.scope,
        }))
    }
}

/// Repositories over one open transaction
pub struct SqliteRepositories {
    tx: Transaction<'static, Sqlite>,
    scope: Scope,
}

fn decode_json<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn decode_trigger(raw: &str) -> Result<SnapshotTrigger, StoreError> {
    match raw {
        "periodic" => Ok(SnapshotTrigger::Periodic),
        "manual" => Ok(SnapshotTrigger::Manual),
        other => Err(StoreError::Decode(format!("unknown snapshot trigger: {}", other))),
    }
}

fn decode_patch(row: &SqliteRow) -> Result<TaskContextPatch, StoreError> {
    Ok(TaskContextPatch {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        writer_node_key: row.try_get("writer_node_key")?,
        before_version: row.try_get("before_version")?,
        after_version: row.try_get("after_version")?,
        diff: decode_json(row, "diff")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl Repositories for SqliteRepositories {
    async fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, tenant_id, workflow_id, status, progress, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(task.workflow_id)
        .bind(task.status.as_str())
        .bind(i64::from(task.progress))
        .bind(serde_json::to_string(task)?)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_task(&mut self, id: Uuid) -> Result<Task, StoreError> {
        let sql = format!("SELECT t.data FROM tasks t WHERE t.id = ? AND {}", TASK_VISIBLE);
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("task", id))?;
        decode_json(&row, "data")
    }

    async fn update_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let sql = "UPDATE tasks SET status = ?, progress = ?, data = ?, updated_at = ? \
                   WHERE id = ? AND (? IS NULL OR tenant_id = ?)";
        let mut stored = task.clone();
        stored.updated_at = Utc::now();
        let result = sqlx::query(sql)
            .bind(stored.status.as_str())
            .bind(i64::from(stored.progress))
            .bind(serde_json::to_string(&stored)?)
            .bind(stored.updated_at)
            .bind(stored.id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("task", task.id));
        }
        Ok(())
    }

    async fn upsert_operator(&mut self, operator: &Operator) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO operators (id, tenant_id, code, definition, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                code = excluded.code,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(operator.id)
        .bind(operator.tenant_id)
        .bind(&operator.code)
        .bind(serde_json::to_string(operator)?)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_operator(&mut self, id: Uuid) -> Result<Operator, StoreError> {
        // Operators without a tenant are shared by everyone
        let row = sqlx::query(
            "SELECT definition FROM operators WHERE id = ? AND (? IS NULL OR tenant_id IS NULL OR tenant_id = ?)",
        )
        .bind(id)
        .bind(self.scope.tenant_id)
        .bind(self.scope.tenant_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("operator", id))?;
        decode_json(&row, "definition")
    }

    async fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO artifacts (id, task_id, kind, data, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(artifact.id)
            .bind(artifact.task_id)
            .bind(artifact.kind.as_str())
            .bind(serde_json::to_string(artifact)?)
            .bind(artifact.created_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_artifacts(&mut self, task_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        let sql = format!(
            r#"
            SELECT a.data FROM artifacts a
            JOIN tasks t ON t.id = a.task_id
            WHERE a.task_id = ? AND {}
            ORDER BY a.created_at ASC
            "#,
            TASK_VISIBLE
        );
        let rows = sqlx::query(&sql)
            .bind(task_id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(|row| decode_json(row, "data")).collect()
    }

    async fn insert_context_state(&mut self, state: &TaskContextState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_context_states (task_id, version, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.task_id)
        .bind(state.version)
        .bind(serde_json::to_string(&state.data)?)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_context_state(&mut self, task_id: Uuid) -> Result<(), StoreError> {
        // A no-op write takes SQLite's write lock, serializing patchers
        sqlx::query("UPDATE task_context_states SET version = version WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_context_state(&mut self, task_id: Uuid) -> Result<TaskContextState, StoreError> {
        let sql = format!(
            r#"
            SELECT s.task_id, s.version, s.data, s.created_at, s.updated_at
            FROM task_context_states s
            JOIN tasks t ON t.id = s.task_id
            WHERE s.task_id = ? AND {}
            "#,
            TASK_VISIBLE
        );
        let row = sqlx::query(&sql)
            .bind(task_id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("task context", task_id))?;

        Ok(TaskContextState {
            task_id: row.try_get("task_id")?,
            version: row.try_get("version")?,
            data: decode_json(&row, "data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn update_context_state(
        &mut self,
        state: &TaskContextState,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE task_context_states
            SET version = ?, data = ?, updated_at = ?
            WHERE task_id = ? AND version = ?
            "#,
        )
        .bind(state.version)
        .bind(serde_json::to_string(&state.data)?)
        .bind(state.updated_at)
        .bind(state.task_id)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_context_patch(&mut self, patch: &TaskContextPatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_context_patches
                (id, task_id, writer_node_key, before_version, after_version, diff, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(patch.id)
        .bind(patch.task_id)
        .bind(&patch.writer_node_key)
        .bind(patch.before_version)
        .bind(patch.after_version)
        .bind(serde_json::to_string(&patch.diff)?)
        .bind(patch.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_context_patches(
        &mut self,
        task_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<TaskContextPatch>, i64), StoreError> {
        let count_sql = format!(
            r#"
            SELECT COUNT(*) AS total FROM task_context_patches p
            JOIN tasks t ON t.id = p.task_id
            WHERE p.task_id = ? AND {}
            "#,
            TASK_VISIBLE
        );
        let total: i64 = sqlx::query(&count_sql)
            .bind(task_id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .fetch_one(&mut *self.tx)
            .await?
            .try_get("total")?;

        let page_sql = format!(
            r#"
            SELECT p.id, p.task_id, p.writer_node_key, p.before_version, p.after_version, p.diff, p.created_at
            FROM task_context_patches p
            JOIN tasks t ON t.id = p.task_id
            WHERE p.task_id = ? AND {}
            ORDER BY p.after_version DESC
            LIMIT ? OFFSET ?
            "#,
            TASK_VISIBLE
        );
        let rows = sqlx::query(&page_sql)
            .bind(task_id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *self.tx)
            .await?;

        let patches = rows.iter().map(decode_patch).collect::<Result<Vec<_>, _>>()?;
        Ok((patches, total))
    }

    async fn insert_context_snapshot(&mut self, snapshot: &TaskContextSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_context_snapshots (id, task_id, version, data, trigger, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.task_id)
        .bind(snapshot.version)
        .bind(serde_json::to_string(&snapshot.data)?)
        .bind(snapshot.trigger.as_str())
        .bind(snapshot.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_context_snapshots(&mut self, task_id: Uuid) -> Result<Vec<TaskContextSnapshot>, StoreError> {
        let sql = format!(
            r#"
            SELECT s.id, s.task_id, s.version, s.data, s.trigger, s.created_at
            FROM task_context_snapshots s
            JOIN tasks t ON t.id = s.task_id
            WHERE s.task_id = ? AND {}
            ORDER BY s.version ASC, s.created_at ASC
            "#,
            TASK_VISIBLE
        );
        let rows = sqlx::query(&sql)
            .bind(task_id)
            .bind(self.scope.tenant_id)
            .bind(self.scope.tenant_id)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter()
            .map(|row| -> Result<TaskContextSnapshot, StoreError> {
                let trigger: String = row.try_get("trigger")?;
                Ok(TaskContextSnapshot {
                    id: row.try_get("id")?,
                    task_id: row.try_get("task_id")?,
                    version: row.try_get("version")?,
                    data: decode_json(row, "data")?,
                    trigger: decode_trigger(&trigger)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

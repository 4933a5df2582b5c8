/// Task context value types
///
/// State is the current document, patches form the append-only journal and
/// snapshots are periodic copies used to bound replay cost.

use crate::context::diff::ContextDiff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current context document for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContextState {
    pub task_id: Uuid,
    /// Starts at 1, +1 per applied patch
    pub version: i64,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskContextState {
    pub fn initial(task_id: Uuid, data: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            version: 1,
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable journal entry; `after_version == before_version + 1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContextPatch {
    pub id: Uuid,
    pub task_id: Uuid,
    #[serde(default)]
    pub writer_node_key: String,
    pub before_version: i64,
    pub after_version: i64,
    pub diff: ContextDiff,
    pub created_at: DateTime<Utc>,
}

impl TaskContextPatch {
    /// Unapplied patch against `before_version`; the store fills in the rest
    pub fn new(task_id: Uuid, writer_node_key: impl Into<String>, before_version: i64, diff: ContextDiff) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            writer_node_key: writer_node_key.into(),
            before_version,
            after_version: before_version + 1,
            diff,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Periodic,
    Manual,
}

impl SnapshotTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContextSnapshot {
    pub id: Uuid,
    pub task_id: Uuid,
    pub version: i64,
    pub data: Map<String, Value>,
    pub trigger: SnapshotTrigger,
    pub created_at: DateTime<Utc>,
}

impl TaskContextSnapshot {
    pub fn of(state: &TaskContextState, trigger: SnapshotTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: state.task_id,
            version: state.version,
            data: state.data.clone(),
            trigger,
            created_at: Utc::now(),
        }
    }
}

/// One page of the patch journal
#[derive(Debug, Clone, Serialize)]
pub struct PatchPage {
    pub patches: Vec<TaskContextPatch>,
    pub total: i64,
}

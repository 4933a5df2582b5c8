/// Task records
///
/// A task is one execution instance of a workflow. While running it is owned
/// exclusively by the engine; the persisted copy is what observers read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Per-node record kept on the task for diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_key: String,
    pub status: NodeExecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Executor calls made, including the successful one
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_ids: Vec<Uuid>,
}

impl NodeExecution {
    pub fn pending(node_key: impl Into<String>) -> Self {
        Self {
            node_key: node_key.into(),
            status: NodeExecStatus::Pending,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            artifact_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    pub workflow_id: Uuid,
    /// Media asset the run is bound to, if any
    #[serde(default)]
    pub asset_id: Option<Uuid>,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    #[serde(default)]
    pub current_node: Option<String>,
    #[serde(default)]
    pub context_version: i64,
    #[serde(default)]
    pub input_params: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub node_executions: Vec<NodeExecution>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New pending task for `workflow_id`
    pub fn new(workflow_id: Uuid, tenant_id: Option<Uuid>, input_params: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_id,
            asset_id: None,
            status: TaskStatus::Pending,
            progress: 0,
            current_node: None,
            context_version: 0,
            input_params,
            error: None,
            node_executions: Vec::new(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_asset(mut self, asset_id: Uuid) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    pub fn node_execution(&self, node_key: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|n| n.node_key == node_key)
    }
}

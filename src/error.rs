/// Error types for the execution core
///
/// Three layers, each with its own enum: persistence (`StoreError`),
/// operator backends (`ExecutorError`) and the scheduler (`EngineError`).
/// Lower layers convert upward through `#[from]`.

use crate::operator::ExecMode;
use std::time::Duration;
use uuid::Uuid;

/// Persistence and task context failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed; re-read the state and retry
    #[error("task context version conflict")]
    VersionConflict,

    /// Entity is missing or not visible in the current tenant scope
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into a domain value
    #[error("failed to decode stored value: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict)
    }
}

/// Operator backend failures
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// No executor is registered for the version's execution mode
    #[error("no executor registered for exec mode: {0}")]
    UnsupportedMode(ExecMode),

    /// Required backend configuration is absent or empty
    #[error("{0}")]
    MissingConfig(String),

    /// The backend ran and reported a failure
    #[error("{0}")]
    Execution(String),

    #[error("operator timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ExecutorError {
    /// Configuration errors fail the node immediately; everything else may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnsupportedMode(_) | Self::MissingConfig(_))
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::MissingConfig(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

/// Scheduler failures surfaced from `WorkflowEngine`
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow has no nodes")]
    NoNodes,

    #[error("workflow contains cycles")]
    Cycle,

    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("duplicate node key: {0}")]
    DuplicateNode(String),

    #[error("task is not running")]
    NotRunning,

    #[error("task {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("execution cancelled")]
    Cancelled,

    #[error("layer {layer} execution failed: {}", .failures.join("; "))]
    LayerFailed { layer: usize, failures: Vec<String> },

    /// Node failed before or outside the retry loop (resolution, artifacts, context)
    #[error("node {node_key}: {message}")]
    NodeFailed { node_key: String, message: String },

    #[error("node {node_key} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        node_key: String,
        attempts: u32,
        #[source]
        source: ExecutorError,
    },

    #[error("task context error: {0}")]
    Context(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn node(node_key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::NodeFailed {
            node_key: node_key.into(),
            message: message.to_string(),
        }
    }
}

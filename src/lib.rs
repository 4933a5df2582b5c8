/// Opflow: layered DAG execution of operator pipelines
///
/// This library provides the scheduler that runs a workflow of operator nodes
/// layer by layer, the versioned task context nodes share, and the operator
/// backends (HTTP, CLI, MCP, AI model) the scheduler dispatches to.

// Core configuration and setup
pub mod config;

// Error enums for storage, backends and the scheduler
pub mod error;

// Operator definitions and the input/output exchanged with backends
pub mod operator;

// Workflow graphs, tasks and artifacts
pub mod workflow;

// Versioned per-task shared document
pub mod context;

// Unit of work and the SQLite repositories behind it
pub mod storage;

// Runtime execution engine - petgraph layering and node orchestration
pub mod runtime;

// Concrete operator executors
pub mod backends;

// Component wiring used by the binary
pub mod app;

// Re-export commonly used types for external consumers
pub use app::App;
pub use config::Config;
pub use context::{ContextDiff, TaskContextStore};
pub use error::{EngineError, ExecutorError, StoreError};
pub use operator::{ExecMode, Operator, OperatorInput, OperatorOutput, OperatorVersion};
pub use runtime::{ExecutorRegistry, OperatorExecutor, WorkflowEngine};
pub use storage::{Scope, SqliteUnitOfWork, UnitOfWork};
pub use workflow::{Artifact, Edge, EdgeCondition, Node, Task, TaskStatus, Workflow};

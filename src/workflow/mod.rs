/// Workflow Layer
///
/// This module holds the value objects the engine operates on:
/// - Workflow graph definitions (Workflow, Node, Edge, ContextSpec)
/// - Task records with per-node execution state
/// - Artifacts produced from node outputs

// Graph definition types
pub mod types;

// Task lifecycle and node execution records
pub mod task;

// Typed node output persistence records
pub mod artifact;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactData, ArtifactType};
pub use task::{NodeExecStatus, NodeExecution, Task, TaskStatus};
pub use types::{
    ContextSpec, ContextVarSpec, Edge, EdgeCondition, Node, NodeConfig, SharedKeySpec, Workflow,
};

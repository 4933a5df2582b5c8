/// Runtime Execution Engine
///
/// This module provides the layered DAG scheduler for workflows.
/// It handles:
/// - Kahn layering of the workflow graph with petgraph
/// - Concurrent execution of each layer on tokio
/// - Retry, timeout and cancellation per node
/// - Routing nodes to operator executors by execution mode

// Execution plan (layers) and topological order
pub mod layering;

// Per-task in-memory execution state
pub mod state;

// The scheduler itself
pub mod engine;

// Executor contract shared by all backends
pub mod executor;

// Mode -> executor routing table
pub mod registry;

// Re-export main types
pub use engine::WorkflowEngine;
pub use executor::OperatorExecutor;
pub use layering::{topological_order, ExecutionPlan};
pub use registry::ExecutorRegistry;
pub use state::TaskExecution;

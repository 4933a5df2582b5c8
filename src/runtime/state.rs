/// In-memory state of one in-flight task
///
/// One `TaskExecution` per running task, never shared across tasks. Node
/// futures of the same layer touch it concurrently, so all access goes through
/// methods that take the lock internally.

use crate::operator::OperatorOutput;
use crate::workflow::{NodeExecStatus, NodeExecution, Task};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
struct ExecutionState {
    progress: u8,
    context_version: i64,
    node_results: HashMap<String, OperatorOutput>,
    /// Declaration order of nodes, for stable persistence
    node_order: Vec<String>,
    node_executions: HashMap<String, NodeExecution>,
    /// Engine-owned copy of the task; persisted as a whole
    task: Task,
}

#[derive(Debug)]
pub struct TaskExecution {
    cancel: CancellationToken,
    state: RwLock<ExecutionState>,
}

impl TaskExecution {
    pub fn new(task: Task, node_keys: impl IntoIterator<Item = String>) -> Self {
        let node_order: Vec<String> = node_keys.into_iter().collect();
        let node_executions = node_order
            .iter()
            .map(|key| (key.clone(), NodeExecution::pending(key.clone())))
            .collect();
        Self {
            cancel: CancellationToken::new(),
            state: RwLock::new(ExecutionState {
                progress: 0,
                context_version: task.context_version,
                node_results: HashMap::new(),
                node_order,
                node_executions,
                task,
            }),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.state.read().task.id
    }

    /// Read from the task copy without cloning it
    pub fn with_task<R>(&self, f: impl FnOnce(&Task) -> R) -> R {
        f(&self.state.read().task)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> u8 {
        self.state.read().progress
    }

    pub fn set_progress(&self, progress: u8) {
        let mut state = self.state.write();
        state.progress = progress.min(100);
        state.task.progress = state.progress;
    }

    pub fn context_version(&self) -> i64 {
        self.state.read().context_version
    }

    /// Versions only move forward; a late writer never rolls it back
    pub fn set_context_version(&self, version: i64) {
        let mut state = self.state.write();
        if version > state.context_version {
            state.context_version = version;
            state.task.context_version = version;
        }
    }

    pub fn node_status(&self, node_key: &str) -> Option<NodeExecStatus> {
        self.state.read().node_executions.get(node_key).map(|n| n.status)
    }

    pub fn node_execution(&self, node_key: &str) -> Option<NodeExecution> {
        self.state.read().node_executions.get(node_key).cloned()
    }

    /// Outputs of every node that has completed so far
    pub fn node_results(&self) -> Vec<(String, OperatorOutput)> {
        let state = self.state.read();
        state
            .node_order
            .iter()
            .filter_map(|key| state.node_results.get(key).map(|out| (key.clone(), out.clone())))
            .collect()
    }

    pub fn mark_running(&self, node_key: &str) {
        let mut state = self.state.write();
        state.task.current_node = Some(node_key.to_string());
        if let Some(exec) = state.node_executions.get_mut(node_key) {
            exec.status = NodeExecStatus::Running;
            exec.started_at = Some(Utc::now());
        }
    }

    pub fn record_attempt(&self, node_key: &str) -> u32 {
        let mut state = self.state.write();
        match state.node_executions.get_mut(node_key) {
            Some(exec) => {
                exec.attempts += 1;
                exec.attempts
            }
            None => 0,
        }
    }

    pub fn mark_skipped(&self, node_key: &str) {
        let mut state = self.state.write();
        if let Some(exec) = state.node_executions.get_mut(node_key) {
            exec.status = NodeExecStatus::Skipped;
        }
    }

    /// Record a successful node; `output` is `None` for pass-through nodes
    pub fn mark_success(&self, node_key: &str, output: Option<OperatorOutput>, artifact_ids: Vec<Uuid>) {
        let mut state = self.state.write();
        if let Some(output) = output {
            state.node_results.insert(node_key.to_string(), output);
        }
        if let Some(exec) = state.node_executions.get_mut(node_key) {
            exec.status = NodeExecStatus::Success;
            exec.completed_at = Some(Utc::now());
            exec.artifact_ids = artifact_ids;
        }
    }

    pub fn mark_failed(&self, node_key: &str, error: &str) {
        let mut state = self.state.write();
        if let Some(exec) = state.node_executions.get_mut(node_key) {
            exec.status = NodeExecStatus::Failed;
            exec.error = Some(error.to_string());
            exec.completed_at = Some(Utc::now());
        }
    }

    /// Apply a change to the task copy
    pub fn update_task(&self, f: impl FnOnce(&mut Task)) {
        f(&mut self.state.write().task);
    }

    /// Task copy with node executions folded in, ready to persist
    pub fn task_snapshot(&self) -> Task {
        let state = self.state.read();
        let mut task = state.task.clone();
        task.node_executions = state
            .node_order
            .iter()
            .filter_map(|key| state.node_executions.get(key).cloned())
            .collect();
        task.context_version = state.context_version;
        task.progress = state.progress;
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn execution() -> TaskExecution {
        let task = Task::new(Uuid::new_v4(), None, Map::new());
        TaskExecution::new(task, ["a".to_string(), "b".to_string()])
    }

    #[test]
    fn snapshot_reflects_node_records_in_declaration_order() {
        let exec = execution();
        exec.mark_running("b");
        exec.record_attempt("b");
        exec.mark_failed("b", "boom");
        exec.mark_skipped("a");

        let task = exec.task_snapshot();
        assert_eq!(task.current_node.as_deref(), Some("b"));
        let keys: Vec<_> = task.node_executions.iter().map(|n| n.node_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(task.node_executions[0].status, NodeExecStatus::Skipped);
        assert_eq!(task.node_executions[1].status, NodeExecStatus::Failed);
        assert_eq!(task.node_executions[1].attempts, 1);
        assert_eq!(task.node_executions[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn context_version_never_goes_backwards() {
        let exec = execution();
        exec.set_context_version(5);
        exec.set_context_version(3);
        assert_eq!(exec.context_version(), 5);
        assert_eq!(exec.task_snapshot().context_version, 5);
    }

    #[test]
    fn results_only_for_nodes_with_output() {
        let exec = execution();
        exec.mark_success("a", None, Vec::new());
        exec.mark_success("b", Some(OperatorOutput::default()), Vec::new());
        let results = exec.node_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b");
        assert_eq!(exec.node_status("a"), Some(NodeExecStatus::Success));
    }

    #[test]
    fn cancel_is_observable() {
        let exec = execution();
        assert!(!exec.is_cancelled());
        exec.cancel();
        assert!(exec.cancel_token().is_cancelled());
    }
}

/// Layered DAG execution engine
///
/// Plans a workflow into Kahn layers, runs every node of a layer concurrently
/// on the tokio runtime and joins the layer before starting the next one.
/// Node outputs flow downstream through synthesized input keys, are persisted
/// as artifacts and are mirrored into the task context. One cancellation token
/// scopes a whole task.

use crate::config::EngineConfig;
use crate::context::{resolve_path, ContextDiff, TaskContextState, TaskContextStore};
use crate::error::{EngineError, ExecutorError, StoreError};
use crate::operator::{OperatorInput, OperatorOutput, OperatorVersion};
use crate::runtime::executor::OperatorExecutor;
use crate::runtime::layering::ExecutionPlan;
use crate::runtime::registry::ExecutorRegistry;
use crate::runtime::state::TaskExecution;
use crate::storage::{self, UnitOfWork};
use crate::workflow::{Artifact, EdgeCondition, Node, NodeExecStatus, Task, TaskStatus, Workflow};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use uuid::Uuid;

type RunningTasks = RwLock<HashMap<Uuid, Arc<TaskExecution>>>;

/// DAG workflow engine
///
/// Cheap to clone; clones share the executor registry, the persistence handle
/// and the table of in-flight tasks.
#[derive(Clone)]
pub struct WorkflowEngine {
    uow: Arc<dyn UnitOfWork>,
    executors: Arc<ExecutorRegistry>,
    contexts: TaskContextStore,
    config: EngineConfig,
    running: Arc<RunningTasks>,
}

/// Removes a task from the in-flight table however `execute` exits
struct Tracked<'a> {
    running: &'a RunningTasks,
    task_id: Uuid,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        self.running.write().remove(&self.task_id);
    }
}

impl WorkflowEngine {
    pub fn new(uow: Arc<dyn UnitOfWork>, executors: Arc<ExecutorRegistry>, config: EngineConfig) -> Self {
        let contexts = TaskContextStore::new(Arc::clone(&uow))
            .with_snapshot_interval(config.snapshot_interval)
            .with_retry(config.context_patch_attempts, config.context_backoff());
        Self {
            uow,
            executors,
            contexts,
            config,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn contexts(&self) -> &TaskContextStore {
        &self.contexts
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.running.read().contains_key(&task_id)
    }

    /// Execute `workflow` for `task`, writing the terminal state back into `task`
    ///
    /// Structural problems (no nodes, cycles, bad edges) are reported before the
    /// task is touched. Every other outcome is persisted: `success`, `failed`
    /// with the first failing layer's error, or `cancelled`.
    pub async fn execute(&self, workflow: &Workflow, task: &mut Task) -> Result<(), EngineError> {
        if workflow.nodes.is_empty() {
            return Err(EngineError::NoNodes);
        }
        let plan = ExecutionPlan::build(workflow)?;

        let exec = Arc::new(TaskExecution::new(
            task.clone(),
            workflow.nodes.iter().map(|node| node.key.clone()),
        ));
        {
            let mut running = self.running.write();
            if running.contains_key(&task.id) {
                return Err(EngineError::AlreadyRunning(task.id));
            }
            running.insert(task.id, Arc::clone(&exec));
        }
        let _tracked = Tracked {
            running: &self.running,
            task_id: task.id,
        };

        tracing::info!(
            "🚀 Starting task {} for workflow '{}' ({} nodes in {} layers)",
            task.id,
            workflow.code,
            plan.node_count(),
            plan.total_layers()
        );
        let started = std::time::Instant::now();

        let workflow = Arc::new(workflow.clone());
        let result = self.drive(&workflow, &plan, &exec).await;
        *task = exec.task_snapshot();

        match &result {
            Ok(()) => tracing::info!("🎉 Task {} completed in {:?}", task.id, started.elapsed()),
            Err(EngineError::Cancelled) => tracing::warn!("🛑 Task {} cancelled at {}%", task.id, task.progress),
            Err(err) => tracing::error!("❌ Task {} failed: {}", task.id, err),
        }
        result
    }

    /// Cancel an in-flight task; cooperative, nodes stop at their next check
    pub fn cancel(&self, task_id: Uuid) -> Result<(), EngineError> {
        let exec = self
            .running
            .read()
            .get(&task_id)
            .cloned()
            .ok_or(EngineError::NotRunning)?;
        exec.cancel();
        tracing::info!("🛑 Cancellation requested for task {}", task_id);
        Ok(())
    }

    /// In-memory progress while tracked, otherwise the persisted value
    pub async fn get_progress(&self, task_id: Uuid) -> Result<u8, EngineError> {
        let tracked = self.running.read().get(&task_id).cloned();
        if let Some(exec) = tracked {
            return Ok(exec.progress());
        }
        let task = storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move { repos.get_task(task_id).await })
        })
        .await?;
        Ok(task.progress)
    }

    async fn drive(
        &self,
        workflow: &Arc<Workflow>,
        plan: &ExecutionPlan,
        exec: &Arc<TaskExecution>,
    ) -> Result<(), EngineError> {
        exec.update_task(|task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            task.completed_at = None;
            task.error = None;
        });
        exec.set_progress(0);
        self.sync_task(exec).await?;

        match self.init_context(workflow, exec).await {
            Ok(state) => exec.set_context_version(state.version),
            Err(err) => {
                self.finish(exec, TaskStatus::Failed, Some(err.to_string())).await;
                return Err(err);
            }
        }

        let total = plan.total_layers();
        for (index, layer) in plan.layers.iter().enumerate() {
            if exec.is_cancelled() {
                return self.abort_cancelled(exec).await;
            }

            tracing::info!("🔄 Layer {}/{} of task {}: {:?}", index + 1, total, exec.task_id(), layer);
            if let Err(err) = self.run_layer(workflow, exec, index, layer).await {
                if exec.is_cancelled() {
                    return self.abort_cancelled(exec).await;
                }
                self.finish(exec, TaskStatus::Failed, Some(err.to_string())).await;
                return Err(err);
            }

            exec.set_progress(layer_progress(index + 1, total));
            self.sync_task(exec).await?;
        }

        exec.set_progress(100);
        self.try_finish(exec, TaskStatus::Success, None).await?;
        Ok(())
    }

    async fn run_layer(
        &self,
        workflow: &Arc<Workflow>,
        exec: &Arc<TaskExecution>,
        index: usize,
        layer: &[String],
    ) -> Result<(), EngineError> {
        let mut nodes = JoinSet::new();
        for key in layer {
            let engine = self.clone();
            let workflow = Arc::clone(workflow);
            let exec = Arc::clone(exec);
            let key = key.clone();
            nodes.spawn(async move {
                let result = engine.execute_node(&workflow, &exec, &key).await;
                (key, result)
            });
        }

        // Siblings that already started are awaited, never aborted
        let mut failures = Vec::new();
        while let Some(joined) = nodes.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((_, Err(err))) => failures.push(err.to_string()),
                Err(join_err) => failures.push(format!("node task aborted: {}", join_err)),
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        failures.sort();
        Err(EngineError::LayerFailed { layer: index, failures })
    }

    async fn execute_node(&self, workflow: &Workflow, exec: &TaskExecution, key: &str) -> Result<(), EngineError> {
        let node = workflow
            .node(key)
            .ok_or_else(|| EngineError::UnknownNode(key.to_string()))?;

        if !should_execute(workflow, exec, key) {
            tracing::info!("⏭️ Skipping node '{}': edge condition not met", key);
            exec.mark_skipped(key);
            self.sync_task(exec).await?;
            return Ok(());
        }

        exec.mark_running(key);
        self.sync_task(exec).await?;

        let outcome = match node.operator_id {
            None => self.pass_through(workflow, exec, node).await,
            Some(operator_id) => self.run_operator(workflow, exec, node, operator_id).await,
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => self.fail_node(exec, key, err).await,
        }
    }

    async fn pass_through(&self, workflow: &Workflow, exec: &TaskExecution, node: &Node) -> Result<(), EngineError> {
        tracing::debug!("➡️ Node '{}' has no operator, passing through", node.key);
        self.record_context(workflow, exec, node, None, &[]).await?;
        exec.mark_success(&node.key, None, Vec::new());
        self.sync_task(exec).await?;
        Ok(())
    }

    async fn run_operator(
        &self,
        workflow: &Workflow,
        exec: &TaskExecution,
        node: &Node,
        operator_id: Uuid,
    ) -> Result<(), EngineError> {
        let key = node.key.as_str();
        let operator = storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move { repos.get_operator(operator_id).await })
        })
        .await
        .map_err(|err| EngineError::node(key, format!("failed to resolve operator: {}", err)))?;
        let version = operator
            .active_version
            .ok_or_else(|| EngineError::node(key, format!("operator '{}' has no active version", operator.code)))?;

        let state = self.contexts.get_state(exec.task_id()).await?;
        let completed = exec.node_results();
        let input = exec
            .with_task(|task| build_input(&task.input_params, task.asset_id, state.data, node, &completed))
            .map_err(StoreError::from)?;
        tracing::debug!("📥 Input for node '{}': {} params", key, input.params.len());

        let executor = self.executors.get(version.exec_mode).map_err(|err| EngineError::node(key, err))?;
        let output = self
            .execute_with_retry(exec, node, executor.as_ref(), &version, &input)
            .await?;

        let artifacts = Artifact::from_output(exec.task_id(), key, &output);
        let artifact_ids: Vec<Uuid> = artifacts.iter().map(|artifact| artifact.id).collect();
        if !artifacts.is_empty() {
            storage::run(self.uow.as_ref(), move |repos| {
                Box::pin(async move {
                    for artifact in &artifacts {
                        repos.insert_artifact(artifact).await?;
                    }
                    Ok::<_, StoreError>(())
                })
            })
            .await?;
            tracing::debug!("💾 Node '{}' stored {} artifacts", key, artifact_ids.len());
        }

        self.record_context(workflow, exec, node, Some(&output), &artifact_ids).await?;
        exec.mark_success(key, Some(output), artifact_ids);
        self.sync_task(exec).await?;
        tracing::info!("✅ Node '{}' completed", key);
        Ok(())
    }

    /// Run the attempt loop under one node timeout; cancellation wins over both
    async fn execute_with_retry(
        &self,
        exec: &TaskExecution,
        node: &Node,
        executor: &dyn OperatorExecutor,
        version: &OperatorVersion,
        input: &OperatorInput,
    ) -> Result<OperatorOutput, EngineError> {
        let limit = match node.timeout_seconds() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let token = exec.cancel_token();
        let attempts = self.attempt_loop(exec, node, executor, version, input);

        tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled),
            result = async {
                match limit {
                    Some(limit) => match tokio::time::timeout(limit, attempts).await {
                        Ok(result) => result,
                        Err(_) => {
                            let made = exec.node_execution(&node.key).map_or(0, |n| n.attempts);
                            tracing::warn!("⏱️ Node '{}' timed out after {:?} ({} attempts)", node.key, limit, made);
                            Err(EngineError::RetriesExhausted {
                                node_key: node.key.clone(),
                                attempts: made,
                                source: ExecutorError::Timeout(limit),
                            })
                        }
                    },
                    None => attempts.await,
                }
            } => result,
        }
    }

    async fn attempt_loop(
        &self,
        exec: &TaskExecution,
        node: &Node,
        executor: &dyn OperatorExecutor,
        version: &OperatorVersion,
        input: &OperatorInput,
    ) -> Result<OperatorOutput, EngineError> {
        let attempts = node.retry_count().saturating_add(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_backoff() * 2u32.saturating_pow(attempt - 1);
                tracing::debug!("⏳ Node '{}' backing off {:?} before attempt {}", node.key, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            exec.record_attempt(&node.key);
            match executor.execute(version, input).await {
                Ok(output) => return Ok(output),
                Err(err) if !err.is_retryable() => return Err(EngineError::node(&node.key, err)),
                Err(err) => {
                    tracing::warn!("⚠️ Node '{}' attempt {}/{} failed: {}", node.key, attempt + 1, attempts, err);
                    last_error = Some(err);
                }
            }
        }

        Err(EngineError::RetriesExhausted {
            node_key: node.key.clone(),
            attempts,
            source: last_error.unwrap_or_else(|| ExecutorError::execution("no attempt was made")),
        })
    }

    /// Mirror a node's outcome into the task context
    async fn record_context(
        &self,
        workflow: &Workflow,
        exec: &TaskExecution,
        node: &Node,
        output: Option<&OperatorOutput>,
        artifact_ids: &[Uuid],
    ) -> Result<(), EngineError> {
        let key = node.key.as_str();
        let mut diff = ContextDiff::new().set(format!("nodes.{}.status", key), json!("success"));

        if let Some(output) = output {
            let output = serde_json::to_value(output).map_err(StoreError::from)?;
            if let Some(config) = &node.config {
                for (path, selector) in &config.output_mapping {
                    let value = resolve_path(&output, selector).ok_or_else(|| {
                        EngineError::Context(format!("node {}: output selector '{}' not found", key, selector))
                    })?;
                    diff = diff.set(path.clone(), value.clone());
                }
            }
            diff = diff
                .set(format!("nodes.{}.output", key), output)
                .set(format!("nodes.{}.artifact_ids", key), json!(artifact_ids));
        }

        validate_write_paths(workflow, key, &diff)?;
        let patch = self.contexts.apply_with_retry(exec.task_id(), key, diff).await?;
        exec.set_context_version(patch.after_version);
        Ok(())
    }

    /// Seed version 1 of the task context
    async fn init_context(&self, workflow: &Workflow, exec: &TaskExecution) -> Result<TaskContextState, EngineError> {
        let (task_id, asset_id, params) = exec.with_task(|task| (task.id, task.asset_id, task.input_params.clone()));

        let mut vars = Map::new();
        if let Some(spec) = &workflow.context_spec {
            for (name, var) in &spec.vars {
                if let Some(default) = &var.default {
                    vars.insert(name.clone(), default.clone());
                }
            }
        }
        vars.extend(params);
        if let Some(spec) = &workflow.context_spec {
            if let Some((name, _)) = spec.vars.iter().find(|(name, var)| var.required && !vars.contains_key(*name)) {
                return Err(EngineError::Context(format!("required context variable '{}' is missing", name)));
            }
        }

        let mut meta = Map::new();
        meta.insert("task_id".into(), json!(task_id));
        meta.insert("workflow_id".into(), json!(workflow.id));
        meta.insert("workflow_code".into(), json!(workflow.code));
        if let Some(asset_id) = asset_id {
            meta.insert("asset_id".into(), json!(asset_id));
        }
        meta.insert("initialized_at".into(), json!(Utc::now()));

        let mut data = Map::new();
        data.insert("meta".into(), Value::Object(meta));
        data.insert("vars".into(), Value::Object(vars));
        data.insert("shared".into(), json!({}));
        data.insert("nodes".into(), json!({}));
        data.insert("artifacts".into(), json!({}));

        let state = self.contexts.initialize_state_with(task_id, data).await?;
        tracing::debug!("🧭 Initialized context for task {} at version {}", task_id, state.version);
        Ok(state)
    }

    async fn fail_node(&self, exec: &TaskExecution, key: &str, err: EngineError) -> Result<(), EngineError> {
        tracing::error!("❌ Node '{}' failed: {}", key, err);
        exec.mark_failed(key, &err.to_string());
        if let Err(sync_err) = self.sync_task(exec).await {
            tracing::warn!("⚠️ Could not persist failure of node '{}': {}", key, sync_err);
        }
        Err(err)
    }

    async fn abort_cancelled(&self, exec: &TaskExecution) -> Result<(), EngineError> {
        self.finish(exec, TaskStatus::Cancelled, Some(EngineError::Cancelled.to_string()))
            .await;
        Err(EngineError::Cancelled)
    }

    /// Terminal write for failure paths; the node error wins over a persistence error
    async fn finish(&self, exec: &TaskExecution, status: TaskStatus, error: Option<String>) {
        if let Err(err) = self.try_finish(exec, status, error).await {
            tracing::warn!("⚠️ Could not persist {} state of task {}: {}", status.as_str(), exec.task_id(), err);
        }
    }

    async fn try_finish(&self, exec: &TaskExecution, status: TaskStatus, error: Option<String>) -> Result<(), StoreError> {
        exec.update_task(|task| {
            task.status = status;
            task.error = error;
            task.completed_at = Some(Utc::now());
        });
        self.sync_task(exec).await
    }

    async fn sync_task(&self, exec: &TaskExecution) -> Result<(), StoreError> {
        let mut task = exec.task_snapshot();
        task.updated_at = Utc::now();
        storage::run(self.uow.as_ref(), move |repos| {
            Box::pin(async move { repos.update_task(&task).await })
        })
        .await
    }
}

/// Every incoming edge is checked on its own; all of them must hold
fn should_execute(workflow: &Workflow, exec: &TaskExecution, key: &str) -> bool {
    workflow.incoming(key).all(|edge| match edge.condition() {
        EdgeCondition::Always => true,
        EdgeCondition::OnSuccess => exec.node_status(&edge.source) == Some(NodeExecStatus::Success),
        EdgeCondition::OnFailure => exec.node_status(&edge.source) == Some(NodeExecStatus::Failed),
    })
}

/// Merge node input; later sources override earlier ones
///
/// task params < `context` < input mapping < node params < upstream outputs
fn build_input(
    task_params: &Map<String, Value>,
    asset_id: Option<Uuid>,
    context: Map<String, Value>,
    node: &Node,
    completed: &[(String, OperatorOutput)],
) -> Result<OperatorInput, serde_json::Error> {
    let context = Value::Object(context);
    let mapped: Vec<(String, Value)> = node
        .config
        .iter()
        .flat_map(|config| config.input_mapping.iter())
        .filter_map(|(param, path)| match resolve_path(&context, path) {
            Some(value) => Some((param.clone(), value.clone())),
            None => {
                tracing::debug!("🔍 Input mapping '{}' -> '{}' did not resolve", param, path);
                None
            }
        })
        .collect();

    let mut params = task_params.clone();
    params.insert("context".into(), context);
    params.extend(mapped);
    if let Some(config) = &node.config {
        for (name, value) in &config.params {
            params.insert(name.clone(), value.clone());
        }
    }

    for (key, output) in completed {
        params.insert(format!("{}_output", key), serde_json::to_value(output)?);
        if !output.output_assets.is_empty() {
            params.insert(format!("{}_assets", key), serde_json::to_value(&output.output_assets)?);
        }
        if !output.results.is_empty() {
            params.insert(format!("{}_results", key), serde_json::to_value(&output.results)?);
        }
        if !output.timeline.is_empty() {
            params.insert(format!("{}_timeline", key), serde_json::to_value(&output.timeline)?);
        }
    }

    Ok(OperatorInput { asset_id, params })
}

/// Own subtree is free, `vars` is read-only, shared paths need a CAS declaration
fn validate_write_paths(workflow: &Workflow, key: &str, diff: &ContextDiff) -> Result<(), EngineError> {
    let own = format!("nodes.{}.", key);
    for path in diff.paths() {
        if path.starts_with(&own) {
            continue;
        }
        if path == "vars" || path.starts_with("vars.") {
            return Err(EngineError::Context(format!("node {} may not write read-only path '{}'", key, path)));
        }

        let declared = workflow.context_spec.as_ref().and_then(|spec| {
            spec.shared_keys
                .iter()
                .find(|(shared, _)| path == shared.as_str() || path.starts_with(&format!("{}.", shared)))
                .map(|(_, spec)| spec)
        });
        match declared {
            Some(spec) if spec.cas && !spec.conflict_policy.is_empty() => {}
            Some(_) => {
                return Err(EngineError::Context(format!(
                    "shared key '{}' must declare cas and a conflict policy",
                    path
                )))
            }
            None => {
                return Err(EngineError::Context(format!("node {} may not write undeclared path '{}'", key, path)))
            }
        }
    }
    Ok(())
}

fn layer_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 * 100.0) / total as f64).round().min(100.0) as u8
}

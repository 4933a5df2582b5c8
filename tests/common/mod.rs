//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use opflow::config::EngineConfig;
use opflow::error::ExecutorError;
use opflow::operator::{ExecConfig, ExecMode, Operator, OperatorInput, OperatorOutput, OperatorVersion, VersionStatus};
use opflow::storage::{self, SqliteUnitOfWork, UnitOfWork};
use opflow::workflow::{Artifact, ContextSpec, Edge, EdgeCondition, Node, NodeConfig, Task, Workflow};
use opflow::{ExecutorRegistry, OperatorExecutor, WorkflowEngine};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Decides the outcome of one call; receives the 1-based attempt number
pub type Behavior = Arc<dyn Fn(&OperatorInput, usize) -> Result<OperatorOutput, ExecutorError> + Send + Sync>;

/// HTTP-mode executor whose behavior is scripted per operator
#[derive(Default)]
pub struct MockExecutor {
    behaviors: Mutex<HashMap<Uuid, Behavior>>,
    calls: Mutex<HashMap<Uuid, Arc<AtomicUsize>>>,
    inputs: Mutex<Vec<(Uuid, OperatorInput)>>,
}

impl MockExecutor {
    pub fn script(&self, operator_id: Uuid, behavior: Behavior) {
        self.behaviors.lock().insert(operator_id, behavior);
    }

    pub fn calls(&self, operator_id: Uuid) -> usize {
        self.calls
            .lock()
            .get(&operator_id)
            .map_or(0, |count| count.load(Ordering::SeqCst))
    }

    /// Inputs received by `operator_id`, in call order
    pub fn inputs(&self, operator_id: Uuid) -> Vec<OperatorInput> {
        self.inputs
            .lock()
            .iter()
            .filter(|(id, _)| *id == operator_id)
            .map(|(_, input)| input.clone())
            .collect()
    }
}

#[async_trait]
impl OperatorExecutor for MockExecutor {
    async fn execute(&self, version: &OperatorVersion, input: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
        let counter = Arc::clone(self.calls.lock().entry(version.operator_id).or_default());
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.inputs.lock().push((version.operator_id, input.clone()));

        let behavior = self.behaviors.lock().get(&version.operator_id).cloned();
        match behavior {
            Some(behavior) => behavior(input, attempt),
            None => Ok(OperatorOutput::default()),
        }
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Http
    }

    async fn health_check(&self, _: &OperatorVersion) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// CLI-mode executor that signals `started` and then never finishes
pub struct HangingExecutor {
    pub started: Arc<Notify>,
}

#[async_trait]
impl OperatorExecutor for HangingExecutor {
    async fn execute(&self, _: &OperatorVersion, _: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(OperatorOutput::default())
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Cli
    }

    async fn health_check(&self, _: &OperatorVersion) -> Result<(), ExecutorError> {
        Ok(())
    }
}

pub struct Harness {
    pub store: SqliteUnitOfWork,
    pub engine: WorkflowEngine,
    pub mock: Arc<MockExecutor>,
    pub started: Arc<Notify>,
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_backoff_ms: 1,
        context_patch_attempts: 8,
        context_backoff_ms: 1,
        snapshot_interval: 20,
    }
}

pub async fn harness() -> Harness {
    let store = SqliteUnitOfWork::in_memory().await.unwrap();
    let mock = Arc::new(MockExecutor::default());
    let started = Arc::new(Notify::new());
    let registry = ExecutorRegistry::new()
        .with(mock.clone())
        .with(Arc::new(HangingExecutor {
            started: Arc::clone(&started),
        }));
    let uow: Arc<dyn UnitOfWork> = Arc::new(store.clone());
    let engine = WorkflowEngine::new(uow, Arc::new(registry), fast_config());
    Harness {
        store,
        engine,
        mock,
        started,
    }
}

impl Harness {
    /// Persist an operator whose active version runs in `mode`
    pub async fn operator(&self, code: &str, mode: ExecMode) -> Uuid {
        let id = Uuid::new_v4();
        let operator = Operator {
            id,
            tenant_id: None,
            code: code.into(),
            name: code.into(),
            active_version: Some(OperatorVersion {
                id: Uuid::new_v4(),
                operator_id: id,
                version: "1.0.0".into(),
                exec_mode: mode,
                exec_config: ExecConfig::default(),
                status: VersionStatus::Active,
            }),
        };
        storage::run(&self.store, move |repos| {
            Box::pin(async move { repos.upsert_operator(&operator).await })
        })
        .await
        .unwrap();
        id
    }

    /// Persist a pending task for `workflow`
    pub async fn task(&self, workflow: &Workflow, params: Map<String, Value>) -> Task {
        let task = Task::new(workflow.id, None, params);
        let stored = task.clone();
        storage::run(&self.store, move |repos| {
            Box::pin(async move { repos.insert_task(&stored).await })
        })
        .await
        .unwrap();
        task
    }

    pub async fn load_task(&self, id: Uuid) -> Task {
        storage::run(&self.store, move |repos| Box::pin(async move { repos.get_task(id).await }))
            .await
            .unwrap()
    }

    pub async fn artifacts(&self, task_id: Uuid) -> Vec<Artifact> {
        storage::run(&self.store, move |repos| {
            Box::pin(async move { repos.list_artifacts(task_id).await })
        })
        .await
        .unwrap()
    }
}

pub fn node(key: &str, operator_id: Option<Uuid>) -> Node {
    Node {
        key: key.into(),
        node_type: "operator".into(),
        operator_id,
        config: None,
    }
}

pub fn node_with(key: &str, operator_id: Option<Uuid>, config: NodeConfig) -> Node {
    Node {
        config: Some(config),
        ..node(key, operator_id)
    }
}

pub fn edge(source: &str, target: &str) -> Edge {
    Edge {
        source: source.into(),
        target: target.into(),
        condition: None,
    }
}

pub fn conditional(source: &str, target: &str, condition: EdgeCondition) -> Edge {
    Edge {
        condition: Some(condition),
        ..edge(source, target)
    }
}

pub fn workflow(nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
    Workflow {
        id: Uuid::new_v4(),
        tenant_id: None,
        code: "test-flow".into(),
        name: "Test flow".into(),
        nodes,
        edges,
        context_spec: None,
    }
}

pub fn with_context(mut workflow: Workflow, spec: ContextSpec) -> Workflow {
    workflow.context_spec = Some(spec);
    workflow
}

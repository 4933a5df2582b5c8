/// Executor registry using ArcSwap
///
/// Maps an execution mode to the executor that serves it. Reads are lock-free;
/// registering swaps in a fresh map so executions in flight keep the map they
/// loaded.

use crate::error::ExecutorError;
use crate::operator::{ExecMode, OperatorVersion};
use crate::runtime::executor::OperatorExecutor;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

pub struct ExecutorRegistry {
    /// Key: execution mode, Value: shared executor
    executors: ArcSwap<HashMap<ExecMode, Arc<dyn OperatorExecutor>>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry").field("modes", &self.modes()).finish()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register (or replace) the executor for `executor.mode()`
    pub fn register(&self, executor: Arc<dyn OperatorExecutor>) {
        let mode = executor.mode();
        self.executors.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(mode, Arc::clone(&executor));
            next
        });
        tracing::info!("🔌 Registered executor for mode: {}", mode);
    }

    pub fn with(self, executor: Arc<dyn OperatorExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Unmapped modes are a configuration error, not a transient one
    pub fn get(&self, mode: ExecMode) -> Result<Arc<dyn OperatorExecutor>, ExecutorError> {
        self.executors
            .load()
            .get(&mode)
            .cloned()
            .ok_or(ExecutorError::UnsupportedMode(mode))
    }

    pub fn modes(&self) -> Vec<ExecMode> {
        let mut modes: Vec<ExecMode> = self.executors.load().keys().copied().collect();
        modes.sort_by_key(|m| m.as_str());
        modes
    }

    /// Route a health check to the executor for the version's mode
    pub async fn health_check(&self, version: &OperatorVersion) -> Result<(), ExecutorError> {
        let executor = self.get(version.exec_mode)?;
        executor.health_check(version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{ExecConfig, OperatorInput, OperatorOutput, VersionStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    struct Fixed(ExecMode, &'static str);

    #[async_trait]
    impl OperatorExecutor for Fixed {
        async fn execute(&self, _: &OperatorVersion, _: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
            let mut output = OperatorOutput::default();
            output.diagnostics.insert("by".into(), json!(self.1));
            Ok(output)
        }

        fn mode(&self) -> ExecMode {
            self.0
        }

        async fn health_check(&self, _: &OperatorVersion) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn version(mode: ExecMode) -> OperatorVersion {
        OperatorVersion {
            id: Uuid::new_v4(),
            operator_id: Uuid::new_v4(),
            version: "1".into(),
            exec_mode: mode,
            exec_config: ExecConfig::default(),
            status: VersionStatus::Active,
        }
    }

    #[tokio::test]
    async fn routes_by_mode_and_replaces_on_register() {
        let registry = ExecutorRegistry::new().with(Arc::new(Fixed(ExecMode::Http, "first")));
        registry.register(Arc::new(Fixed(ExecMode::Cli, "cli")));
        registry.register(Arc::new(Fixed(ExecMode::Http, "second")));

        assert_eq!(registry.modes(), vec![ExecMode::Cli, ExecMode::Http]);

        let out = registry
            .get(ExecMode::Http)
            .unwrap()
            .execute(&version(ExecMode::Http), &OperatorInput::default())
            .await
            .unwrap();
        assert_eq!(out.diagnostics["by"], json!("second"));
        assert!(registry.health_check(&version(ExecMode::Cli)).await.is_ok());
    }

    #[test]
    fn unmapped_mode_is_not_retryable() {
        let registry = ExecutorRegistry::new();
        let err = registry.get(ExecMode::AiModel).err().unwrap();
        assert!(matches!(err, ExecutorError::UnsupportedMode(ExecMode::AiModel)));
        assert!(!err.is_retryable());
    }
}

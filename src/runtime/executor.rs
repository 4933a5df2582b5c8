/// Operator executor contract
///
/// The scheduler depends only on this trait. Each backend (HTTP, CLI, MCP,
/// AI model) implements it, validates its own configuration before doing any
/// work, and reuses that validation in `health_check`.

use crate::error::ExecutorError;
use crate::operator::{ExecConfig, ExecMode, OperatorInput, OperatorOutput, OperatorVersion};
use async_trait::async_trait;

#[async_trait]
pub trait OperatorExecutor: Send + Sync {
    /// Run `version` against `input`
    async fn execute(
        &self,
        version: &OperatorVersion,
        input: &OperatorInput,
    ) -> Result<OperatorOutput, ExecutorError>;

    /// The execution mode this executor serves
    fn mode(&self) -> ExecMode;

    /// Check that `version` is runnable without running it
    async fn health_check(&self, version: &OperatorVersion) -> Result<(), ExecutorError>;
}

/// Reject versions routed to the wrong executor
pub fn ensure_mode(version: &OperatorVersion, expected: ExecMode) -> Result<(), ExecutorError> {
    if version.exec_mode != expected {
        return Err(ExecutorError::missing(format!(
            "{} executor does not support exec mode: {}",
            expected, version.exec_mode
        )));
    }
    Ok(())
}

/// Pull one backend section out of the version's exec config
pub fn require_section<'a, T>(
    version: &'a OperatorVersion,
    mode: ExecMode,
    select: impl FnOnce(&'a ExecConfig) -> Option<&'a T>,
) -> Result<&'a T, ExecutorError> {
    ensure_mode(version, mode)?;
    select(&version.exec_config).ok_or_else(|| ExecutorError::missing(format!("{} exec config is required", mode)))
}

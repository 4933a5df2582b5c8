/// CLI operator backend
///
/// Runs a local command, writes the operator input to its stdin as JSON and
/// reads operator output from stdout. The child is killed when the timeout
/// fires or the calling future is dropped.

use crate::backends::timeout_or;
use crate::error::ExecutorError;
use crate::operator::{CliExecConfig, ExecMode, OperatorInput, OperatorOutput, OperatorVersion};
use crate::runtime::executor::{require_section, OperatorExecutor};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct CliExecutor {
    default_timeout: Duration,
}

impl CliExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn config(version: &OperatorVersion) -> Result<&CliExecConfig, ExecutorError> {
        let config = require_section(version, ExecMode::Cli, |c| c.cli.as_ref())?;
        if config.command.trim().is_empty() {
            return Err(ExecutorError::missing("cli command is required"));
        }
        Ok(config)
    }
}

#[async_trait]
impl OperatorExecutor for CliExecutor {
    async fn execute(&self, version: &OperatorVersion, input: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
        let config = Self::config(version)?;
        let payload = serde_json::to_vec(input)
            .map_err(|err| ExecutorError::execution(format!("failed to encode input: {}", err)))?;

        let mut command = Command::new(config.command.trim());
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !config.work_dir.trim().is_empty() {
            command.current_dir(config.work_dir.trim());
        }

        tracing::debug!("🖥️ CLI operator call: {} {:?}", config.command, config.args);
        let mut child = command
            .spawn()
            .map_err(|err| ExecutorError::execution(format!("failed to start '{}': {}", config.command, err)))?;

        // Commands that never read stdin close the pipe early; that is not a failure
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(&payload).await {
                    tracing::debug!("CLI stdin closed early: {}", err);
                }
            });
        }

        let timeout = timeout_or(config.timeout_sec, self.default_timeout);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutorError::Timeout(timeout))?
            .map_err(|err| ExecutorError::execution(format!("failed to wait for '{}': {}", config.command, err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::execution(format!(
                "cli command failed: {}, stderr: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(OperatorOutput::default());
        }
        serde_json::from_str(stdout)
            .map_err(|err| ExecutorError::execution(format!("failed to parse cli output: {}", err)))
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Cli
    }

    async fn health_check(&self, version: &OperatorVersion) -> Result<(), ExecutorError> {
        Self::config(version).map(|_| ())
    }
}

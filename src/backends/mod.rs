/// Operator Backends
///
/// Concrete `OperatorExecutor` implementations, one per execution mode:
/// - HTTP: POST the operator input as JSON to a service endpoint
/// - CLI: pipe the input to a local command over stdin
/// - MCP: call a tool on a JSON-RPC tool server
/// - AI model: chat completion against a managed model

use crate::config::ExecutorConfig;
use crate::runtime::ExecutorRegistry;
use std::{sync::Arc, time::Duration};

// HTTP service calls via reqwest
pub mod http;

// Local process execution via tokio::process
pub mod cli;

// Tool-server calls over JSON-RPC
pub mod mcp;

// Chat completion against a model catalog
pub mod ai_model;

// Chat provider wire formats (OpenAI-compatible, Anthropic, Ollama)
pub mod providers;

pub use ai_model::{AiModel, AiModelCatalog, AiModelExecutor, AiProviderKind, InMemoryAiModelCatalog};
pub use cli::CliExecutor;
pub use http::HttpExecutor;
pub use mcp::{HttpMcpClient, McpClient, McpExecutor, McpTool};

/// Registry with every built-in backend registered
pub fn default_registry(config: &ExecutorConfig, catalog: Arc<dyn AiModelCatalog>) -> ExecutorRegistry {
    let mcp_client = Arc::new(HttpMcpClient::new(config.mcp_servers.clone()));
    ExecutorRegistry::new()
        .with(Arc::new(HttpExecutor::new(Duration::from_secs(config.http_timeout_secs))))
        .with(Arc::new(CliExecutor::new(Duration::from_secs(config.cli_timeout_secs))))
        .with(Arc::new(McpExecutor::new(mcp_client)))
        .with(Arc::new(AiModelExecutor::new(catalog, Duration::from_secs(config.ai_timeout_secs))))
}

/// Per-version timeout when set, the backend default otherwise
pub(crate) fn timeout_or(secs: u64, default: Duration) -> Duration {
    if secs > 0 {
        Duration::from_secs(secs)
    } else {
        default
    }
}

/// MCP operator backend
///
/// Invokes a named tool on a tool server. The transport sits behind the
/// `McpClient` trait; `HttpMcpClient` speaks JSON-RPC 2.0 over HTTP POST to
/// servers configured by id.

use crate::error::ExecutorError;
use crate::operator::{ExecMode, McpExecConfig, OperatorInput, OperatorOutput, OperatorVersion};
use crate::runtime::executor::{require_section, OperatorExecutor};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tool advertised by a server's `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self, server_id: &str) -> Result<Vec<McpTool>, ExecutorError>;

    /// Call `tool` with `args`; returns the tool's structured result
    async fn call_tool(
        &self,
        server_id: &str,
        tool: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ExecutorError>;

    async fn health_check(&self, server_id: &str) -> Result<(), ExecutorError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP
pub struct HttpMcpClient {
    client: Client,
    /// server id -> endpoint URL
    servers: HashMap<String, String>,
    next_id: AtomicU64,
}

impl HttpMcpClient {
    pub fn new(servers: HashMap<String, String>) -> Self {
        Self {
            client: Client::new(),
            servers,
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc(&self, server_id: &str, method: &str, params: Value) -> Result<Value, ExecutorError> {
        let url = self
            .servers
            .get(server_id)
            .ok_or_else(|| ExecutorError::missing(format!("unknown mcp server: {}", server_id)))?;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: JsonRpcResponse = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ExecutorError::execution(format!(
                "mcp error {} from {}: {}",
                error.code, server_id, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| ExecutorError::execution("mcp response carries neither result nor error"))
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    async fn list_tools(&self, server_id: &str) -> Result<Vec<McpTool>, ExecutorError> {
        let result = self.rpc(server_id, "tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(tools)
            .map_err(|err| ExecutorError::execution(format!("invalid tools/list result: {}", err)))
    }

    async fn call_tool(
        &self,
        server_id: &str,
        tool: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ExecutorError> {
        let result = self
            .rpc(server_id, "tools/call", json!({"name": tool, "arguments": args}))
            .await?;
        tool_result(result)
    }

    async fn health_check(&self, server_id: &str) -> Result<(), ExecutorError> {
        self.rpc(server_id, "ping", json!({})).await.map(|_| ())
    }
}

/// Extract the payload of a `tools/call` result
///
/// Prefers `structuredContent`; otherwise the first text block, parsed as a
/// JSON object when possible.
fn tool_result(result: Value) -> Result<Map<String, Value>, ExecutorError> {
    let first_text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        })
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ExecutorError::execution(format!(
            "mcp tool reported an error: {}",
            first_text.unwrap_or_default()
        )));
    }
    if let Some(Value::Object(structured)) = result.get("structuredContent") {
        return Ok(structured.clone());
    }
    match first_text {
        Some(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(parsed)) => Ok(parsed),
            _ => {
                let mut wrapped = Map::new();
                wrapped.insert("content".into(), Value::String(text));
                Ok(wrapped)
            }
        },
        None => Ok(Map::new()),
    }
}

pub struct McpExecutor {
    client: Arc<dyn McpClient>,
}

impl McpExecutor {
    pub fn new(client: Arc<dyn McpClient>) -> Self {
        Self { client }
    }

    fn config(version: &OperatorVersion) -> Result<&McpExecConfig, ExecutorError> {
        let config = require_section(version, ExecMode::Mcp, |c| c.mcp.as_ref())?;
        if config.server_id.trim().is_empty() || config.tool_name.trim().is_empty() {
            return Err(ExecutorError::missing("mcp server_id and tool_name are required"));
        }
        Ok(config)
    }
}

#[async_trait]
impl OperatorExecutor for McpExecutor {
    async fn execute(&self, version: &OperatorVersion, input: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
        let config = Self::config(version)?;

        let mut args = input.params.clone();
        if let Some(asset_id) = input.asset_id {
            args.insert("asset_id".into(), json!(asset_id.to_string()));
        }

        tracing::debug!("🧰 MCP tool call: {}/{}", config.server_id, config.tool_name);
        let call = self.client.call_tool(&config.server_id, &config.tool_name, args);
        let result = match config.timeout_sec {
            0 => call.await?,
            secs => {
                let limit = Duration::from_secs(secs);
                tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| ExecutorError::Timeout(limit))??
            }
        };

        if result.is_empty() {
            return Ok(OperatorOutput::default());
        }
        // Non-standard results are kept verbatim as diagnostics
        match serde_json::from_value::<OperatorOutput>(Value::Object(result.clone())) {
            Ok(output) if !output.is_empty() => Ok(output),
            _ => Ok(OperatorOutput {
                diagnostics: result,
                ..Default::default()
            }),
        }
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Mcp
    }

    async fn health_check(&self, version: &OperatorVersion) -> Result<(), ExecutorError> {
        let config = Self::config(version)?;
        self.client
            .health_check(&config.server_id)
            .await
            .map_err(|err| ExecutorError::execution(format!("mcp server health check failed: {}", err)))?;

        let tools = self.client.list_tools(&config.server_id).await?;
        if tools.iter().any(|tool| tool.name == config.tool_name) {
            Ok(())
        } else {
            Err(ExecutorError::execution(format!(
                "mcp tool {} not found on server {}",
                config.tool_name, config.server_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{ExecConfig, VersionStatus};
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// Records the last call and replies with a canned result
    struct CannedClient {
        reply: Map<String, Value>,
        last_args: Mutex<Option<Map<String, Value>>>,
    }

    #[async_trait]
    impl McpClient for CannedClient {
        async fn list_tools(&self, _: &str) -> Result<Vec<McpTool>, ExecutorError> {
            Ok(vec![McpTool {
                name: "detect".into(),
                description: String::new(),
                input_schema: Value::Null,
            }])
        }

        async fn call_tool(&self, _: &str, _: &str, args: Map<String, Value>) -> Result<Map<String, Value>, ExecutorError> {
            *self.last_args.lock() = Some(args);
            Ok(self.reply.clone())
        }

        async fn health_check(&self, _: &str) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn client(reply: Value) -> Arc<CannedClient> {
        let reply = match reply {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Arc::new(CannedClient {
            reply,
            last_args: Mutex::new(None),
        })
    }

    fn version(server_id: &str, tool_name: &str) -> OperatorVersion {
        OperatorVersion {
            id: Uuid::new_v4(),
            operator_id: Uuid::new_v4(),
            version: "1.0.0".into(),
            exec_mode: ExecMode::Mcp,
            exec_config: ExecConfig {
                mcp: Some(McpExecConfig {
                    server_id: server_id.into(),
                    tool_name: tool_name.into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            status: VersionStatus::Active,
        }
    }

    #[tokio::test]
    async fn standard_results_pass_through_with_asset_arg() {
        let canned = client(json!({"results": [{"type": "label", "data": "cat", "confidence": 0.9}]}));
        let executor = McpExecutor::new(canned.clone());
        let asset = Uuid::new_v4();
        let input = OperatorInput {
            asset_id: Some(asset),
            params: Map::new(),
        };

        let output = executor.execute(&version("vision", "detect"), &input).await.unwrap();
        assert_eq!(output.results.len(), 1);
        let args = canned.last_args.lock().clone().unwrap();
        assert_eq!(args["asset_id"], json!(asset.to_string()));
    }

    #[tokio::test]
    async fn non_standard_results_land_in_diagnostics() {
        let executor = McpExecutor::new(client(json!({"score": 3})));
        let output = executor
            .execute(&version("vision", "detect"), &OperatorInput::default())
            .await
            .unwrap();
        assert!(output.results.is_empty());
        assert_eq!(output.diagnostics["score"], json!(3));
    }

    #[tokio::test]
    async fn requires_server_and_tool() {
        let executor = McpExecutor::new(client(json!({})));
        let err = executor.execute(&version("", "detect"), &OperatorInput::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "mcp server_id and tool_name are required");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn health_check_requires_listed_tool() {
        let executor = McpExecutor::new(client(json!({})));
        assert!(executor.health_check(&version("vision", "detect")).await.is_ok());
        let err = executor.health_check(&version("vision", "ocr")).await.unwrap_err();
        assert_eq!(err.to_string(), "mcp tool ocr not found on server vision");
    }

    #[test]
    fn tool_result_prefers_structured_content() {
        let result = tool_result(json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"results": []}
        }))
        .unwrap();
        assert!(result.contains_key("results"));

        let parsed = tool_result(json!({"content": [{"type": "text", "text": "{\"a\": 1}"}]})).unwrap();
        assert_eq!(parsed["a"], json!(1));

        let plain = tool_result(json!({"content": [{"type": "text", "text": "hello"}]})).unwrap();
        assert_eq!(plain["content"], json!("hello"));

        let err = tool_result(json!({"isError": true, "content": [{"type": "text", "text": "bad args"}]})).unwrap_err();
        assert!(err.to_string().contains("bad args"));
    }

    #[tokio::test]
    async fn unknown_server_is_a_config_error() {
        let client = HttpMcpClient::new(HashMap::new());
        let err = client.list_tools("nowhere").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}

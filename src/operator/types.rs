/// Operator type definitions
///
/// These types are serialized to JSON for persistence and for the wire format
/// exchanged with HTTP, CLI and MCP backends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A registered operator with its currently active version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    /// Stable code (e.g., "object_detection")
    pub code: String,
    pub name: String,
    /// Version the engine executes; nodes bound to an operator without one fail
    #[serde(default)]
    pub active_version: Option<OperatorVersion>,
}

/// One concrete, executable configuration of an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorVersion {
    pub id: Uuid,
    pub operator_id: Uuid,
    /// Semantic version label (e.g., "1.2.0")
    pub version: String,
    pub exec_mode: ExecMode,
    #[serde(default)]
    pub exec_config: ExecConfig,
    #[serde(default = "VersionStatus::active")]
    pub status: VersionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Testing,
    Active,
    Archived,
}

impl VersionStatus {
    fn active() -> Self {
        Self::Active
    }
}

/// Execution backend tag used to route a version to its executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Http,
    Cli,
    Mcp,
    AiModel,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Cli => "cli",
            Self::Mcp => "mcp",
            Self::AiModel => "ai_model",
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific configuration; only the section matching `exec_mode` is read
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpExecConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliExecConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpExecConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<AiModelExecConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpExecConfig {
    pub endpoint: String,
    /// HTTP verb, POST when empty
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_sec: u64,
    /// One of "bearer", "basic", "api_key"
    #[serde(default)]
    pub auth_type: String,
    #[serde(default)]
    pub auth_config: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliExecConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpExecConfig {
    pub server_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_version: String,
    #[serde(default)]
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiModelExecConfig {
    pub model_id: Uuid,
    /// "chat" or "vision"
    #[serde(default)]
    pub interaction_mode: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt_template: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub response_format: String,
    #[serde(default)]
    pub timeout_sec: u64,
    /// When non-empty, JSON responses are parsed into structured result data
    #[serde(default)]
    pub output_mapping: HashMap<String, Value>,
}

/// Structured input handed to an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<Uuid>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Structured output returned by an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_assets: Vec<OutputAsset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub diagnostics: Map<String, Value>,
}

impl OperatorOutput {
    pub fn is_empty(&self) -> bool {
        self.output_assets.is_empty()
            && self.results.is_empty()
            && self.timeline.is_empty()
            && self.diagnostics.is_empty()
    }
}

/// A produced media/file reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAsset {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Structured analysis data with a type tag and confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub confidence: f64,
}

/// A time-bounded event (seconds from media start)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub start: f64,
    pub end: f64,
    pub event_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// AI model operator backend
///
/// Resolves the configured model from a catalog, renders the prompt templates
/// with minijinja over `{asset_id, params}`, sends one chat request to the
/// model's provider and maps the reply to an `ai_response` result.

use crate::backends::providers::{
    AnthropicProvider, ChatMessage, ChatProvider, ChatRequest, ChatResponse, OllamaProvider, OpenAiCompatProvider,
};
use crate::backends::timeout_or;
use crate::error::ExecutorError;
use crate::operator::{AiModelExecConfig, AnalysisResult, ExecMode, OperatorInput, OperatorOutput, OperatorVersion};
use crate::runtime::executor::{require_section, OperatorExecutor};
use async_trait::async_trait;
use minijinja::Environment;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
    Local,
    Custom,
}

impl AiProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Local => "local",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AiProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiModel {
    pub id: Uuid,
    pub name: String,
    pub provider: AiProviderKind,
    /// API root, e.g. "https://api.openai.com"
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Source of model definitions
#[async_trait]
pub trait AiModelCatalog: Send + Sync {
    async fn get_model(&self, id: Uuid) -> Result<AiModel, ExecutorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAiModelCatalog {
    models: RwLock<HashMap<Uuid, AiModel>>,
}

impl InMemoryAiModelCatalog {
    pub fn new(models: impl IntoIterator<Item = AiModel>) -> Self {
        Self {
            models: RwLock::new(models.into_iter().map(|m| (m.id, m)).collect()),
        }
    }

    pub fn insert(&self, model: AiModel) {
        self.models.write().insert(model.id, model);
    }
}

#[async_trait]
impl AiModelCatalog for InMemoryAiModelCatalog {
    async fn get_model(&self, id: Uuid) -> Result<AiModel, ExecutorError> {
        self.models
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ExecutorError::missing(format!("failed to resolve AI model: {}", id)))
    }
}

pub struct AiModelExecutor {
    catalog: Arc<dyn AiModelCatalog>,
    providers: HashMap<AiProviderKind, Arc<dyn ChatProvider>>,
    default_timeout: Duration,
}

impl AiModelExecutor {
    pub fn new(catalog: Arc<dyn AiModelCatalog>, default_timeout: Duration) -> Self {
        let openai: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatProvider::new());
        let providers = HashMap::from([
            (AiProviderKind::OpenAi, Arc::clone(&openai)),
            (AiProviderKind::Local, Arc::clone(&openai)),
            (AiProviderKind::Custom, openai),
            (AiProviderKind::Anthropic, Arc::new(AnthropicProvider::new()) as Arc<dyn ChatProvider>),
            (AiProviderKind::Ollama, Arc::new(OllamaProvider::new()) as Arc<dyn ChatProvider>),
        ]);
        Self {
            catalog,
            providers,
            default_timeout,
        }
    }

    /// Replace the provider serving `kind`
    pub fn with_provider(mut self, kind: AiProviderKind, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    async fn resolve(&self, config: &AiModelExecConfig) -> Result<(AiModel, Arc<dyn ChatProvider>), ExecutorError> {
        let model = self.catalog.get_model(config.model_id).await?;
        let provider = self
            .providers
            .get(&model.provider)
            .cloned()
            .ok_or_else(|| ExecutorError::missing(format!("unsupported AI provider: {}", model.provider)))?;
        Ok((model, provider))
    }
}

/// Render a prompt template; an empty template renders to an empty string
pub fn render_prompt(template: &str, asset_id: Option<Uuid>, params: &Map<String, Value>) -> Result<String, ExecutorError> {
    if template.is_empty() {
        return Ok(String::new());
    }
    let context = json!({
        "asset_id": asset_id.map(|id| id.to_string()).unwrap_or_default(),
        "params": params,
    });
    Environment::new()
        .render_str(template, context)
        .map_err(|err| ExecutorError::missing(format!("invalid prompt template: {}", err)))
}

fn build_messages(config: &AiModelExecConfig, system: String, user: String, params: &Map<String, Value>) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if !system.is_empty() {
        messages.push(ChatMessage::text("system", system));
    }

    if config.interaction_mode == "vision" {
        let mut parts = vec![json!({"type": "text", "text": user})];
        if let Some(image) = params.get("image_url") {
            let url = match image {
                Value::String(url) => url.clone(),
                other => other.to_string(),
            };
            parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: Value::Array(parts),
        });
    } else {
        messages.push(ChatMessage::text("user", user));
    }
    messages
}

/// JSON object replies become structured data when an output mapping is configured
fn map_response(response: &ChatResponse, output_mapping: &HashMap<String, Value>) -> OperatorOutput {
    let data = match serde_json::from_str::<Value>(&response.content) {
        Ok(parsed @ Value::Object(_)) if !output_mapping.is_empty() => parsed,
        _ => json!({"content": response.content}),
    };
    OperatorOutput {
        results: vec![AnalysisResult {
            kind: "ai_response".into(),
            data,
            confidence: 0.0,
        }],
        ..Default::default()
    }
}

#[async_trait]
impl OperatorExecutor for AiModelExecutor {
    async fn execute(&self, version: &OperatorVersion, input: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
        let config = require_section(version, ExecMode::AiModel, |c| c.ai_model.as_ref())?;
        let (model, provider) = self.resolve(config).await?;
        if !model.active {
            return Err(ExecutorError::missing(format!("AI model {} is disabled", model.name)));
        }

        let system = render_prompt(&config.system_prompt, input.asset_id, &input.params)?;
        let user = render_prompt(&config.user_prompt_template, input.asset_id, &input.params)?;
        let request = ChatRequest {
            messages: build_messages(config, system, user, &input.params),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            response_format: config.response_format.clone(),
        };

        tracing::debug!("🤖 AI model call: {} via {}", model.model_name, model.provider);
        let timeout = timeout_or(config.timeout_sec, self.default_timeout);
        let response = tokio::time::timeout(timeout, provider.chat(&model, &request))
            .await
            .map_err(|_| ExecutorError::Timeout(timeout))??;

        let mut output = map_response(&response, &config.output_mapping);
        output.diagnostics.insert("tokens_used".into(), json!(response.tokens_used));
        output.diagnostics.insert("model".into(), json!(response.model));
        output.diagnostics.insert("provider".into(), json!(model.provider.as_str()));
        Ok(output)
    }

    fn mode(&self) -> ExecMode {
        ExecMode::AiModel
    }

    async fn health_check(&self, version: &OperatorVersion) -> Result<(), ExecutorError> {
        let config = require_section(version, ExecMode::AiModel, |c| c.ai_model.as_ref())?;
        let (model, provider) = self.resolve(config).await?;
        provider.health_check(&model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{ExecConfig, VersionStatus};
    use parking_lot::Mutex;

    /// Echoes a fixed reply and keeps the last request
    struct ScriptedProvider {
        reply: String,
        seen: Mutex<Option<ChatRequest>>,
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn chat(&self, model: &AiModel, request: &ChatRequest) -> Result<ChatResponse, ExecutorError> {
            *self.seen.lock() = Some(request.clone());
            Ok(ChatResponse {
                content: self.reply.clone(),
                tokens_used: 42,
                model: model.model_name.clone(),
            })
        }

        async fn health_check(&self, _: &AiModel) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn model(active: bool) -> AiModel {
        AiModel {
            id: Uuid::new_v4(),
            name: "captioner".into(),
            provider: AiProviderKind::Ollama,
            base_url: "http://localhost:11434".into(),
            api_key: String::new(),
            model_name: "llava".into(),
            active,
        }
    }

    fn version(config: AiModelExecConfig) -> OperatorVersion {
        OperatorVersion {
            id: Uuid::new_v4(),
            operator_id: Uuid::new_v4(),
            version: "1.0.0".into(),
            exec_mode: ExecMode::AiModel,
            exec_config: ExecConfig {
                ai_model: Some(config),
                ..Default::default()
            },
            status: VersionStatus::Active,
        }
    }

    fn setup(model: AiModel, reply: &str) -> (AiModelExecutor, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider {
            reply: reply.into(),
            seen: Mutex::new(None),
        });
        let catalog = Arc::new(InMemoryAiModelCatalog::new([model]));
        let executor = AiModelExecutor::new(catalog, Duration::from_secs(5))
            .with_provider(AiProviderKind::Ollama, provider.clone());
        (executor, provider)
    }

    #[test]
    fn renders_asset_and_params() {
        let mut params = Map::new();
        params.insert("lang".into(), json!("en"));
        let asset = Uuid::new_v4();
        let rendered = render_prompt("Describe {{ asset_id }} in {{ params.lang }}", Some(asset), &params).unwrap();
        assert_eq!(rendered, format!("Describe {} in en", asset));
        assert_eq!(render_prompt("", None, &params).unwrap(), "");
        assert!(render_prompt("{{ broken", None, &params).is_err());
    }

    #[tokio::test]
    async fn vision_request_with_json_mapping() {
        let m = model(true);
        let (executor, provider) = setup(m.clone(), r#"{"caption": "a cat"}"#);
        let v = version(AiModelExecConfig {
            model_id: m.id,
            interaction_mode: "vision".into(),
            system_prompt: "You caption images.".into(),
            user_prompt_template: "Caption in {{ params.lang }}".into(),
            output_mapping: HashMap::from([("caption".to_string(), json!("caption"))]),
            ..Default::default()
        });
        let mut input = OperatorInput::default();
        input.params.insert("lang".into(), json!("en"));
        input.params.insert("image_url".into(), json!("http://img/1.png"));

        let output = executor.execute(&v, &input).await.unwrap();
        assert_eq!(output.results[0].kind, "ai_response");
        assert_eq!(output.results[0].data, json!({"caption": "a cat"}));
        assert_eq!(output.diagnostics["tokens_used"], json!(42));
        assert_eq!(output.diagnostics["provider"], json!("ollama"));

        let seen = provider.seen.lock().clone().unwrap();
        assert_eq!(seen.messages.len(), 2);
        assert_eq!(seen.messages[1].content[0]["text"], json!("Caption in en"));
        assert_eq!(seen.messages[1].content[1]["image_url"]["url"], json!("http://img/1.png"));
    }

    #[tokio::test]
    async fn plain_reply_without_mapping_is_wrapped() {
        let m = model(true);
        let (executor, _) = setup(m.clone(), r#"{"caption": "ignored structure"}"#);
        let v = version(AiModelExecConfig {
            model_id: m.id,
            user_prompt_template: "hi".into(),
            ..Default::default()
        });
        let output = executor.execute(&v, &OperatorInput::default()).await.unwrap();
        assert_eq!(output.results[0].data, json!({"content": r#"{"caption": "ignored structure"}"#}));
    }

    #[tokio::test]
    async fn disabled_or_unknown_model_is_a_config_error() {
        let m = model(false);
        let (executor, _) = setup(m.clone(), "");
        let err = executor
            .execute(&version(AiModelExecConfig { model_id: m.id, ..Default::default() }), &OperatorInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "AI model captioner is disabled");
        assert!(!err.is_retryable());

        let err = executor
            .execute(&version(AiModelExecConfig::default()), &OperatorInput::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to resolve AI model"));
    }
}

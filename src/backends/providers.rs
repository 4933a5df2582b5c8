/// Chat provider wire formats
///
/// Each provider turns a unified `ChatRequest` into one vendor API call and
/// normalizes the reply. The OpenAI-compatible provider also serves local and
/// custom deployments that expose the same API.

use crate::backends::ai_model::AiModel;
use crate::error::ExecutorError;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    /// Plain text, or an array of content parts for vision requests
    pub content: Value,
}

impl ChatMessage {
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(text.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    /// "json" asks the provider for a JSON object reply
    pub response_format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, model: &AiModel, request: &ChatRequest) -> Result<ChatResponse, ExecutorError>;

    async fn health_check(&self, model: &AiModel) -> Result<(), ExecutorError>;
}

fn endpoint(model: &AiModel, path: &str) -> String {
    format!("{}{}", model.base_url.trim_end_matches('/'), path)
}

async fn read_json(response: Response) -> Result<Value, ExecutorError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ExecutorError::execution(format!("API returned status {}: {}", status.as_u16(), body)));
    }
    serde_json::from_str(&body).map_err(|err| ExecutorError::execution(format!("failed to parse response: {}", err)))
}

async fn ensure_healthy(response: Response) -> Result<(), ExecutorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ExecutorError::execution(format!(
        "health check returned status {}: {}",
        status.as_u16(),
        body
    )))
}

/// OpenAI chat completions API and compatible servers
pub struct OpenAiCompatProvider {
    client: Client,
    chat_path: &'static str,
    health_path: &'static str,
}

impl OpenAiCompatProvider {
    pub fn new() -> Self {
        Self::with_paths("/v1/chat/completions", "/v1/models")
    }

    pub fn with_paths(chat_path: &'static str, health_path: &'static str) -> Self {
        Self {
            client: Client::new(),
            chat_path,
            health_path,
        }
    }

    fn body(model: &AiModel, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": model.model_name,
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if request.response_format == "json" {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

impl Default for OpenAiCompatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn chat(&self, model: &AiModel, request: &ChatRequest) -> Result<ChatResponse, ExecutorError> {
        let mut http = self
            .client
            .post(endpoint(model, self.chat_path))
            .json(&Self::body(model, request));
        if !model.api_key.is_empty() {
            http = http.bearer_auth(&model.api_key);
        }
        let reply = read_json(http.send().await?).await?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ExecutorError::execution("no choices in response"))?;
        Ok(ChatResponse {
            content: content.to_string(),
            tokens_used: reply["usage"]["total_tokens"].as_u64().unwrap_or(0),
            model: reply["model"].as_str().unwrap_or(&model.model_name).to_string(),
        })
    }

    async fn health_check(&self, model: &AiModel) -> Result<(), ExecutorError> {
        let mut http = self.client.get(endpoint(model, self.health_path));
        if !model.api_key.is_empty() {
            http = http.bearer_auth(&model.api_key);
        }
        ensure_healthy(http.send().await?).await
    }
}

/// Anthropic messages API
pub struct AnthropicProvider {
    client: Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    /// System messages move to the top-level `system` field
    fn body(model: &AiModel, request: &ChatRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .filter_map(|m| m.content.as_str())
            .collect();
        let messages: Vec<&ChatMessage> = request.messages.iter().filter(|m| m.role != "system").collect();

        let mut body = json!({
            "model": model.model_name,
            "messages": messages,
            "max_tokens": request.max_tokens.filter(|n| *n > 0).unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        body
    }

    fn post(&self, model: &AiModel, body: &Value) -> reqwest::RequestBuilder {
        let mut http = self
            .client
            .post(endpoint(model, "/v1/messages"))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if !model.api_key.is_empty() {
            http = http.header("x-api-key", &model.api_key);
        }
        http
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn chat(&self, model: &AiModel, request: &ChatRequest) -> Result<ChatResponse, ExecutorError> {
        let reply = read_json(self.post(model, &Self::body(model, request)).send().await?).await?;

        let content: String = reply["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        let usage = &reply["usage"];
        Ok(ChatResponse {
            content,
            tokens_used: usage["input_tokens"].as_u64().unwrap_or(0) + usage["output_tokens"].as_u64().unwrap_or(0),
            model: reply["model"].as_str().unwrap_or(&model.model_name).to_string(),
        })
    }

    async fn health_check(&self, model: &AiModel) -> Result<(), ExecutorError> {
        let ping = json!({
            "model": model.model_name,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 1,
        });
        ensure_healthy(self.post(model, &ping).send().await?).await
    }
}

/// Ollama chat API
pub struct OllamaProvider {
    client: Client,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    fn body(model: &AiModel, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": model.model_name,
            "messages": request.messages,
            "stream": false,
        });
        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".into(), json!(top_p));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        if request.response_format == "json" {
            body["format"] = json!("json");
        }
        body
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn chat(&self, model: &AiModel, request: &ChatRequest) -> Result<ChatResponse, ExecutorError> {
        let http = self
            .client
            .post(endpoint(model, "/api/chat"))
            .json(&Self::body(model, request));
        let reply = read_json(http.send().await?).await?;

        Ok(ChatResponse {
            content: reply["message"]["content"].as_str().unwrap_or_default().to_string(),
            tokens_used: reply["prompt_eval_count"].as_u64().unwrap_or(0) + reply["eval_count"].as_u64().unwrap_or(0),
            model: reply["model"].as_str().unwrap_or(&model.model_name).to_string(),
        })
    }

    async fn health_check(&self, model: &AiModel) -> Result<(), ExecutorError> {
        ensure_healthy(self.client.get(endpoint(model, "/api/tags")).send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ai_model::AiProviderKind;
    use uuid::Uuid;

    fn model() -> AiModel {
        AiModel {
            id: Uuid::new_v4(),
            name: "vision".into(),
            provider: AiProviderKind::Anthropic,
            base_url: "http://localhost:8080/".into(),
            api_key: String::new(),
            model_name: "claude-test".into(),
            active: true,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::text("system", "be brief"), ChatMessage::text("user", "hi")],
            temperature: Some(0.2),
            max_tokens: None,
            top_p: None,
            response_format: "json".into(),
        }
    }

    #[test]
    fn anthropic_lifts_system_prompt() {
        let body = AnthropicProvider::body(&model(), &request());
        assert_eq!(body["system"], json!("be brief"));
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
        assert_eq!(body["max_tokens"], json!(ANTHROPIC_DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn openai_requests_json_object_format() {
        let body = OpenAiCompatProvider::body(&model(), &request());
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn ollama_collects_options() {
        let body = OllamaProvider::body(&model(), &request());
        assert_eq!(body["options"], json!({"temperature": 0.2}));
        assert_eq!(body["format"], json!("json"));
        assert_eq!(body["stream"], json!(false));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(endpoint(&model(), "/api/chat"), "http://localhost:8080/api/chat");
    }
}

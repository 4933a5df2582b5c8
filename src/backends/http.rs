/// HTTP operator backend
///
/// Sends the operator input as the JSON body of a request to the configured
/// endpoint and parses the response body as operator output.

use crate::backends::timeout_or;
use crate::error::ExecutorError;
use crate::operator::{ExecMode, HttpExecConfig, OperatorInput, OperatorOutput, OperatorVersion};
use crate::runtime::executor::{require_section, OperatorExecutor};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;

pub struct HttpExecutor {
    client: Client,
    default_timeout: Duration,
}

impl HttpExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            default_timeout,
        }
    }

    fn config(version: &OperatorVersion) -> Result<&HttpExecConfig, ExecutorError> {
        let config = require_section(version, ExecMode::Http, |c| c.http.as_ref())?;
        if config.endpoint.trim().is_empty() {
            return Err(ExecutorError::missing("http endpoint is required"));
        }
        reqwest::Url::parse(config.endpoint.trim())
            .map_err(|err| ExecutorError::missing(format!("invalid http endpoint '{}': {}", config.endpoint, err)))?;
        Ok(config)
    }

    /// Build the full request; fails on any configuration problem
    fn request(&self, config: &HttpExecConfig, input: &OperatorInput) -> Result<(RequestBuilder, Duration), ExecutorError> {
        let method = match config.method.trim() {
            "" => Method::POST,
            raw => Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
                .map_err(|_| ExecutorError::missing(format!("invalid http method: {}", raw)))?,
        };
        let timeout = timeout_or(config.timeout_sec, self.default_timeout);

        let mut request = self
            .client
            .request(method, config.endpoint.trim())
            .timeout(timeout)
            .json(input);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        Ok((apply_auth(request, config)?, timeout))
    }
}

fn auth_value<'a>(config: &'a HttpExecConfig, key: &str) -> Result<&'a str, ExecutorError> {
    config
        .auth_config
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ExecutorError::missing(format!("http {} auth requires '{}'", config.auth_type, key)))
}

fn apply_auth(request: RequestBuilder, config: &HttpExecConfig) -> Result<RequestBuilder, ExecutorError> {
    match config.auth_type.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(request),
        "bearer" => Ok(request.bearer_auth(auth_value(config, "token")?)),
        "basic" => Ok(request.basic_auth(auth_value(config, "username")?, config.auth_config.get("password"))),
        "api_key" => {
            let header = config
                .auth_config
                .get("header")
                .map(String::as_str)
                .filter(|h| !h.is_empty())
                .unwrap_or("X-API-Key");
            Ok(request.header(header, auth_value(config, "key")?))
        }
        other => Err(ExecutorError::missing(format!("unsupported http auth type: {}", other))),
    }
}

#[async_trait]
impl OperatorExecutor for HttpExecutor {
    async fn execute(&self, version: &OperatorVersion, input: &OperatorInput) -> Result<OperatorOutput, ExecutorError> {
        let config = Self::config(version)?;
        let (request, timeout) = self.request(config, input)?;
        tracing::debug!("🌐 HTTP operator call: {}", config.endpoint);

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ExecutorError::Timeout(timeout)
            } else {
                ExecutorError::Transport(err)
            }
        })?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ExecutorError::execution(format!(
                "operator returned status {}: {}",
                status.as_u16(),
                body
            )));
        }
        if body.trim().is_empty() {
            return Ok(OperatorOutput::default());
        }
        serde_json::from_str(&body)
            .map_err(|err| ExecutorError::execution(format!("failed to parse operator output: {}", err)))
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Http
    }

    async fn health_check(&self, version: &OperatorVersion) -> Result<(), ExecutorError> {
        let config = Self::config(version)?;
        self.request(config, &OperatorInput::default()).map(|_| ())
    }
}

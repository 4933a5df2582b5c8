/// Configuration management for opflow
///
/// Handles database location, engine retry/backoff tuning, context store
/// cadence and backend defaults. Every value can be overridden from the
/// environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Scheduler and context store tuning
    pub engine: EngineConfig,
    /// Operator backend defaults
    pub executors: ExecutorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g., "sqlite://opflow.db", "sqlite::memory:")
    pub url: String,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base of the exponential backoff between node attempts: base * 2^attempt
    pub retry_backoff_ms: u64,
    /// Attempts for engine-side context patches before giving up on conflicts
    pub context_patch_attempts: u32,
    /// Base backoff between conflicting context patch attempts
    pub context_backoff_ms: u64,
    /// Take a periodic context snapshot every N versions
    pub snapshot_interval: i64,
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn context_backoff(&self) -> Duration {
        Duration::from_millis(self.context_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: env_or("OPFLOW_RETRY_BACKOFF_MS", 1000),
            context_patch_attempts: env_or("OPFLOW_CONTEXT_PATCH_ATTEMPTS", 8),
            context_backoff_ms: env_or("OPFLOW_CONTEXT_BACKOFF_MS", 10),
            snapshot_interval: env_or("OPFLOW_SNAPSHOT_INTERVAL", 20),
        }
    }
}

/// Backend defaults, applied when an operator version leaves them unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub http_timeout_secs: u64,
    pub cli_timeout_secs: u64,
    pub ai_timeout_secs: u64,
    /// MCP server id -> JSON-RPC endpoint URL
    pub mcp_servers: HashMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: env_or("OPFLOW_HTTP_TIMEOUT_SECS", 30),
            cli_timeout_secs: env_or("OPFLOW_CLI_TIMEOUT_SECS", 300),
            ai_timeout_secs: env_or("OPFLOW_AI_TIMEOUT_SECS", 120),
            mcp_servers: parse_server_map(&std::env::var("OPFLOW_MCP_SERVERS").unwrap_or_default()),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: std::env::var("OPFLOW_DB_URL")
                    .unwrap_or_else(|_| "sqlite://opflow.db".to_string()),
            },
            engine: EngineConfig::default(),
            executors: ExecutorConfig::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse "id=url,id2=url2"; malformed entries are skipped
fn parse_server_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, url) = entry.split_once('=')?;
            let (id, url) = (id.trim(), url.trim());
            if id.is_empty() || url.is_empty() {
                tracing::warn!("⚠️ Ignoring malformed MCP server entry: '{}'", entry);
                return None;
            }
            Some((id.to_string(), url.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mcp_server_map() {
        let servers = parse_server_map("vision=http://localhost:9000/rpc, ocr = http://ocr:80 ,broken,=x");
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["vision"], "http://localhost:9000/rpc");
        assert_eq!(servers["ocr"], "http://ocr:80");
    }

    #[test]
    fn empty_server_map() {
        assert!(parse_server_map("").is_empty());
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        assert_eq!(env_or("OPFLOW_TEST_UNSET_VARIABLE", 42u64), 42);
    }
}

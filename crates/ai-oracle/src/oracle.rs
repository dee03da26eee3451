use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::types::{OracleKind, OracleResponse};

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Call the oracle with a fully-built prompt. Returns `None` when every
    /// retry is exhausted or the response fails schema parsing — callers
    /// map that to `blocked_ai_no_score` (§4.7.4).
    async fn call_json(&self, prompt: &str, kind: OracleKind, symbol: &str) -> Option<OracleResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpOracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_wait: Duration,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787/v1/chat/completions".to_string(),
            api_key: None,
            model: "oracle-default".to_string(),
            timeout: Duration::from_secs(20),
            retry_count: 3,
            retry_wait: Duration::from_secs(2),
        }
    }
}

/// Strip a leading/trailing ``` fence (with or without a language tag)
/// before parsing JSON, per §4.9's "strip Markdown fences" requirement.
fn strip_markdown_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else { return trimmed };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// reqwest-backed oracle client, following the same client/base_url/timeout
/// shape as `ml-client`'s HTTP clients, with retry/timeout added per §4.9.
pub struct HttpOracle {
    client: reqwest::Client,
    config: HttpOracleConfig,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build oracle HTTP client");
        Self { client, config }
    }

    async fn attempt(&self, prompt: &str) -> Result<Value, String> {
        let mut request = self.client.post(&self.config.base_url).json(&serde_json::json!({
            "model": self.config.model,
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": "You are a strict trading engine. Output ONLY JSON." },
                { "role": "user", "content": prompt },
            ],
        }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.config.timeout, request.send())
            .await
            .map_err(|_| "timed out".to_string())?
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }

        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("");

        let cleaned = strip_markdown_fences(content);
        serde_json::from_str(cleaned).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn call_json(&self, prompt: &str, kind: OracleKind, symbol: &str) -> Option<OracleResponse> {
        let started = std::time::Instant::now();
        for attempt in 0..=self.config.retry_count {
            match self.attempt(prompt).await {
                Ok(value) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let id = Uuid::new_v4().to_string();
                    tracing::info!(symbol, kind = kind.as_str(), %id, latency_ms, "oracle call succeeded");
                    return Some(OracleResponse { id, latency_ms, value });
                }
                Err(reason) => {
                    tracing::warn!(symbol, kind = kind.as_str(), attempt, reason, "oracle call failed");
                    if attempt < self.config.retry_count {
                        tokio::time::sleep(self.config.retry_wait).await;
                    }
                }
            }
        }
        tracing::error!(symbol, kind = kind.as_str(), retries = self.config.retry_count, "oracle retries exhausted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json_with_language_tag() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_markdown_fences(raw), "{\"a\":1}");
    }

    #[test]
    fn strips_fenced_json_without_language_tag() {
        let raw = "```\n{\"a\":1}\n```";
        assert_eq!(strip_markdown_fences(raw), "{\"a\":1}");
    }

    #[test]
    fn leaves_unfenced_json_untouched() {
        let raw = "{\"a\":1}";
        assert_eq!(strip_markdown_fences(raw), "{\"a\":1}");
    }
}

pub mod fallback;

// ── LLM Gateway Client ───────────────────────────────────────────────────
// Thin HTTP client over Transport for the single gateway endpoint named in
// the external-interface contract. One CircuitBreaker per configured model
// name, keyed through Transport's own endpoint map — a model's breaker
// tripping never blocks a different model in the fallback chain.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::transport::Transport;
use crate::types::{Role, ToolCall, ToolDefinition};

#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<GatewayToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for GatewayToolCall {
    fn from(t: &ToolCall) -> Self {
        GatewayToolCall { id: t.id.clone(), name: t.name.clone(), arguments: t.arguments.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [GatewayMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Fixed-precision decimal with six fractional digits, carried as a
    /// string by the gateway to avoid floating-point drift in accounting;
    /// parsed to `f64` at the boundary for in-process arithmetic.
    #[serde(deserialize_with = "deserialize_cost")]
    pub cost: f64,
}

fn deserialize_cost<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CostValue {
        Number(f64),
        Text(String),
    }
    match CostValue::deserialize(deserializer)? {
        CostValue::Number(n) => Ok(n),
        CostValue::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub content: String,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<GatewayToolCall>,
    pub usage: Usage,
}

pub struct LlmGatewayClient {
    transport: Arc<Transport>,
    base_url: String,
    bearer_token: String,
}

impl LlmGatewayClient {
    pub fn new(transport: Arc<Transport>, base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        LlmGatewayClient { transport, base_url: base_url.into(), bearer_token: bearer_token.into() }
    }

    /// The circuit breaker governing this model is named after the model
    /// itself, so `spawn_gate` callers can check a *specific* model's
    /// health rather than the gateway's aggregate health.
    pub fn breaker_name(model: &str) -> String {
        format!("llm:{model}")
    }

    pub async fn complete(
        &self,
        model: &str,
        messages: &[GatewayMessage],
        tools: Option<&[ToolDefinition]>,
        temperature: f64,
        max_tokens: u32,
    ) -> EngineResult<(ChatCompletionResponse, u64)> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", self.bearer_token);
        let mut value = reqwest::header::HeaderValue::from_str(&auth)
            .map_err(|e| EngineError::Config(format!("invalid bearer token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, value);

        let body = serde_json::to_value(ChatCompletionRequest {
            model,
            messages,
            tools,
            temperature,
            max_tokens,
            stream: false,
        })?;

        let started = std::time::Instant::now();
        let response = self
            .transport
            .request(&Self::breaker_name(model), Method::POST, &self.base_url, Some(body), Duration::from_secs(120), Some(headers))
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let parsed: ChatCompletionResponse = serde_json::from_slice(&response.body)?;
        Ok((parsed, latency_ms))
    }

    pub fn breaker(&self, model: &str) -> Arc<crate::transport::circuit_breaker::CircuitBreaker> {
        self.transport.breaker(&Self::breaker_name(model))
    }
}

pub fn role_str(role: Role) -> &'static str {
    role.as_str()
}

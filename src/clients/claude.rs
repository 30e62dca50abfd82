//! Anthropic Messages API client.

use super::{read_json, transport_error, unexpected_shape};
use crate::error::ProviderError;
use crate::http_client::HttpClient;
use crate::provider_registry::{
    ConnectionTestResult, ModelInfo, ProviderClient, ProviderCompletion, ProviderDescriptor,
    ProviderId, UsageStats,
};
use crate::settings::GenerationParams;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

pub(crate) static CLAUDE_DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::Claude,
    display_name: "Anthropic Claude",
    endpoint: "https://api.anthropic.com/v1/messages",
    models: &[
        ModelInfo {
            id: "claude-3-7-sonnet-20250219",
            name: "Claude 3.7 Sonnet",
            max_tokens: 100,
        },
        ModelInfo {
            id: "claude-3-5-haiku-20241022",
            name: "Claude 3.5 Haiku",
            max_tokens: 100,
        },
        ModelInfo {
            id: "claude-3-5-sonnet-20241022",
            name: "Claude 3.5 Sonnet",
            max_tokens: 100,
        },
    ],
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const TEST_MODEL: &str = "claude-3-5-haiku-20241022";

static API_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sk-ant-[a-zA-Z0-9+/=-]{40,}$").expect("static regex is valid")
});

/// Anthropic reports a typed error; authentication and request errors get
/// friendlier messages than the raw text.
fn claude_error_message(details: &Value) -> Option<String> {
    let error = details.get("error")?;
    let message = error.get("message").and_then(Value::as_str);
    match error.get("type").and_then(Value::as_str) {
        Some("authentication_error") => Some("Invalid API key".to_string()),
        Some("invalid_request_error") => message.map(|m| format!("Invalid request: {m}")),
        _ => message.map(str::to_string),
    }
}

pub struct ClaudeClient {
    http: Arc<dyn HttpClient>,
}

impl ClaudeClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    async fn send(&self, api_key: &str, body: Value) -> Result<ProviderCompletion, ProviderError> {
        let headers = [
            ("Content-Type", "application/json"),
            ("x-api-key", api_key),
            ("anthropic-version", ANTHROPIC_VERSION),
        ];
        let response = self
            .http
            .post_json(CLAUDE_DESCRIPTOR.endpoint, &headers, &body)
            .await
            .map_err(|e| transport_error(ProviderId::Claude, e))?;
        let status = response.status;
        let data = read_json(ProviderId::Claude, response, claude_error_message)?;

        let text = data
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected_shape(ProviderId::Claude, status))?;
        let requested = body["model"].as_str().unwrap_or_default();

        Ok(ProviderCompletion {
            text: text.to_string(),
            model: data["model"].as_str().unwrap_or(requested).to_string(),
            usage: data.get("usage").map(parse_usage),
        })
    }
}

fn parse_usage(usage: &Value) -> UsageStats {
    let count = |field: &str| usage[field].as_u64().and_then(|n| u32::try_from(n).ok());
    let input_tokens = count("input_tokens");
    let output_tokens = count("output_tokens");
    UsageStats {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens.zip(output_tokens).map(|(i, o)| i + o),
    }
}

#[async_trait]
impl ProviderClient for ClaudeClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &CLAUDE_DESCRIPTOR
    }

    fn is_valid_key_format(&self, api_key: &str) -> bool {
        API_KEY.is_match(api_key)
    }

    async fn test_connection(&self, api_key: &str) -> Result<ConnectionTestResult, ProviderError> {
        info!("Testing claude connection");
        let body = json!({
            "model": TEST_MODEL,
            "messages": [{ "role": "user", "content": "Hi" }],
            "max_tokens": 50,
        });
        let completion = self.send(api_key, body).await?;
        Ok(ConnectionTestResult {
            success: true,
            sample_text: completion.text,
        })
    }

    async fn enhance(
        &self,
        text: &str,
        system_prompt: &str,
        api_key: &str,
        model_id: &str,
        params: &GenerationParams,
    ) -> Result<ProviderCompletion, ProviderError> {
        if !model_id.starts_with(ProviderId::Claude.model_prefix()) {
            return Err(ProviderError::InvalidModel {
                provider: ProviderId::Claude,
                model: model_id.to_string(),
            });
        }

        let body = json!({
            "model": model_id,
            "system": system_prompt,
            "messages": [{ "role": "user", "content": text }],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        self.send(api_key, body).await
    }
}

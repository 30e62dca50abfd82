//! Chat-completions client shared by OpenAI and the OpenAI-compatible DeepSeek API.

use super::{error_message, read_json, transport_error, unexpected_shape};
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

pub(crate) static OPENAI_DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::OpenAi,
    display_name: "OpenAI",
    endpoint: "https://api.openai.com/v1/chat/completions",
    models: &[
        ModelInfo {
            id: "gpt-4o-mini",
            name: "GPT-4o Mini",
            max_tokens: 1000,
        },
        ModelInfo {
            id: "gpt-4o",
            name: "GPT-4o",
            max_tokens: 1000,
        },
        ModelInfo {
            id: "gpt-3.5-turbo",
            name: "GPT-3.5 Turbo",
            max_tokens: 1000,
        },
    ],
};

pub(crate) static DEEPSEEK_DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::DeepSeek,
    display_name: "DeepSeek",
    endpoint: "https://api.deepseek.com/chat/completions",
    models: &[
        ModelInfo {
            id: "deepseek-chat",
            name: "DeepSeek Chat",
            max_tokens: 1000,
        },
        ModelInfo {
            id: "deepseek-reasoner",
            name: "DeepSeek Reasoner",
            max_tokens: 1000,
        },
    ],
};

static SECRET_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sk-[a-zA-Z0-9]{32,}$").expect("static regex is valid")
});

pub struct OpenAiCompatibleClient {
    descriptor: &'static ProviderDescriptor,
    test_model: &'static str,
    http: Arc<dyn HttpClient>,
}

impl OpenAiCompatibleClient {
    pub fn openai(http: Arc<dyn HttpClient>) -> Self {
        Self {
            descriptor: &OPENAI_DESCRIPTOR,
            test_model: "gpt-3.5-turbo",
            http,
        }
    }

    pub fn deepseek(http: Arc<dyn HttpClient>) -> Self {
        Self {
            descriptor: &DEEPSEEK_DESCRIPTOR,
            test_model: "deepseek-chat",
            http,
        }
    }

    fn provider(&self) -> ProviderId {
        self.descriptor.id
    }

    fn accepts_model(&self, model_id: &str) -> bool {
        match self.provider() {
            // o-series reasoning models share the chat-completions endpoint.
            ProviderId::OpenAi => model_id.starts_with("gpt-") || model_id.starts_with('o'),
            other => model_id.starts_with(other.model_prefix()),
        }
    }

    async fn complete(&self, api_key: &str, body: Value) -> Result<ProviderCompletion, ProviderError> {
        let authorization = format!("Bearer {api_key}");
        let headers = [
            ("Content-Type", "application/json"),
            ("Authorization", authorization.as_str()),
        ];

        let response = self
            .http
            .post_json(self.descriptor.endpoint, &headers, &body)
            .await
            .map_err(|e| transport_error(self.provider(), e))?;
        let status = response.status;
        let data = read_json(self.provider(), response, error_message)?;

        let text = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected_shape(self.provider(), status))?;
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
    UsageStats {
        input_tokens: count("prompt_tokens"),
        output_tokens: count("completion_tokens"),
        total_tokens: count("total_tokens"),
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        self.descriptor
    }

    fn is_valid_key_format(&self, api_key: &str) -> bool {
        SECRET_KEY.is_match(api_key)
    }

    async fn test_connection(&self, api_key: &str) -> Result<ConnectionTestResult, ProviderError> {
        info!("Testing {} connection", self.provider());
        let body = json!({
            "model": self.test_model,
            "messages": [{ "role": "user", "content": "Hi" }],
            "max_tokens": 50,
        });
        let completion = self.complete(api_key, body).await?;
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
        if !self.accepts_model(model_id) {
            return Err(ProviderError::InvalidModel {
                provider: self.provider(),
                model: model_id.to_string(),
            });
        }

        let body = json!({
            "model": model_id,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": text },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        self.complete(api_key, body).await
    }
}

//! Deterministic offline provider used in mock mode.
//!
//! Enabled with `PROMPT_ENHANCER_USE_MOCK=1` or `use_mock = true` in the config
//! file. It answers every call locally so the CLI can be exercised without keys
//! or network access.

use super::descriptor_for;
use crate::error::ProviderError;
use crate::provider_registry::{
    ConnectionTestResult, ProviderClient, ProviderCompletion, ProviderDescriptor, ProviderId,
    UsageStats,
};
use crate::settings::GenerationParams;
use async_trait::async_trait;
use tracing::info;

/// Marker that makes the mock fail, for exercising failure isolation end to end.
pub const FAILURE_MARKER: &str = "[mock-fail]";

pub struct MockClient {
    descriptor: &'static ProviderDescriptor,
}

impl MockClient {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            descriptor: descriptor_for(provider),
        }
    }

    /// The strategy line of a framework system prompt, e.g. "...using the ReAct framework".
    fn strategy(system_prompt: &str) -> &str {
        system_prompt
            .lines()
            .next()
            .and_then(|line| line.split("using the ").nth(1))
            .map(|rest| rest.trim_end_matches('.'))
            .unwrap_or("default strategy")
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        self.descriptor
    }

    fn is_valid_key_format(&self, api_key: &str) -> bool {
        !api_key.trim().is_empty()
    }

    async fn test_connection(&self, api_key: &str) -> Result<ConnectionTestResult, ProviderError> {
        info!("Using mock {} client for connection test", self.descriptor.id);
        if api_key.contains(FAILURE_MARKER) {
            return Err(ProviderError::Api {
                provider: self.descriptor.id,
                status: 401,
                message: "Invalid API key".to_string(),
                details: serde_json::Value::Null,
            });
        }
        Ok(ConnectionTestResult {
            success: true,
            sample_text: format!("Hello from mock {}", self.descriptor.display_name),
        })
    }

    async fn enhance(
        &self,
        text: &str,
        system_prompt: &str,
        _api_key: &str,
        model_id: &str,
        _params: &GenerationParams,
    ) -> Result<ProviderCompletion, ProviderError> {
        let strategy = Self::strategy(system_prompt);
        if text.contains(FAILURE_MARKER) {
            return Err(ProviderError::Api {
                provider: self.descriptor.id,
                status: 500,
                message: format!("mock failure for {strategy}"),
                details: serde_json::Value::Null,
            });
        }

        let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        Ok(ProviderCompletion {
            text: format!("[{strategy}] {text}"),
            model: model_id.to_string(),
            usage: Some(UsageStats {
                input_tokens: Some(words),
                output_tokens: Some(words),
                total_tokens: Some(words.saturating_mul(2)),
            }),
        })
    }
}

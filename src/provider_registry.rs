//! Provider abstraction and lookup.
//!
//! Every LLM vendor is reached through the [`ProviderClient`] capability. Each
//! implementation owns its endpoint, headers, request shape and response parsing;
//! the rest of the engine only sees text in and text out.

use crate::clients::claude::ClaudeClient;
use crate::clients::gemini::GeminiClient;
use crate::clients::mock::MockClient;
use crate::clients::openai::OpenAiCompatibleClient;
use crate::error::{ConfigurationError, ProviderError};
use crate::http_client::HttpClient;
use crate::settings::GenerationParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Claude,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [Self::OpenAi, Self::Gemini, Self::Claude, Self::DeepSeek];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Claude => "claude",
            Self::DeepSeek => "deepseek",
        }
    }

    /// Prefix every model id served by this provider starts with.
    pub fn model_prefix(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-",
            Self::Gemini => "gemini-",
            Self::Claude => "claude-",
            Self::DeepSeek => "deepseek-",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ConfigurationError::UnknownProvider(s.to_string()))
    }
}

/// Derives the provider from a model id's naming prefix.
pub fn provider_for_model(model_id: &str) -> Result<ProviderId, ConfigurationError> {
    ProviderId::ALL
        .into_iter()
        .find(|id| model_id.starts_with(id.model_prefix()))
        .ok_or_else(|| ConfigurationError::UnknownModelFormat(model_id.to_string()))
}

/// Token accounting reported by a provider, normalised across vendors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// Text produced by a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCompletion {
    pub text: String,
    pub model: String,
    pub usage: Option<UsageStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(rename = "response")]
    pub sample_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub max_tokens: u32,
}

/// Static description of a provider: display name, endpoint and model catalog.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: &'static str,
    pub endpoint: &'static str,
    pub models: &'static [ModelInfo],
}

/// Capability implemented once per LLM vendor.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Cheap local check of the key's shape. Never touches the network.
    fn is_valid_key_format(&self, api_key: &str) -> bool;

    /// Issues one minimal trial request with `api_key`.
    async fn test_connection(&self, api_key: &str) -> Result<ConnectionTestResult, ProviderError>;

    /// Sends `system_prompt` plus `text` to `model_id` and returns the enhancement.
    async fn enhance(
        &self,
        text: &str,
        system_prompt: &str,
        api_key: &str,
        model_id: &str,
        params: &GenerationParams,
    ) -> Result<ProviderCompletion, ProviderError>;
}

/// Maps provider ids to their clients.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: BTreeMap<ProviderId, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a network client for every supported provider.
    pub fn with_default_clients(http: Arc<dyn HttpClient>) -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(OpenAiCompatibleClient::openai(http.clone())))
            .register(Arc::new(OpenAiCompatibleClient::deepseek(http.clone())))
            .register(Arc::new(GeminiClient::new(http.clone())))
            .register(Arc::new(ClaudeClient::new(http)));
        registry
    }

    /// Registry where every provider id resolves to the offline [`MockClient`].
    pub fn mock() -> Self {
        let mut registry = Self::new();
        for id in ProviderId::ALL {
            registry.register(Arc::new(MockClient::new(id)));
        }
        registry
    }

    /// Registers `client` under its descriptor's id, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) -> &mut Self {
        self.clients.insert(client.descriptor().id, client);
        self
    }

    pub fn get_client(&self, id: ProviderId) -> Result<Arc<dyn ProviderClient>, ConfigurationError> {
        self.clients
            .get(&id)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownProvider(id.to_string()))
    }

    /// Looks a client up by its wire name (`"openai"`, `"gemini"`, ...).
    pub fn get_client_by_name(&self, name: &str) -> Result<Arc<dyn ProviderClient>, ConfigurationError> {
        self.get_client(name.parse()?)
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.clients.values().map(|client| *client.descriptor()).collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

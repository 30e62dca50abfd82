//! Error taxonomy for the enhancement engine.
//!
//! Errors are grouped by the phase that produces them: inbound validation,
//! configuration resolution, provider calls and the terminal aggregate failure.
//! [`MessageRouter`](crate::message_router::MessageRouter) is the only place where
//! they are flattened into strings.

use crate::provider_registry::ProviderId;
use serde_json::Value;
use thiserror::Error;

/// A malformed inbound payload, rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("No text provided for enhancement")]
    EmptyText,
    #[error("API key is required")]
    EmptyApiKey,
    #[error("Invalid model selection data")]
    InvalidModelSelection,
    #[error("Invalid frameworks data")]
    InvalidFrameworks,
    #[error("Invalid API keys data")]
    InvalidApiKeys,
    #[error("Invalid max tokens value")]
    InvalidMaxTokens,
    #[error("Invalid temperature value")]
    InvalidTemperature,
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Resolving-phase failures. These abort before any network call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("No model selected. Please select a model in extension settings.")]
    NoModelSelected,
    #[error("API key not configured for {0}")]
    MissingApiKey(ProviderId),
    #[error("Unknown model format: {0}")]
    UnknownModelFormat(String),
    #[error("Unknown service: {0}")]
    UnknownProvider(String),
}

/// A failed call against an LLM provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Non-2xx response.
    #[error("{provider} API Error ({status}): {message}")]
    Api {
        provider: ProviderId,
        status: u16,
        message: String,
        details: Value,
    },
    /// 2xx response whose body did not have the expected shape.
    #[error("{provider} API Error ({status}): {message}")]
    InvalidResponse {
        provider: ProviderId,
        status: u16,
        message: String,
    },
    /// The request never produced a response (connect failure, timeout).
    #[error("{provider} request failed: {message}")]
    Transport { provider: ProviderId, message: String },
    #[error("Invalid {provider} model: {model}")]
    InvalidModel { provider: ProviderId, model: String },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Api { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::Transport { provider, .. }
            | Self::InvalidModel { provider, .. } => *provider,
        }
    }

    /// HTTP status, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::InvalidResponse { status, .. } => Some(*status),
            Self::Transport { .. } | Self::InvalidModel { .. } => None,
        }
    }
}

/// Crate-level error returned by the router-facing operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Enhancement failed for all frameworks: {}", .reasons.join("; "))]
    AllFrameworksFailed { reasons: Vec<String> },
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("Failed to persist settings: {0}")]
    Persistence(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Concrete [`ProviderClient`](crate::provider_registry::ProviderClient)
//! implementations, one per LLM vendor, plus an offline mock.

pub mod claude;
pub mod gemini;
pub mod mock;
pub mod openai;

use crate::error::ProviderError;
use crate::http_client::HttpResponse;
use crate::provider_registry::{ProviderDescriptor, ProviderId};
use serde_json::{Value, json};
use tracing::debug;

/// Generic fallback when an error body carries no usable message.
const GENERIC_API_FAILURE: &str = "API request failed";

pub(crate) fn descriptor_for(id: ProviderId) -> &'static ProviderDescriptor {
    match id {
        ProviderId::OpenAi => &openai::OPENAI_DESCRIPTOR,
        ProviderId::DeepSeek => &openai::DEEPSEEK_DESCRIPTOR,
        ProviderId::Gemini => &gemini::GEMINI_DESCRIPTOR,
        ProviderId::Claude => &claude::CLAUDE_DESCRIPTOR,
    }
}

/// Turns a raw HTTP exchange into a JSON body, or the matching [`ProviderError`].
///
/// `api_error_message` pulls a human-readable message out of a non-2xx body.
pub(crate) fn read_json(
    provider: ProviderId,
    response: HttpResponse,
    api_error_message: fn(&Value) -> Option<String>,
) -> Result<Value, ProviderError> {
    debug!(provider = %provider, status = response.status, body = %response.body, "provider response");

    if !response.is_success() {
        let details = serde_json::from_str::<Value>(&response.body)
            .unwrap_or_else(|_| json!({ "message": response.body }));
        let message = api_error_message(&details).unwrap_or_else(|| GENERIC_API_FAILURE.to_string());
        return Err(ProviderError::Api {
            provider,
            status: response.status,
            message,
            details,
        });
    }

    serde_json::from_str(&response.body).map_err(|e| ProviderError::InvalidResponse {
        provider,
        status: response.status,
        message: format!("Invalid JSON response: {e}"),
    })
}

/// `{"error": {"message": ...}}`, the shape all supported vendors share.
pub(crate) fn error_message(details: &Value) -> Option<String> {
    details
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn transport_error(provider: ProviderId, err: anyhow::Error) -> ProviderError {
    ProviderError::Transport {
        provider,
        message: format!("{err:#}"),
    }
}

pub(crate) fn unexpected_shape(provider: ProviderId, status: u16) -> ProviderError {
    ProviderError::InvalidResponse {
        provider,
        status,
        message: "Unexpected response format".to_string(),
    }
}

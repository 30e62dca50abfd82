//! Google Gemini `generateContent` client.
//!
//! Gemini has no separate system role on this endpoint, so the framework prompt and
//! the user's text are sent as one combined part. The key travels in the
//! `x-goog-api-key` header so it never appears in a URL.

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

pub(crate) static GEMINI_DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::Gemini,
    display_name: "Google Gemini",
    endpoint: "https://generativelanguage.googleapis.com/v1beta/models",
    models: &[
        ModelInfo {
            id: "gemini-2.0-flash",
            name: "Gemini 2.0 Flash",
            max_tokens: 1000,
        },
        ModelInfo {
            id: "gemini-1.5-flash",
            name: "Gemini 1.5 Flash",
            max_tokens: 1000,
        },
        ModelInfo {
            id: "gemini-2.0-pro-exp-02-05",
            name: "Gemini 2.0 Pro Exp 02-05",
            max_tokens: 1000,
        },
    ],
};

const TEST_MODEL: &str = "gemini-2.0-flash";

static API_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^AI[a-zA-Z0-9_-]{20,}$").expect("static regex is valid")
});

pub struct GeminiClient {
    http: Arc<dyn HttpClient>,
}

impl GeminiClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    fn url(model_id: &str) -> String {
        format!("{}/{}:generateContent", GEMINI_DESCRIPTOR.endpoint, model_id)
    }

    async fn generate(
        &self,
        model_id: &str,
        api_key: &str,
        body: Value,
    ) -> Result<ProviderCompletion, ProviderError> {
        let headers = [
            ("Content-Type", "application/json"),
            ("x-goog-api-key", api_key),
        ];
        let response = self
            .http
            .post_json(&Self::url(model_id), &headers, &body)
            .await
            .map_err(|e| transport_error(ProviderId::Gemini, e))?;
        let status = response.status;
        let data = read_json(ProviderId::Gemini, response, error_message)?;

        let text = data
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected_shape(ProviderId::Gemini, status))?;

        Ok(ProviderCompletion {
            text: text.to_string(),
            model: model_id.to_string(),
            usage: data.get("usageMetadata").map(parse_usage),
        })
    }
}

fn parse_usage(usage: &Value) -> UsageStats {
    let count = |field: &str| usage[field].as_u64().and_then(|n| u32::try_from(n).ok());
    UsageStats {
        input_tokens: count("promptTokenCount"),
        output_tokens: count("candidatesTokenCount"),
        total_tokens: count("totalTokenCount"),
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn descriptor(&self) -> &ProviderDescriptor {
        &GEMINI_DESCRIPTOR
    }

    fn is_valid_key_format(&self, api_key: &str) -> bool {
        API_KEY.is_match(api_key)
    }

    async fn test_connection(&self, api_key: &str) -> Result<ConnectionTestResult, ProviderError> {
        info!("Testing gemini connection");
        let body = json!({ "contents": [{ "parts": [{ "text": "Hi" }] }] });
        let completion = self.generate(TEST_MODEL, api_key, body).await?;
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
        if !model_id.starts_with(ProviderId::Gemini.model_prefix()) {
            return Err(ProviderError::InvalidModel {
                provider: ProviderId::Gemini,
                model: model_id.to_string(),
            });
        }

        let body = json!({
            "contents": [{ "parts": [{ "text": format!("{system_prompt}\n\nUser Input: {text}") }] }],
            "generationConfig": {
                "maxOutputTokens": params.max_tokens,
                "temperature": params.temperature,
            },
        });
        self.generate(model_id, api_key, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::test_support::RecordingHttpClient;

    const GENERATED: &str = r#"{
        "candidates": [{"content": {"parts": [{"text": "Gemini enhanced"}], "role": "model"}}],
        "usageMetadata": {"promptTokenCount": 20, "candidatesTokenCount": 4, "totalTokenCount": 24}
    }"#;

    #[tokio::test]
    async fn test_enhance_combines_prompt_and_sends_key_in_header() {
        let http = Arc::new(RecordingHttpClient::replying(200, GENERATED));
        let client = GeminiClient::new(http.clone());

        let completion = client
            .enhance("Plan a trip", "SYSTEM", "AIzaKey", "gemini-2.0-flash", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(completion.text, "Gemini enhanced");
        assert_eq!(completion.model, "gemini-2.0-flash");
        assert_eq!(completion.usage.and_then(|u| u.total_tokens), Some(24));

        let request = http.last_request();
        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(request.header("x-goog-api-key"), Some("AIzaKey"));
        assert_eq!(request.header("Authorization"), None);
        assert_eq!(
            request.body["contents"][0]["parts"][0]["text"],
            "SYSTEM\n\nUser Input: Plan a trip"
        );
        assert_eq!(request.body["generationConfig"]["maxOutputTokens"], 1000);
    }

    #[tokio::test]
    async fn test_enhance_rejects_non_gemini_model() {
        let http = Arc::new(RecordingHttpClient::replying(200, GENERATED));
        let err = GeminiClient::new(http)
            .enhance("text", "SYSTEM", "AIzaKey", "gpt-4o", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidModel { provider: ProviderId::Gemini, .. }));
    }

    #[tokio::test]
    async fn test_error_body_message_is_used() {
        let http = Arc::new(RecordingHttpClient::replying(
            400,
            r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#,
        ));
        let err = GeminiClient::new(http).test_connection("AIzaBad").await.unwrap_err();
        assert_eq!(err.to_string(), "gemini API Error (400): API key not valid.");
    }

    #[tokio::test]
    async fn test_connection_sends_plain_hi() {
        let http = Arc::new(RecordingHttpClient::replying(200, GENERATED));
        let result = GeminiClient::new(http.clone()).test_connection("AIzaKey").await.unwrap();

        assert_eq!(result.sample_text, "Gemini enhanced");
        let request = http.last_request();
        assert!(request.url.contains("/gemini-2.0-flash:generateContent"));
        assert_eq!(request.body["contents"][0]["parts"][0]["text"], "Hi");
    }

    #[tokio::test]
    async fn test_key_with_reserved_characters_stays_out_of_url() {
        let http = Arc::new(RecordingHttpClient::replying(200, GENERATED));
        let key = "AIza+key/with=reserved&chars";
        GeminiClient::new(http.clone()).test_connection(key).await.unwrap();

        let request = http.last_request();
        assert!(!request.url.contains('?'));
        assert_eq!(request.header("x-goog-api-key"), Some(key));
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_echo_key() {
        let http = Arc::new(RecordingHttpClient::failing("connection refused"));
        let err = GeminiClient::new(http.clone())
            .test_connection("AIzaSECRETKEY1234567890")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "gemini request failed: connection refused");
        assert!(!http.last_request().url.contains("SECRETKEY"));
    }

    #[test]
    fn test_key_format() {
        let client = GeminiClient::new(Arc::new(RecordingHttpClient::replying(200, GENERATED)));
        assert!(client.is_valid_key_format("AIzaSyD-abcdefghijklmnopqrstu"));
        assert!(!client.is_valid_key_format("AIshort"));
        assert!(!client.is_valid_key_format("sk-abcdefghijklmnopqrstuvwxyz0123456789"));
    }
}

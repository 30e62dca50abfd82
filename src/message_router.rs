//! Inbound message dispatch.
//!
//! [`MessageRouter::route`] is the outer boundary of the engine. It accepts the
//! untyped JSON messages a front end sends, hands them to the component that owns
//! the work, and always answers with a [`Response`] envelope. Errors are
//! flattened into `{"success": false, "error": "..."}` here and nowhere else.

use crate::connection_tester::ConnectionTester;
use crate::error::{Error, Result, ValidationError};
use crate::orchestrator::{EnhancementOrchestrator, EnhancementRequest};
use crate::progress::ProgressListener;
use crate::provider_registry::ProviderRegistry;
use crate::settings::SettingsStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

const SETTINGS_UPDATED: &str = "SETTINGS_UPDATED";
const TEST_CONNECTION: &str = "TEST_CONNECTION";
const ENHANCE_PROMPT: &str = "ENHANCE_PROMPT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Replaces the stored settings. `data` is shape-checked before anything changes.
    SettingsUpdated {
        #[serde(default)]
        data: Value,
    },
    TestConnection {
        service: String,
        #[serde(rename = "apiKey", default)]
        api_key: String,
    },
    EnhancePrompt(EnhancementRequest),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SettingsUpdated { .. } => SETTINGS_UPDATED,
            Self::TestConnection { .. } => TEST_CONNECTION,
            Self::EnhancePrompt(_) => ENHANCE_PROMPT,
        }
    }
}

/// Reply envelope. Exactly one of `data`, `response` or `error` is set, or none
/// for a bare acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            response: None,
            error: None,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            ..Self::ok()
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::ok()
        }
    }
}

pub struct MessageRouter {
    settings: Arc<SettingsStore>,
    orchestrator: EnhancementOrchestrator,
    tester: ConnectionTester,
}

impl MessageRouter {
    pub fn new(settings: Arc<SettingsStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            orchestrator: EnhancementOrchestrator::new(settings.clone(), registry.clone()),
            tester: ConnectionTester::new(registry),
            settings,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Handles one untyped message. Never fails; failures come back as an
    /// unsuccessful [`Response`].
    pub async fn route(&self, message: Value, listener: &dyn ProgressListener) -> Response {
        match Self::parse(message) {
            Ok(message) => self.route_message(message, listener).await,
            Err(e) => {
                warn!("Rejected inbound message: {}", e);
                Response::failure(&e)
            }
        }
    }

    /// Handles an already typed message.
    pub async fn route_message(
        &self,
        message: InboundMessage,
        listener: &dyn ProgressListener,
    ) -> Response {
        let kind = message.kind();
        info!("Routing {} message", kind);
        match self.dispatch(message, listener).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} failed: {}", kind, e);
                Response::failure(&e)
            }
        }
    }

    async fn dispatch(
        &self,
        message: InboundMessage,
        listener: &dyn ProgressListener,
    ) -> Result<Response> {
        match message {
            InboundMessage::SettingsUpdated { data } => {
                self.settings.update(&data)?;
                Ok(Response::ok())
            }
            InboundMessage::TestConnection { service, api_key } => {
                let result = self.tester.test(&service, &api_key).await?;
                Ok(Response::with_response(result.sample_text))
            }
            InboundMessage::EnhancePrompt(request) => {
                let result = self.orchestrator.enhance(&request, listener).await?;
                let data = serde_json::to_value(result)
                    .map_err(|e| ValidationError::Malformed(e.to_string()))?;
                Ok(Response::with_data(data))
            }
        }
    }

    /// Reads the `type` tag first so an unknown tag is reported as such rather
    /// than as a shape error.
    fn parse(message: Value) -> Result<InboundMessage> {
        let tag = match message.get("type") {
            Some(Value::String(tag)) => tag.clone(),
            Some(other) => other.to_string(),
            None => "<missing>".to_string(),
        };
        if ![SETTINGS_UPDATED, TEST_CONNECTION, ENHANCE_PROMPT].contains(&tag.as_str()) {
            return Err(Error::UnknownMessageType(tag));
        }

        serde_json::from_value(message)
            .map_err(|e| ValidationError::Malformed(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::FAILURE_MARKER;
    use crate::progress::{NoopListener, OutboundEvent, RecordingListener};
    use crate::settings::{MemoryBackend, Settings};
    use serde_json::json;

    fn settings_payload() -> Value {
        json!({
            "apiKeys": {"claude": "sk-ant-test"},
            "selectedModel": {"provider": "claude", "modelId": "claude-3-5-haiku-20241022"},
            "selectedFrameworks": ["cot", "react"],
            "advancedSettings": {"maxTokens": 800, "temperature": 0.3}
        })
    }

    fn router() -> MessageRouter {
        let store = SettingsStore::load(MemoryBackend::new(None)).unwrap();
        MessageRouter::new(Arc::new(store), Arc::new(ProviderRegistry::mock()))
    }

    async fn configured_router() -> MessageRouter {
        let router = router();
        let response = router
            .route(
                json!({"type": "SETTINGS_UPDATED", "data": settings_payload()}),
                &NoopListener,
            )
            .await;
        assert_eq!(response, Response::ok());
        router
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    #[tokio::test]
    async fn test_unknown_type_is_reported() {
        let response = router().route(json!({"type": "DELETE_ALL"}), &NoopListener).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Unknown message type: DELETE_ALL"));
    }

    #[tokio::test]
    async fn test_missing_type_is_reported() {
        let response = router().route(json!({"text": "hi"}), &NoopListener).await;
        assert_eq!(response.error.as_deref(), Some("Unknown message type: <missing>"));
    }

    #[tokio::test]
    async fn test_malformed_known_message() {
        let response = router()
            .route(json!({"type": "TEST_CONNECTION", "apiKey": "k"}), &NoopListener)
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("Malformed message:"));
    }

    // ========================================================================
    // SETTINGS_UPDATED
    // ========================================================================

    #[tokio::test]
    async fn test_settings_update_is_applied() {
        let router = configured_router().await;
        let settings = router.settings().snapshot();
        assert_eq!(settings.active_model(), Some("claude-3-5-haiku-20241022"));
        assert_eq!(settings.selected_frameworks, vec!["cot", "react"]);
        assert_eq!(settings.generation_params.max_tokens, 800);
    }

    #[tokio::test]
    async fn test_invalid_settings_leave_state_untouched() {
        let router = configured_router().await;
        let before = router.settings().stored();

        let mut payload = settings_payload();
        payload["advancedSettings"]["temperature"] = json!(1.5);
        let response = router
            .route(json!({"type": "SETTINGS_UPDATED", "data": payload}), &NoopListener)
            .await;

        assert_eq!(response.error.as_deref(), Some("Invalid temperature value"));
        assert_eq!(router.settings().stored(), before);
    }

    #[tokio::test]
    async fn test_settings_update_without_data() {
        let response = router()
            .route(json!({"type": "SETTINGS_UPDATED"}), &NoopListener)
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("settings payload must be an object"));
    }

    // ========================================================================
    // TEST_CONNECTION
    // ========================================================================

    #[tokio::test]
    async fn test_connection_success_envelope() {
        let response = router()
            .route(
                json!({"type": "TEST_CONNECTION", "service": "openai", "apiKey": "sk-whatever"}),
                &NoopListener,
            )
            .await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "response": "Hello from mock OpenAI"})
        );
    }

    #[tokio::test]
    async fn test_connection_failures() {
        let router = router();

        let response = router
            .route(json!({"type": "TEST_CONNECTION", "service": "openai"}), &NoopListener)
            .await;
        assert_eq!(response.error.as_deref(), Some("API key is required"));

        let response = router
            .route(
                json!({"type": "TEST_CONNECTION", "service": "mistral", "apiKey": "k"}),
                &NoopListener,
            )
            .await;
        assert_eq!(response.error.as_deref(), Some("Unknown service: mistral"));

        let response = router
            .route(
                json!({"type": "TEST_CONNECTION", "service": "gemini", "apiKey": FAILURE_MARKER}),
                &NoopListener,
            )
            .await;
        assert_eq!(response.error.as_deref(), Some("gemini API Error (401): Invalid API key"));
    }

    #[tokio::test]
    async fn test_connection_does_not_touch_settings() {
        let router = configured_router().await;
        let before = router.settings().stored();
        router
            .route(
                json!({"type": "TEST_CONNECTION", "service": "openai", "apiKey": "sk-other"}),
                &NoopListener,
            )
            .await;
        assert_eq!(router.settings().stored(), before);
    }

    // ========================================================================
    // ENHANCE_PROMPT
    // ========================================================================

    #[tokio::test]
    async fn test_enhance_envelope() {
        let router = configured_router().await;
        let listener = RecordingListener::new();
        let response = router
            .route(
                json!({"type": "ENHANCE_PROMPT", "text": "Write a blog post", "frameworks": ["react"]}),
                &listener,
            )
            .await;

        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["original"], "Write a blog post");
        assert_eq!(data["enhanced"][0]["framework"], "react");
        assert_eq!(data["enhanced"][0]["enhanced"], "[ReAct framework] Write a blog post");
        assert_eq!(data["enhanced"][0]["service"], "claude");
        assert!(data.get("failures").is_none());
        assert!(matches!(
            listener.events().last(),
            Some(OutboundEvent::PromptEnhanced { .. })
        ));
    }

    #[tokio::test]
    async fn test_enhance_uses_selected_frameworks() {
        let router = configured_router().await;
        let response = router
            .route(json!({"type": "ENHANCE_PROMPT", "text": "Plan a trip"}), &NoopListener)
            .await;
        let data = response.data.unwrap();
        let frameworks: Vec<_> = data["enhanced"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["framework"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(frameworks, vec!["cot", "react"]);
    }

    #[tokio::test]
    async fn test_enhance_errors_are_flattened() {
        let router = router();
        let response = router
            .route(json!({"type": "ENHANCE_PROMPT", "text": "   "}), &NoopListener)
            .await;
        assert_eq!(response.error.as_deref(), Some("No text provided for enhancement"));

        let response = router
            .route(json!({"type": "ENHANCE_PROMPT", "text": "Hello"}), &NoopListener)
            .await;
        assert_eq!(
            response.error.as_deref(),
            Some("No model selected. Please select a model in extension settings.")
        );
    }

    #[tokio::test]
    async fn test_enhance_total_failure() {
        let router = configured_router().await;
        let response = router
            .route(
                json!({"type": "ENHANCE_PROMPT", "text": format!("broken {FAILURE_MARKER}")}),
                &NoopListener,
            )
            .await;
        let error = response.error.unwrap();
        assert!(error.starts_with("Enhancement failed for all frameworks: cot: "));
        assert!(error.contains("; react: "));
    }

    #[tokio::test]
    async fn test_typed_message_matches_wire_form() {
        let message = InboundMessage::EnhancePrompt(
            EnhancementRequest::new("Hello").with_frameworks(["tot"]),
        );
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "ENHANCE_PROMPT", "text": "Hello", "frameworks": ["tot"]})
        );

        let router = MessageRouter::new(
            Arc::new(SettingsStore::in_memory(Settings::default())),
            Arc::new(ProviderRegistry::mock()),
        );
        let response = router.route_message(message, &NoopListener).await;
        assert!(!response.success);
    }
}

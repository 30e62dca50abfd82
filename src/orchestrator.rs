//! The enhancement engine.
//!
//! One call to [`EnhancementOrchestrator::enhance`] moves through three phases:
//!
//! 1. **Resolving**: pick the frameworks, the active model, its provider and key.
//!    Any failure here aborts before a single network call.
//! 2. **Per-framework loop**: one provider call per framework, strictly in order.
//!    A failing framework is recorded and skipped; it never aborts the loop.
//! 3. **Aggregating**: successes are returned in processing order. Only when every
//!    framework failed does the whole operation fail.
//!
//! Settings are read once, at the start, so a concurrent settings update never
//! changes a run that is already in flight.

use crate::error::{ConfigurationError, Error, Result, ValidationError};
use crate::frameworks::{FrameworkCatalog, resolve_frameworks};
use crate::progress::{OutboundEvent, ProgressEvent, ProgressListener, ProgressStep};
use crate::provider_registry::{
    ProviderClient, ProviderId, ProviderRegistry, UsageStats, provider_for_model,
};
use crate::settings::{GenerationParams, SettingsStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementRequest {
    pub text: String,
    /// Frameworks to apply, in order. `None` or empty defers to the settings.
    #[serde(default, alias = "framework", skip_serializing_if = "Option::is_none")]
    pub frameworks: Option<Vec<String>>,
}

impl EnhancementRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            frameworks: None,
        }
    }

    pub fn with_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks = Some(frameworks.into_iter().map(Into::into).collect());
        self
    }
}

/// One successful framework run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementResult {
    pub framework: String,
    #[serde(rename = "enhanced")]
    pub enhanced_text: String,
    #[serde(rename = "service")]
    pub provider: ProviderId,
    #[serde(rename = "model")]
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

/// One framework that produced no usable enhancement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkFailure {
    pub framework: String,
    pub reason: String,
}

impl fmt::Display for FrameworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.framework, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub original: String,
    /// Successful enhancements in the order the frameworks were processed.
    pub enhanced: Vec<EnhancementResult>,
    /// Frameworks that failed while at least one other succeeded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FrameworkFailure>,
}

/// Everything the loop needs, fixed at resolving time.
struct ResolvedRun {
    frameworks: Vec<String>,
    provider: ProviderId,
    model_id: String,
    api_key: String,
    params: GenerationParams,
    client: Arc<dyn ProviderClient>,
}

pub struct EnhancementOrchestrator {
    settings: Arc<SettingsStore>,
    registry: Arc<ProviderRegistry>,
    catalog: FrameworkCatalog,
}

impl EnhancementOrchestrator {
    pub fn new(settings: Arc<SettingsStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            settings,
            registry,
            catalog: FrameworkCatalog::builtin(),
        }
    }

    /// Runs every resolved framework against the active model.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyText`] when the text is blank
    /// - [`ConfigurationError`] when no model is selected, its id has no known
    ///   provider prefix, or its provider has no key
    /// - [`Error::AllFrameworksFailed`] when no framework succeeded, carrying
    ///   every `"<framework>: <reason>"`
    pub async fn enhance(
        &self,
        request: &EnhancementRequest,
        listener: &dyn ProgressListener,
    ) -> Result<AggregateResult> {
        let run = self.resolve(request)?;
        info!(
            provider = %run.provider,
            model = %run.model_id,
            frameworks = ?run.frameworks,
            "Enhancing prompt"
        );

        emit(listener, ProgressEvent::new(ProgressStep::Initialize));
        emit(
            listener,
            ProgressEvent::with_detail(ProgressStep::Process, run.provider.as_str()),
        );

        let mut successes = Vec::with_capacity(run.frameworks.len());
        let mut failures = Vec::new();

        for framework in &run.frameworks {
            emit(
                listener,
                ProgressEvent::with_detail(ProgressStep::Framework, framework.as_str()),
            );

            match self.apply_framework(&run, &request.text, framework).await {
                Ok(result) => {
                    successes.push(result);
                    emit(
                        listener,
                        ProgressEvent::with_detail(ProgressStep::Refine, framework.as_str()),
                    );
                }
                Err(reason) => {
                    warn!(framework = %framework, reason = %reason, "Enhancement failed for framework");
                    failures.push(FrameworkFailure {
                        framework: framework.clone(),
                        reason,
                    });
                }
            }
        }

        if successes.is_empty() {
            let error = Error::AllFrameworksFailed {
                reasons: failures.iter().map(ToString::to_string).collect(),
            };
            listener.emit(OutboundEvent::EnhancementError {
                error: error.to_string(),
            });
            return Err(error);
        }

        emit(listener, ProgressEvent::new(ProgressStep::Complete));
        info!(
            succeeded = successes.len(),
            failed = failures.len(),
            "Enhancement complete"
        );

        let result = AggregateResult {
            original: request.text.clone(),
            enhanced: successes,
            failures,
        };
        listener.emit(OutboundEvent::PromptEnhanced {
            data: result.clone(),
        });
        Ok(result)
    }

    fn resolve(&self, request: &EnhancementRequest) -> Result<ResolvedRun> {
        if request.text.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }

        let settings = self.settings.snapshot();
        let frameworks = resolve_frameworks(
            request.frameworks.as_deref(),
            &settings.selected_frameworks,
        );

        let model_id = settings
            .active_model()
            .ok_or(ConfigurationError::NoModelSelected)?
            .to_string();
        let provider = provider_for_model(&model_id)?;
        let api_key = settings
            .api_key(provider.as_str())
            .ok_or(ConfigurationError::MissingApiKey(provider))?
            .to_string();
        let client = self.registry.get_client(provider)?;

        Ok(ResolvedRun {
            frameworks,
            provider,
            model_id,
            api_key,
            params: settings.generation_params,
            client,
        })
    }

    /// One provider call. Errors come back as the reason string to record.
    async fn apply_framework(
        &self,
        run: &ResolvedRun,
        text: &str,
        framework: &str,
    ) -> std::result::Result<EnhancementResult, String> {
        let system_prompt = self.catalog.get_system_prompt(framework);
        let completion = run
            .client
            .enhance(text, system_prompt, &run.api_key, &run.model_id, &run.params)
            .await
            .map_err(|e| e.to_string())?;

        if !self.catalog.output_contract(framework).accepts(&completion.text) {
            return Err("Provider returned an empty enhancement".to_string());
        }

        Ok(EnhancementResult {
            framework: framework.to_string(),
            enhanced_text: completion.text,
            provider: run.provider,
            model_id: completion.model,
            usage: completion.usage,
        })
    }
}

fn emit(listener: &dyn ProgressListener, event: ProgressEvent) {
    listener.emit(OutboundEvent::EnhancementProgress { data: event });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::progress::{NoopListener, RecordingListener};
    use crate::provider_registry::{ConnectionTestResult, ProviderCompletion, ProviderDescriptor};
    use crate::settings::Settings;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    // =========================================================================
    // Mock implementations
    // =========================================================================

    static SCRIPTED_DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
        id: ProviderId::OpenAi,
        display_name: "Scripted",
        endpoint: "http://localhost/scripted",
        models: &[],
    };

    /// Provider that fails for system prompts naming any of `failing`, and
    /// records each call's system prompt.
    struct ScriptedProvider {
        failing: Vec<&'static str>,
        empty_output: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn succeeding() -> Self {
            Self::failing_on(&[])
        }

        fn failing_on(strategies: &[&'static str]) -> Self {
            Self {
                failing: strategies.to_vec(),
                empty_output: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &SCRIPTED_DESCRIPTOR
        }

        fn is_valid_key_format(&self, _api_key: &str) -> bool {
            true
        }

        async fn test_connection(&self, _api_key: &str) -> std::result::Result<ConnectionTestResult, ProviderError> {
            unreachable!("not used by the orchestrator")
        }

        async fn enhance(
            &self,
            text: &str,
            system_prompt: &str,
            _api_key: &str,
            model_id: &str,
            _params: &GenerationParams,
        ) -> std::result::Result<ProviderCompletion, ProviderError> {
            self.calls.lock().unwrap().push(system_prompt.to_string());
            if let Some(strategy) = self.failing.iter().find(|s| system_prompt.contains(**s)) {
                return Err(ProviderError::Api {
                    provider: ProviderId::OpenAi,
                    status: 500,
                    message: format!("{strategy} exploded"),
                    details: serde_json::Value::Null,
                });
            }
            Ok(ProviderCompletion {
                text: if self.empty_output {
                    "   ".to_string()
                } else {
                    format!("enhanced: {text}")
                },
                model: model_id.to_string(),
                usage: None,
            })
        }
    }

    fn configured_settings() -> Settings {
        Settings {
            api_keys: BTreeMap::from([("openai".to_string(), "sk-test".to_string())]),
            selected_models: IndexMap::from([("openai".to_string(), "gpt-4o".to_string())]),
            selected_frameworks: vec!["risen".to_string()],
            generation_params: GenerationParams::default(),
        }
    }

    fn build_orchestrator(settings: Settings, provider: Arc<ScriptedProvider>) -> EnhancementOrchestrator {
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        EnhancementOrchestrator::new(Arc::new(SettingsStore::in_memory(settings)), Arc::new(registry))
    }

    fn steps(listener: &RecordingListener) -> Vec<(ProgressStep, Option<String>)> {
        listener
            .progress()
            .into_iter()
            .map(|event| (event.step, event.detail))
            .collect()
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn test_all_frameworks_succeed_in_order() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let orchestrator = build_orchestrator(configured_settings(), provider.clone());
        let listener = RecordingListener::new();
        let request = EnhancementRequest::new("Write a blog post").with_frameworks(["cot", "react", "tot"]);

        let result = orchestrator.enhance(&request, &listener).await.unwrap();

        assert_eq!(result.original, "Write a blog post");
        let frameworks: Vec<_> = result.enhanced.iter().map(|r| r.framework.as_str()).collect();
        assert_eq!(frameworks, ["cot", "react", "tot"]);
        assert!(result.failures.is_empty());
        assert_eq!(result.enhanced[0].enhanced_text, "enhanced: Write a blog post");
        assert_eq!(result.enhanced[0].provider, ProviderId::OpenAi);
        assert_eq!(result.enhanced[0].model_id, "gpt-4o");
        assert_eq!(provider.call_count(), 3);

        let detail = |s: &str| Some(s.to_string());
        assert_eq!(
            steps(&listener),
            vec![
                (ProgressStep::Initialize, None),
                (ProgressStep::Process, detail("openai")),
                (ProgressStep::Framework, detail("cot")),
                (ProgressStep::Refine, detail("cot")),
                (ProgressStep::Framework, detail("react")),
                (ProgressStep::Refine, detail("react")),
                (ProgressStep::Framework, detail("tot")),
                (ProgressStep::Refine, detail("tot")),
                (ProgressStep::Complete, None),
            ]
        );
        assert!(matches!(
            listener.events().last(),
            Some(OutboundEvent::PromptEnhanced { data }) if data == &result
        ));
    }

    #[tokio::test]
    async fn test_middle_failure_is_isolated() {
        let provider = Arc::new(ScriptedProvider::failing_on(&["ReAct"]));
        let orchestrator = build_orchestrator(configured_settings(), provider.clone());
        let listener = RecordingListener::new();
        let request = EnhancementRequest::new("Plan a trip").with_frameworks(["cot", "react", "tot"]);

        let result = orchestrator.enhance(&request, &listener).await.unwrap();

        let frameworks: Vec<_> = result.enhanced.iter().map(|r| r.framework.as_str()).collect();
        assert_eq!(frameworks, ["cot", "tot"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].framework, "react");
        assert!(result.failures[0].reason.contains("ReAct exploded"));
        assert_eq!(provider.call_count(), 3);

        let refined: Vec<_> = steps(&listener)
            .into_iter()
            .filter(|(step, _)| *step == ProgressStep::Refine)
            .filter_map(|(_, detail)| detail)
            .collect();
        assert_eq!(refined, ["cot", "tot"]);
        assert_eq!(
            steps(&listener).last(),
            Some(&(ProgressStep::Complete, None))
        );
    }

    #[tokio::test]
    async fn test_all_failures_report_every_reason() {
        let provider = Arc::new(ScriptedProvider::failing_on(&["Chain-of-Thought", "ReAct"]));
        let orchestrator = build_orchestrator(configured_settings(), provider);
        let listener = RecordingListener::new();
        let request = EnhancementRequest::new("Write a blog post").with_frameworks(["cot", "react"]);

        let err = orchestrator.enhance(&request, &listener).await.unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, Error::AllFrameworksFailed { ref reasons } if reasons.len() == 2));
        assert!(message.contains("cot: openai API Error (500): Chain-of-Thought exploded"));
        assert!(message.contains("react: openai API Error (500): ReAct exploded"));
        assert!(!steps(&listener).iter().any(|(step, _)| *step == ProgressStep::Complete));
        assert!(matches!(
            listener.events().last(),
            Some(OutboundEvent::EnhancementError { error }) if error == &message
        ));
    }

    #[tokio::test]
    async fn test_empty_output_counts_as_failure() {
        let provider = Arc::new(ScriptedProvider {
            failing: Vec::new(),
            empty_output: true,
            calls: Mutex::new(Vec::new()),
        });
        let orchestrator = build_orchestrator(configured_settings(), provider);
        let request = EnhancementRequest::new("text").with_frameworks(["cot"]);

        let err = orchestrator.enhance(&request, &NoopListener).await.unwrap_err();
        assert!(err.to_string().contains("cot: Provider returned an empty enhancement"));
    }

    #[tokio::test]
    async fn test_frameworks_fall_back_to_settings_then_default() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let orchestrator = build_orchestrator(configured_settings(), provider.clone());

        let result = orchestrator
            .enhance(&EnhancementRequest::new("text"), &NoopListener)
            .await
            .unwrap();
        assert_eq!(result.enhanced.len(), 1);
        assert_eq!(result.enhanced[0].framework, "risen");

        let mut settings = configured_settings();
        settings.selected_frameworks.clear();
        let orchestrator = build_orchestrator(settings, provider);
        let result = orchestrator
            .enhance(&EnhancementRequest::new("text").with_frameworks(Vec::<String>::new()), &NoopListener)
            .await
            .unwrap();
        assert_eq!(result.enhanced[0].framework, "cot");
    }

    #[tokio::test]
    async fn test_unknown_framework_uses_default_prompt() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let orchestrator = build_orchestrator(configured_settings(), provider.clone());

        let result = orchestrator
            .enhance(&EnhancementRequest::new("text").with_frameworks(["mystery"]), &NoopListener)
            .await
            .unwrap();

        assert_eq!(result.enhanced[0].framework, "mystery");
        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0], FrameworkCatalog::builtin().get_system_prompt("cot"));
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let orchestrator = build_orchestrator(configured_settings(), provider.clone());

        let err = orchestrator
            .enhance(&EnhancementRequest::new("   "), &NoopListener)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyText)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_resolving_errors_abort_before_any_call() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let request = EnhancementRequest::new("text");

        let mut no_model = configured_settings();
        no_model.selected_models.clear();
        let listener = RecordingListener::new();
        let err = build_orchestrator(no_model, provider.clone())
            .enhance(&request, &listener)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::NoModelSelected)));
        assert!(listener.events().is_empty());

        let mut unknown_model = configured_settings();
        unknown_model.selected_models = IndexMap::from([("meta".to_string(), "llama-3".to_string())]);
        let err = build_orchestrator(unknown_model, provider.clone())
            .enhance(&request, &NoopListener)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownModelFormat(ref model)) if model == "llama-3"
        ));

        let mut missing_key = configured_settings();
        missing_key.api_keys.clear();
        let err = build_orchestrator(missing_key, provider.clone())
            .enhance(&request, &NoopListener)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingApiKey(ProviderId::OpenAi))
        ));

        let mut unregistered = configured_settings();
        unregistered.selected_models = IndexMap::from([("claude".to_string(), "claude-3-5-haiku-20241022".to_string())]);
        unregistered.api_keys.insert("claude".to_string(), "sk-ant-test".to_string());
        let err = build_orchestrator(unregistered, provider.clone())
            .enhance(&request, &NoopListener)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::UnknownProvider(_))));

        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_run_keeps_its_snapshot() {
        let provider = Arc::new(ScriptedProvider::succeeding());
        let store = Arc::new(SettingsStore::in_memory(configured_settings()));
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        let orchestrator = EnhancementOrchestrator::new(store.clone(), Arc::new(registry));

        // Rewrite the settings from inside the listener, mid-run.
        let listener = |event: OutboundEvent| {
            if let Some(progress) = event.progress() {
                if progress.step == ProgressStep::Framework {
                    store
                        .update(&serde_json::json!({
                            "apiKeys": {},
                            "selectedModel": {"provider": "gemini", "modelId": "gemini-2.0-flash"},
                            "selectedFrameworks": []
                        }))
                        .unwrap();
                }
            }
        };

        let result = orchestrator
            .enhance(&EnhancementRequest::new("text").with_frameworks(["cot", "react"]), &listener)
            .await
            .unwrap();

        assert_eq!(result.enhanced.len(), 2);
        assert!(result.enhanced.iter().all(|r| r.model_id == "gpt-4o"));
        assert_eq!(store.snapshot().active_model(), Some("gemini-2.0-flash"));
    }

    #[test]
    fn test_aggregate_wire_shape() {
        let result = AggregateResult {
            original: "Write a blog post".to_string(),
            enhanced: vec![EnhancementResult {
                framework: "cot".to_string(),
                enhanced_text: "Better prompt".to_string(),
                provider: ProviderId::OpenAi,
                model_id: "gpt-4o".to_string(),
                usage: None,
            }],
            failures: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "original": "Write a blog post",
                "enhanced": [{
                    "framework": "cot",
                    "enhanced": "Better prompt",
                    "service": "openai",
                    "model": "gpt-4o"
                }]
            })
        );
    }

    #[test]
    fn test_request_accepts_legacy_framework_field() {
        let request: EnhancementRequest =
            serde_json::from_value(serde_json::json!({"text": "t", "framework": ["cot"]})).unwrap();
        assert_eq!(request.frameworks, Some(vec!["cot".to_string()]));
    }
}

//! Prompt Enhancer - rewrites a prompt through one or more prompt-engineering
//! frameworks using a configurable LLM provider.
//!
//! A single enhancement request applies each selected framework (Chain-of-Thought,
//! ReAct, Tree of Thoughts, ...) to the same text, one provider call per
//! framework. A failing framework is recorded and skipped; the request only fails
//! when every framework did.
//!
//! # Architecture
//!
//! - [`message_router`] - Entry point: dispatches inbound JSON messages
//! - [`orchestrator`] - Runs the per-framework enhancement loop
//! - [`connection_tester`] - Verifies an API key against its provider
//! - [`settings`] - API keys, model selection, frameworks and generation params
//! - [`frameworks`] - The static framework catalog and its system prompts
//! - [`provider_registry`] - Provider abstraction and lookup
//! - [`clients`] - OpenAI, DeepSeek, Gemini, Claude and mock provider clients
//! - [`progress`] - Outbound progress and result events
//! - [`http_client`] - HTTP client abstraction
//! - [`retry`] - Linear-backoff retry helper
//! - [`config`] - Configuration file and environment
//! - [`error`] - Error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use prompt_enhancer::message_router::MessageRouter;
//! use prompt_enhancer::progress::NoopListener;
//! use prompt_enhancer::provider_registry::ProviderRegistry;
//! use prompt_enhancer::settings::{MemoryBackend, SettingsStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SettingsStore::load(MemoryBackend::new(None))?;
//!     let router = MessageRouter::new(Arc::new(store), Arc::new(ProviderRegistry::mock()));
//!
//!     router.route(json!({
//!         "type": "SETTINGS_UPDATED",
//!         "data": {
//!             "apiKeys": {"openai": "sk-..."},
//!             "selectedModel": {"provider": "openai", "modelId": "gpt-4o-mini"},
//!             "selectedFrameworks": ["cot", "react"]
//!         }
//!     }), &NoopListener).await;
//!
//!     let response = router.route(json!({
//!         "type": "ENHANCE_PROMPT",
//!         "text": "Write a blog post"
//!     }), &NoopListener).await;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```

pub mod clients;
pub mod config;
pub mod connection_tester;
pub mod error;
pub mod frameworks;
pub mod http_client;
pub mod message_router;
pub mod orchestrator;
pub mod progress;
pub mod provider_registry;
pub mod retry;
pub mod settings;

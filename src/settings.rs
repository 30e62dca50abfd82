//! Process-wide settings: API keys, model selection, frameworks and generation
//! parameters.
//!
//! [`SettingsStore`] is the single owner of the mutable state. Readers take a
//! [`Settings`] snapshot at the start of an operation and never observe a
//! concurrent update half-way through.

use crate::error::{Error, Result, ValidationError};
use crate::frameworks::DEFAULT_FRAMEWORK;
use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info};

pub const MAX_TOKENS_LIMIT: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

impl GenerationParams {
    /// Both bounds are inclusive: `max_tokens` in `[1, 100000]`, `temperature` in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=MAX_TOKENS_LIMIT).contains(&self.max_tokens) {
            return Err(ValidationError::InvalidMaxTokens);
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidTemperature);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub provider: String,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "PersistedSettings")]
pub struct Settings {
    pub api_keys: BTreeMap<String, String>,
    /// Provider id to model id, in insertion order. Only the first entry is
    /// used for enhancement.
    pub selected_models: IndexMap<String, String>,
    pub selected_frameworks: Vec<String>,
    #[serde(rename = "advancedSettings")]
    pub generation_params: GenerationParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_keys: BTreeMap::new(),
            selected_models: IndexMap::new(),
            selected_frameworks: vec![DEFAULT_FRAMEWORK.as_str().to_string()],
            generation_params: GenerationParams::default(),
        }
    }
}

impl Settings {
    /// The model enhancements run against, if one is selected.
    pub fn active_model(&self) -> Option<&str> {
        self.selected_models
            .first()
            .map(|(_, model)| model.as_str())
            .filter(|model| !model.is_empty())
    }

    /// The key stored for `provider`, ignoring blank entries.
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.api_keys
            .get(provider)
            .map(String::as_str)
            .filter(|key| !key.trim().is_empty())
    }

    /// The validated payload that would reproduce these settings.
    pub fn to_update(&self) -> Option<SettingsUpdate> {
        let (provider, model_id) = self.selected_models.first()?;
        Some(SettingsUpdate {
            api_keys: self.api_keys.clone(),
            selected_model: ModelSelection {
                provider: provider.clone(),
                model_id: model_id.clone(),
            },
            selected_frameworks: self.selected_frameworks.clone(),
            advanced_settings: Some(self.generation_params),
        })
    }
}

/// On-disk shape. Older stores hold a single `selectedModel` instead of the map.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PersistedSettings {
    api_keys: BTreeMap<String, String>,
    selected_models: Option<IndexMap<String, String>>,
    selected_model: Option<ModelSelection>,
    selected_frameworks: Vec<String>,
    advanced_settings: Option<GenerationParams>,
}

impl From<PersistedSettings> for Settings {
    fn from(persisted: PersistedSettings) -> Self {
        let selected_models = match (persisted.selected_models, persisted.selected_model) {
            (Some(models), _) if !models.is_empty() => models,
            (_, Some(selection)) => IndexMap::from([(selection.provider, selection.model_id)]),
            _ => IndexMap::new(),
        };
        let selected_frameworks = if persisted.selected_frameworks.is_empty() {
            vec![DEFAULT_FRAMEWORK.as_str().to_string()]
        } else {
            persisted.selected_frameworks
        };

        Self {
            api_keys: persisted.api_keys,
            selected_models,
            selected_frameworks,
            generation_params: persisted.advanced_settings.unwrap_or_default(),
        }
    }
}

/// A validated `SETTINGS_UPDATED` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub api_keys: BTreeMap<String, String>,
    pub selected_model: ModelSelection,
    pub selected_frameworks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_settings: Option<GenerationParams>,
}

impl SettingsUpdate {
    /// Checks the shape of an untyped payload, field by field, before anything
    /// is converted.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::Malformed("settings payload must be an object".to_string()))?;

        let selected_model = object
            .get("selectedModel")
            .and_then(|selection| {
                let provider = selection.get("provider")?.as_str()?;
                let model_id = selection.get("modelId")?.as_str()?;
                Some(ModelSelection {
                    provider: provider.to_string(),
                    model_id: model_id.to_string(),
                })
            })
            .ok_or(ValidationError::InvalidModelSelection)?;

        let selected_frameworks = object
            .get("selectedFrameworks")
            .and_then(Value::as_array)
            .ok_or(ValidationError::InvalidFrameworks)?
            .iter()
            .map(|framework| framework.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or(ValidationError::InvalidFrameworks)?;

        let api_keys = object
            .get("apiKeys")
            .and_then(Value::as_object)
            .ok_or(ValidationError::InvalidApiKeys)?
            .iter()
            .map(|(provider, key)| Some((provider.clone(), key.as_str()?.to_string())))
            .collect::<Option<BTreeMap<_, _>>>()
            .ok_or(ValidationError::InvalidApiKeys)?;

        let advanced_settings = match object.get("advancedSettings") {
            None | Some(Value::Null) => None,
            Some(advanced) => {
                let max_tokens = advanced
                    .get("maxTokens")
                    .and_then(Value::as_u64)
                    .and_then(|tokens| u32::try_from(tokens).ok())
                    .ok_or(ValidationError::InvalidMaxTokens)?;
                let temperature = advanced
                    .get("temperature")
                    .and_then(Value::as_f64)
                    .ok_or(ValidationError::InvalidTemperature)?;
                Some(GenerationParams {
                    max_tokens,
                    temperature,
                })
            }
        };

        let update = Self {
            api_keys,
            selected_model,
            selected_frameworks,
            advanced_settings,
        };
        update.validate()?;
        Ok(update)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.selected_model.provider.is_empty() || self.selected_model.model_id.is_empty() {
            return Err(ValidationError::InvalidModelSelection);
        }
        if let Some(params) = &self.advanced_settings {
            params.validate()?;
        }
        Ok(())
    }
}

/// Where settings live between runs.
pub trait SettingsBackend: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<Settings>>;
    fn save(&self, settings: &Settings) -> anyhow::Result<()>;
}

/// Settings kept as pretty-printed JSON on disk.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsBackend for JsonFileBackend {
    fn load(&self) -> anyhow::Result<Option<Settings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        info!("Loaded settings from: {}", self.path.display());
        Ok(Some(settings))
    }

    fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        info!("Saved settings to: {}", self.path.display());
        Ok(())
    }
}

/// Keeps settings in memory only.
#[derive(Default)]
pub struct MemoryBackend {
    stored: Mutex<Option<Settings>>,
}

impl MemoryBackend {
    pub fn new(initial: Option<Settings>) -> Self {
        Self {
            stored: Mutex::new(initial),
        }
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&self) -> anyhow::Result<Option<Settings>> {
        Ok(self.stored.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        Ok(())
    }
}

pub struct SettingsStore {
    current: RwLock<Settings>,
    /// Keys supplied by the environment. Visible in snapshots, never persisted.
    api_key_overrides: RwLock<BTreeMap<String, String>>,
    backend: Box<dyn SettingsBackend>,
}

impl SettingsStore {
    /// Reads persisted state once, falling back to defaults when nothing is stored.
    pub fn load(backend: impl SettingsBackend + 'static) -> anyhow::Result<Self> {
        let settings = backend.load()?.unwrap_or_else(|| {
            info!("No stored settings found, using defaults");
            Settings::default()
        });
        Ok(Self {
            current: RwLock::new(settings),
            api_key_overrides: RwLock::new(BTreeMap::new()),
            backend: Box::new(backend),
        })
    }

    /// A store seeded with `settings` and backed by memory.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            current: RwLock::new(settings.clone()),
            api_key_overrides: RwLock::new(BTreeMap::new()),
            backend: Box::new(MemoryBackend::new(Some(settings))),
        }
    }

    /// The effective settings: stored state with environment keys layered on top.
    pub fn snapshot(&self) -> Settings {
        let mut settings = self.stored();
        let overrides = self
            .api_key_overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (provider, key) in overrides.iter() {
            settings.api_keys.insert(provider.clone(), key.clone());
        }
        settings
    }

    /// The stored state without environment overrides.
    pub fn stored(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_api_key_overrides(&self, overrides: BTreeMap<String, String>) {
        if !overrides.is_empty() {
            debug!("Applying API key overrides for: {:?}", overrides.keys().collect::<Vec<_>>());
        }
        *self
            .api_key_overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner) = overrides;
    }

    /// Validates an untyped `SETTINGS_UPDATED` payload and applies it.
    pub fn update(&self, candidate: &Value) -> Result<Settings> {
        let update = SettingsUpdate::from_value(candidate)?;
        self.apply(update)
    }

    /// Replaces the stored state with `update` and persists it.
    ///
    /// Nothing changes in memory unless the backend accepted the write. Returns a
    /// fresh copy of the new settings.
    pub fn apply(&self, update: SettingsUpdate) -> Result<Settings> {
        update.validate()?;

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Settings {
            api_keys: update.api_keys,
            selected_models: IndexMap::from([(
                update.selected_model.provider,
                update.selected_model.model_id,
            )]),
            selected_frameworks: update.selected_frameworks,
            generation_params: update.advanced_settings.unwrap_or(current.generation_params),
        };

        self.backend
            .save(&next)
            .map_err(|e| Error::Persistence(format!("{e:#}")))?;
        *current = next.clone();
        info!("Settings updated");
        Ok(next)
    }

    /// Re-reads persisted state, replacing what is held in memory.
    pub fn reload(&self) -> anyhow::Result<Settings> {
        let settings = self.backend.load()?.unwrap_or_default();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        info!("Settings reloaded");
        Ok(settings)
    }
}

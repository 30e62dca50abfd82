use crate::provider_registry::ProviderId;
use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Overrides the directory holding `config.toml` and `settings.json`.
pub const HOME_ENV: &str = "PROMPT_ENHANCER_HOME";
/// Any value turns on the offline mock providers.
pub const MOCK_ENV: &str = "PROMPT_ENHANCER_USE_MOCK";

const API_KEY_ENV: [(&str, ProviderId); 4] = [
    ("OPENAI_API_KEY", ProviderId::OpenAi),
    ("GEMINI_API_KEY", ProviderId::Gemini),
    ("ANTHROPIC_API_KEY", ProviderId::Claude),
    ("DEEPSEEK_API_KEY", ProviderId::DeepSeek),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub request_timeout_secs: u64,
    /// Defaults to `settings.json` next to the config file.
    pub settings_file: Option<PathBuf>,
    pub use_mock: bool,
    #[serde(skip)]
    config_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            settings_file: None,
            use_mock: false,
            config_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment, or fall back to defaults.
    pub fn load() -> Result<Self> {
        let dir = Self::get_config_dir()?;
        Self::load_with(&dir, |name| std::env::var(name).ok())
    }

    /// Loads from `dir`, reading environment variables through `env`.
    pub fn load_with(dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = dir.join("config.toml");
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            info!("No config file found, using defaults");
            Self::default()
        };
        config.config_dir = dir.to_path_buf();

        if env(MOCK_ENV).is_some() {
            config.use_mock = true;
        }

        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(HOME_ENV) {
            return Ok(PathBuf::from(dir));
        }
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".prompt-enhancer"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Where persisted settings live. Relative paths resolve against the config directory.
    pub fn settings_path(&self) -> PathBuf {
        match &self.settings_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.config_dir.join(path),
            None => self.config_dir.join("settings.json"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn is_mock_mode(&self) -> bool {
        self.use_mock
    }

    /// API keys supplied through the environment, keyed by provider id.
    ///
    /// These are layered over stored settings in memory and never written back.
    pub fn env_api_keys() -> BTreeMap<String, String> {
        Self::api_keys_with(|name| std::env::var(name).ok())
    }

    pub fn api_keys_with(env: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
        API_KEY_ENV
            .iter()
            .filter_map(|(var, provider)| {
                let key = env(var).filter(|key| !key.trim().is_empty())?;
                Some((provider.as_str().to_string(), key))
            })
            .collect()
    }

    pub fn show_config_info() -> Result<()> {
        let config = Self::load()?;
        let config_path = config.config_path();
        println!("Configuration file: {}", config_path.display());
        if config_path.exists() {
            println!("Status: Found");
        } else {
            println!("Status: Not found (using defaults)");
        }
        println!("Settings file: {}", config.settings_path().display());
        println!("Request timeout: {}s", config.request_timeout().as_secs());
        println!("Mock mode: {}", config.use_mock);

        let env_keys = Self::env_api_keys();
        for (var, provider) in API_KEY_ENV {
            let state = if env_keys.contains_key(provider.as_str()) { "Set" } else { "Not set" };
            println!("{var}: {state}");
        }

        println!("\nTo store an API key:");
        println!("  enhance --set-api-key <provider> <key> --select-model <model>");

        Ok(())
    }
}

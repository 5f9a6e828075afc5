//! Configuration management for the answer collector
//!
//! Loads provider, model and collector settings from TOML files and provides
//! runtime access. Credentials never live in the file: each provider names
//! the environment variable that holds its API key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions, also served by DeepSeek and Together
    OpenAI,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            other => Err(format!("Unknown provider kind: {}", other)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Override for the API base URL (DeepSeek, Together, test servers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum concurrent requests
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Minimum spacing between two admissions
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Requests per minute, 0 disables the window
    #[serde(default)]
    pub rpm: u32,
    /// First wait after a rate-limit signal
    #[serde(default = "default_backoff_seed_ms")]
    pub backoff_seed_ms: u64,
    /// Upper bound for rate-limit backoff
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// A model answers every question exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier as the provider's API expects it
    pub id: String,
    /// Key into `Config::providers`
    pub provider: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Retry and timeout settings for the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Attempts per pair, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,
    #[serde(default = "default_transient_backoff_max_ms")]
    pub transient_backoff_max_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Where committed answers live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_in_flight() -> usize { 4 }
fn default_backoff_seed_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 60_000 }
fn default_max_tokens() -> u32 { 1024 }
fn default_max_attempts() -> u32 { 5 }
fn default_transient_backoff_ms() -> u64 { 500 }
fn default_transient_backoff_max_ms() -> u64 { 8_000 }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_store_path() -> String { "answers".to_string() }

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            transient_backoff_ms: default_transient_backoff_ms(),
            transient_backoff_max_ms: default_transient_backoff_max_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl ProviderConfig {
    /// Provider with default limits
    pub fn new(kind: ProviderKind, api_key_env: impl Into<String>) -> Self {
        Self {
            kind,
            api_key_env: api_key_env.into(),
            base_url: None,
            enabled: true,
            max_in_flight: default_max_in_flight(),
            min_interval_ms: 0,
            rpm: 0,
            backoff_seed_ms: default_backoff_seed_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_min_interval_ms(mut self, ms: u64) -> Self {
        self.min_interval_ms = ms;
        self
    }

    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, or fall back to the default search paths
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let config = Self::from_file(p)?;
                tracing::info!("Loaded configuration from {}", p.display());
                Ok(config)
            }
            None => Self::load_or_default(),
        }
    }

    /// Load from the default config location or return defaults.
    ///
    /// A config file that exists but does not parse or validate is an
    /// error rather than a reason to fall back to the built-in models.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        Self::load_first(&["config/collector.toml", "../config/collector.toml"])
    }

    /// Load the first of `paths` that exists, or the defaults if none does
    pub fn load_first<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        for path in paths {
            let path = path.as_ref();
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    return Ok(config);
                }
                Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ConfigError::InFile {
                        path: path.display().to_string(),
                        source: Box::new(e),
                    })
                }
            }
        }

        tracing::info!("Using default configuration");
        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check cross references and limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "collector.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.collector.transient_backoff_ms > self.collector.transient_backoff_max_ms {
            return Err(ConfigError::Invalid(
                "collector.transient_backoff_ms exceeds transient_backoff_max_ms".to_string(),
            ));
        }

        for (name, provider) in &self.providers {
            if provider.max_in_flight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "providers.{}.max_in_flight must be at least 1",
                    name
                )));
            }
            if provider.backoff_seed_ms > provider.backoff_max_ms {
                return Err(ConfigError::Invalid(format!(
                    "providers.{}.backoff_seed_ms exceeds backoff_max_ms",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if !self.providers.contains_key(&model.provider) {
                return Err(ConfigError::UnknownProvider {
                    model: model.id.clone(),
                    provider: model.provider.clone(),
                });
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::DuplicateModel(model.id.clone()));
            }
        }

        Ok(())
    }

    /// Get a specific provider config
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Enabled models whose provider is enabled too, in file order
    pub fn enabled_models(&self) -> Vec<&ModelConfig> {
        self.models
            .iter()
            .filter(|m| m.enabled)
            .filter(|m| self.providers.get(&m.provider).is_some_and(|p| p.enabled))
            .collect()
    }

    /// Look up a model by id
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = IndexMap::new();

        providers.insert(
            "openai".to_string(),
            ProviderConfig::new(ProviderKind::OpenAI, "OPENAI_API_KEY"),
        );
        providers.insert(
            "deepseek".to_string(),
            ProviderConfig::new(ProviderKind::OpenAI, "DEEPSEEK_API_KEY")
                .with_base_url("https://api.deepseek.com"),
        );
        // DeepSeek-R1 on Together tolerates roughly three requests a minute
        providers.insert(
            "together".to_string(),
            ProviderConfig::new(ProviderKind::OpenAI, "TOGETHER_AI_API_KEY")
                .with_base_url("https://api.together.xyz/v1")
                .with_min_interval_ms(21_000)
                .with_max_in_flight(1),
        );
        providers.insert(
            "anthropic".to_string(),
            ProviderConfig::new(ProviderKind::Anthropic, "ANTHROPIC_API_KEY"),
        );
        providers.insert(
            "google".to_string(),
            ProviderConfig::new(ProviderKind::Google, "GEMINI_API_KEY"),
        );

        let models = vec![
            ModelConfig::new("gpt-4o", "openai"),
            ModelConfig::new("o1", "openai"),
            ModelConfig::new("deepseek-ai/DeepSeek-R1", "together"),
            ModelConfig::new("deepseek-chat", "deepseek"),
            ModelConfig::new("claude-3-5-sonnet-20241022", "anthropic"),
            ModelConfig::new("gemini-2.0-flash", "google"),
            ModelConfig::new("meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo", "together"),
        ];

        Self {
            providers,
            models,
            collector: CollectorSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Model {model} references unknown provider {provider}")]
    UnknownProvider { model: String, provider: String },

    #[error("Model {0} is listed more than once")]
    DuplicateModel(String),

    #[error("{path}: {source}")]
    InFile {
        path: String,
        #[source]
        source: Box<ConfigError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.providers.contains_key("anthropic"));
        assert!(config.providers.contains_key("openai"));
        assert_eq!(config.models.len(), 7);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml_config() {
        let toml = r#"
[providers.test]
kind = "openai"
api_key_env = "TEST_KEY"
base_url = "http://localhost:8080"
max_in_flight = 2
rpm = 100

[[models]]
id = "test-model"
provider = "test"

[collector]
max_attempts = 3
"#;
        let config = Config::from_toml(toml).unwrap();
        let provider = config.get_provider("test").unwrap();
        assert_eq!(provider.kind, ProviderKind::OpenAI);
        assert_eq!(provider.max_in_flight, 2);
        assert_eq!(provider.backoff_seed_ms, 1_000);
        assert_eq!(config.collector.max_attempts, 3);
        assert_eq!(config.collector.timeout_ms, 120_000);
        assert_eq!(config.store.path, "answers");
        assert_eq!(config.enabled_models().len(), 1);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = r#"
[[models]]
id = "orphan"
provider = "nowhere"
"#;
        let err = Config::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let mut config = Config::default();
        config.models.push(ModelConfig::new("gpt-4o", "openai"));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateModel(_))));
    }

    #[test]
    fn test_disabled_provider_hides_models() {
        let mut config = Config::default();
        config.providers.get_mut("together").unwrap().enabled = false;
        let ids: Vec<_> = config.enabled_models().iter().map(|m| m.id.as_str()).collect();
        assert!(!ids.contains(&"deepseek-ai/DeepSeek-R1"));
        assert!(ids.contains(&"gpt-4o"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.toml");
        Config::default().save_toml(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.models, Config::default().models);
        assert_eq!(
            loaded.get_provider("together").unwrap().min_interval_ms,
            21_000
        );
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/collector.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.models, Config::default().models);
        assert_eq!(config.get_provider("anthropic").unwrap().rpm, 50);
    }

    #[test]
    fn test_parse_provider_kind() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert!("bedrock".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_load_first_rejects_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[[models]]\nid = \"m\"\nprovider = \"nowhere\"\n").unwrap();

        let err = Config::load_first(&[&missing, &broken]).unwrap_err();
        assert!(matches!(err, ConfigError::InFile { .. }));
        assert!(err.to_string().contains("broken.toml"));

        let config = Config::load_first(&[&missing]).unwrap();
        assert_eq!(config.models.len(), Config::default().models.len());
    }
}

//! LLM provider implementations

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use google::GoogleClient;
pub use openai::OpenAIClient;
pub use traits::{Completion, ErrorClass, LLMProvider, ProviderError, ProviderResult};

use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ProviderConfig, ProviderKind};

/// Shared handle to any provider client
pub type SharedProvider = Arc<dyn LLMProvider + Send + Sync>;

/// Build one client from its configuration, reading the key from the environment
pub fn create_provider(
    name: &str,
    config: &ProviderConfig,
    timeout: Duration,
) -> ProviderResult<SharedProvider> {
    let provider: SharedProvider = match config.kind {
        ProviderKind::OpenAI => {
            let mut client = OpenAIClient::from_env(&config.api_key_env)?
                .with_name(name)
                .with_max_tokens(config.max_tokens)
                .with_timeout(timeout)?;
            if let Some(url) = &config.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::from_env(&config.api_key_env)?
                .with_name(name)
                .with_max_tokens(config.max_tokens)
                .with_timeout(timeout)?;
            if let Some(url) = &config.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderKind::Google => {
            let mut client = GoogleClient::from_env(&config.api_key_env)?
                .with_name(name)
                .with_timeout(timeout)?;
            if let Some(url) = &config.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    };
    Ok(provider)
}

/// Provider clients keyed by configured provider name.
///
/// Providers that could not be built (usually a missing API key) are kept
/// with the reason, so their models can be reported instead of vanishing.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: IndexMap<String, SharedProvider>,
    unavailable: IndexMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every enabled provider in the configuration
    pub fn from_config(config: &Config) -> Self {
        let timeout = Duration::from_millis(config.collector.timeout_ms);
        let mut registry = Self::new();

        for (name, provider_config) in config.providers.iter().filter(|(_, p)| p.enabled) {
            match create_provider(name, provider_config, timeout) {
                Ok(client) => {
                    registry.clients.insert(name.clone(), client);
                }
                Err(e) => {
                    tracing::debug!(provider = %name, "Provider unavailable: {}", e);
                    registry.unavailable.insert(name.clone(), e.to_string());
                }
            }
        }

        registry
    }

    /// Register a client under its own name
    pub fn with_provider(mut self, client: SharedProvider) -> Self {
        self.insert(client);
        self
    }

    pub fn insert(&mut self, client: SharedProvider) {
        let name = client.name().to_string();
        self.unavailable.shift_remove(&name);
        self.clients.insert(name, client);
    }

    pub fn get(&self, name: &str) -> Option<&SharedProvider> {
        self.clients.get(name)
    }

    /// Why a provider could not be created, if it could not
    pub fn unavailable_reason(&self, name: &str) -> Option<&str> {
        self.unavailable.get(name).map(String::as_str)
    }
}

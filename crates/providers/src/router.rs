//! Provider router — selects the correct LLM provider based on config.
//!
//! Handles provider creation and routing requests to the right backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;
use kaputa_core::provider::Provider;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &kaputa_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);
    let timeout = Duration::from_secs(config.request_timeout_secs);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        router.register(
            name.clone(),
            build_provider(name, &api_key, provider_config.api_url.as_deref(), timeout),
        );
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        router.register(
            config.default_provider.clone(),
            build_provider(&config.default_provider, &api_key, None, timeout),
        );
    }

    router
}

fn build_provider(
    name: &str,
    api_key: &str,
    api_url: Option<&str>,
    timeout: Duration,
) -> Arc<dyn Provider> {
    if name == "gemini" {
        let mut p = GeminiProvider::with_timeout(api_key, timeout);
        if let Some(url) = api_url {
            p = p.with_base_url(url);
        }
        Arc::new(p)
    } else {
        let base_url = api_url
            .map(String::from)
            .unwrap_or_else(|| default_base_url(name));
        Arc::new(OpenAiCompatProvider::new(name, base_url, api_key).with_timeout(timeout))
    }
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaputa_config::{AppConfig, ProviderConfig};

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openrouter");
        let provider = Arc::new(OpenAiCompatProvider::openrouter("sk-test"));
        router.register("openrouter", provider);

        assert!(router.get("openrouter").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config_uses_gemini() {
        let config = AppConfig::default();
        let router = build_from_config(&config);
        let provider = router.default().unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn configured_providers_are_registered() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "ollama".into(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://gpu-box:11434/v1".into()),
                default_model: None,
            },
        );
        let router = build_from_config(&config);
        assert_eq!(router.list(), ["gemini", "ollama"]);
        assert_eq!(router.get("ollama").unwrap().name(), "ollama");
    }
}

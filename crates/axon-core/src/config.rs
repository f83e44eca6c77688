//! Configuration for the agent runtime.
//!
//! Loads configuration from a TOML file with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineKind;
use crate::providers::ProviderKind;

/// Agent runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier, optionally provider-prefixed (`openai:gpt-4.1`).
    pub model: String,

    /// Optional inline system prompt.
    pub system_prompt: Option<String>,

    /// Hard cap on model calls per run.
    pub max_iterations: u32,

    /// Sampling temperature (provider default when unset).
    pub temperature: Option<f32>,

    /// Tool call encoding strategy.
    pub engine: EngineKind,

    /// Prefer the Responses API when the provider supports it.
    pub prefer_responses_api: bool,

    /// Maximum image parts retained across the whole message history.
    pub max_images: usize,

    /// Maximum bytes for any single text field before middle elision.
    pub max_text_len: usize,

    /// Timeout for tool execution in seconds (0 disables).
    pub tool_timeout_secs: u32,

    /// Reflection configuration.
    pub reflection: ReflectionConfig,

    /// Provider configuration (base URLs, API keys).
    pub providers: ProvidersConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "openai:gpt-4.1".to_string(),
            system_prompt: None,
            max_iterations: 10,
            temperature: None,
            engine: EngineKind::default(),
            prefer_responses_api: false,
            max_images: 10,
            max_text_len: 16 * 1024,
            tool_timeout_secs: 120,
            reflection: ReflectionConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(AgentConfig::default())
        }
    }

    /// Effective tool timeout (`None` when disabled).
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(u64::from(self.tool_timeout_secs)))
    }
}

/// Reflection (second-guess) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub enabled: bool,
    /// Model override for the reflection call; run model when unset.
    pub model: Option<String>,
}

/// Per-provider settings (all optional; env vars fill the gaps).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Provider settings table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderSettings,
    pub openrouter: ProviderSettings,
    pub moonshot: ProviderSettings,
    pub mistral: ProviderSettings,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::OpenAI => &self.openai,
            ProviderKind::OpenRouter => &self.openrouter,
            ProviderKind::Moonshot => &self.moonshot,
            ProviderKind::Mistral => &self.mistral,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.engine, EngineKind::Native);
        assert_eq!(config.max_images, 10);
        assert!(!config.reflection.enabled);
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_load_from_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.model, AgentConfig::default().model);
    }

    #[test]
    fn test_load_from_parses_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
model = "moonshot:kimi-k2"
max_iterations = 3
engine = "prompt_engineering"

[reflection]
enabled = true

[providers.moonshot]
base_url = "https://proxy.example/v1"
"#,
        )
        .unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "moonshot:kimi-k2");
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.engine, EngineKind::PromptEngineering);
        assert!(config.reflection.enabled);
        assert_eq!(
            config.providers.moonshot.base_url.as_deref(),
            Some("https://proxy.example/v1")
        );
        // Untouched sections keep defaults.
        assert_eq!(config.max_images, 10);
    }

    #[test]
    fn test_load_from_rejects_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = [broken").unwrap();
        assert!(AgentConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = AgentConfig {
            tool_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.tool_timeout(), None);
    }
}

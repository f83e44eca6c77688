//! LLM provider abstraction: model resolution, wire types, streaming clients.

pub mod chat;
pub mod client;
pub mod responses;
mod shared;

pub use chat::{
    ChatChunk, ChatChunkChoice, ChatCompletion, ChatContentPart, ChatDelta, ChatMessage,
    ChatMessageContent, ChatRequest, ChatToolCall, ChatToolDefinition, ImageUrlData, ToolCallDelta,
    ToolCallFunctionDelta,
};
pub use client::{ChatChunkStream, HttpLlmClient, LlmClient, ResponsesChunkStream};
pub use responses::ResponsesChunk;
pub use shared::{
    ProviderError, ProviderErrorKind, ProviderResult, resolve_api_key, resolve_base_url,
};

use anyhow::Result;

use crate::config::AgentConfig;

/// Provider selection based on model naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    OpenRouter,
    Moonshot,
    Mistral,
}

impl ProviderKind {
    /// Returns all provider kinds.
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::OpenAI,
            ProviderKind::OpenRouter,
            ProviderKind::Moonshot,
            ProviderKind::Mistral,
        ]
    }

    /// Returns the string identifier used in config files and model ids.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Moonshot => "moonshot",
            ProviderKind::Mistral => "mistral",
        }
    }

    /// Returns the `ProviderKind` for a given id string.
    pub fn from_id(id: &str) -> Option<ProviderKind> {
        match id.to_lowercase().as_str() {
            "openai" | "openai-api" => Some(ProviderKind::OpenAI),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "moonshot" | "kimi" => Some(ProviderKind::Moonshot),
            "mistral" => Some(ProviderKind::Mistral),
            _ => None,
        }
    }

    /// Returns the human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::OpenRouter => "OpenRouter",
            ProviderKind::Moonshot => "Moonshot",
            ProviderKind::Mistral => "Mistral",
        }
    }

    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Moonshot => "MOONSHOT_API_KEY",
            ProviderKind::Mistral => "MISTRAL_API_KEY",
        }
    }

    pub fn base_url_env_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI_BASE_URL",
            ProviderKind::OpenRouter => "OPENROUTER_BASE_URL",
            ProviderKind::Moonshot => "MOONSHOT_BASE_URL",
            ProviderKind::Mistral => "MISTRAL_BASE_URL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Moonshot => "https://api.moonshot.ai/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
        }
    }

    /// Whether the provider exposes the Responses API in addition to
    /// chat completions.
    pub fn supports_responses_api(&self) -> bool {
        matches!(self, ProviderKind::OpenAI)
    }

    /// Whether the provider streams reasoning content deltas.
    pub fn supports_reasoning(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAI | ProviderKind::OpenRouter | ProviderKind::Moonshot
        )
    }
}

/// Fully resolved model: provider, id, credentials, capability flags.
///
/// Immutable per run; resolved once and reused across iterations. A
/// session-level override replaces the whole value before the next
/// iteration starts.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub supports_responses_api: bool,
    pub supports_reasoning: bool,
}

/// Resolves provider and model from a model identifier.
///
/// Supports explicit prefix format: `provider:model` or `provider/model`.
/// Without prefix, defaults to OpenAI.
///
/// # Errors
/// Returns an error when no API key is available for the provider or the
/// configured base URL is malformed.
pub fn resolve_model(model: &str, config: &AgentConfig) -> Result<ResolvedModel> {
    let (kind, model_id) = parse_provider_prefix(model.trim())
        .unwrap_or((ProviderKind::OpenAI, model.trim().to_string()));

    let settings = config.providers.get(kind);
    let api_key = resolve_api_key(
        settings.api_key.as_deref(),
        kind.api_key_env_var(),
        kind.id(),
    )?;
    let base_url = resolve_base_url(
        settings.base_url.as_deref(),
        kind.base_url_env_var(),
        kind.default_base_url(),
        kind.label(),
    )?;

    Ok(ResolvedModel {
        provider: kind,
        model: model_id,
        api_key,
        base_url,
        supports_responses_api: kind.supports_responses_api(),
        supports_reasoning: kind.supports_reasoning(),
    })
}

fn parse_provider_prefix(model: &str) -> Option<(ProviderKind, String)> {
    for sep in [':', '/'] {
        if let Some((prefix, rest)) = model.split_once(sep) {
            let rest = rest.trim();
            if rest.is_empty() {
                continue;
            }
            if let Some(kind) = ProviderKind::from_id(prefix.trim()) {
                return Some((kind, rest.to_string()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_prefix_parsing() {
        let (kind, model) = parse_provider_prefix("moonshot:kimi-k2").unwrap();
        assert_eq!(kind, ProviderKind::Moonshot);
        assert_eq!(model, "kimi-k2");

        let (kind, model) = parse_provider_prefix("openrouter/deepseek/deepseek-chat").unwrap();
        assert_eq!(kind, ProviderKind::OpenRouter);
        assert_eq!(model, "deepseek/deepseek-chat");

        assert!(parse_provider_prefix("gpt-4.1").is_none());
        assert!(parse_provider_prefix("moonshot:").is_none());
    }

    #[test]
    fn test_provider_ids_roundtrip() {
        for kind in ProviderKind::all() {
            assert_eq!(ProviderKind::from_id(kind.id()), Some(*kind));
        }
    }

    #[test]
    fn test_responses_api_capability() {
        assert!(ProviderKind::OpenAI.supports_responses_api());
        assert!(!ProviderKind::Moonshot.supports_responses_api());
    }
}

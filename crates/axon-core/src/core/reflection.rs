//! Reflection: a second LLM call that second-guesses a "final" answer.
//!
//! Stateless and single-shot. Any failure (absent client, request error,
//! malformed verdict JSON) defaults to *finished* so reflection can never
//! force an infinite loop.

use std::sync::Arc;

use serde::Deserialize;

use crate::prompts::REFLECTION_PROMPT_TEMPLATE;
use crate::providers::LlmClient;
use crate::providers::chat::{ChatMessage, ChatRequest};

/// Outcome of one reflection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionVerdict {
    pub should_continue: bool,
    pub reason: Option<String>,
    pub analysis: Option<String>,
}

impl ReflectionVerdict {
    pub fn finished() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    should_continue: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    analysis: Option<String>,
}

/// Single-shot evaluation service.
pub struct ReflectionService {
    client: Option<Arc<dyn LlmClient>>,
    model: String,
}

impl ReflectionService {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            model: model.into(),
        }
    }

    /// A service that always permits termination.
    pub fn disabled() -> Self {
        Self {
            client: None,
            model: String::new(),
        }
    }

    /// Asks whether the assistant's last message indicates unfinished work.
    pub async fn evaluate(&self, task: &str, answer: &str) -> ReflectionVerdict {
        let Some(client) = &self.client else {
            return ReflectionVerdict::finished();
        };

        let prompt = REFLECTION_PROMPT_TEMPLATE
            .replace("{task}", task)
            .replace("{answer}", answer);
        let mut request = ChatRequest::new(self.model.clone(), vec![ChatMessage::user(prompt)]);
        request.stream = false;

        let completion = match client.complete(request).await {
            Ok(completion) => completion,
            Err(err) => {
                tracing::warn!(%err, "Reflection call failed; permitting termination");
                return ReflectionVerdict::finished();
            }
        };

        parse_verdict(&completion.content).unwrap_or_else(|| {
            tracing::warn!("Reflection verdict did not parse; permitting termination");
            ReflectionVerdict::finished()
        })
    }
}

/// Lenient verdict extraction: tolerates prose or code fences around the
/// JSON object.
fn parse_verdict(content: &str) -> Option<ReflectionVerdict> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawVerdict = serde_json::from_str(&content[start..=end]).ok()?;
    Some(ReflectionVerdict {
        should_continue: raw.should_continue,
        reason: raw.reason,
        analysis: raw.analysis,
    })
}

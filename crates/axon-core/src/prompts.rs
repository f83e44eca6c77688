//! Prompt file helpers.

/// Tool documentation block appended to the system prompt by the
/// prompt-engineering engine (`MiniJinja`).
pub const TOOL_CALL_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/tool_call_prompt.md"
));

/// Evaluation prompt for the reflection service.
pub const REFLECTION_PROMPT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/reflection_prompt.md"
));

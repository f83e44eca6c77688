//! Tool invocation types and the structured output envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Returns a copy with the name lowercased.
    ///
    /// Some providers are case-sensitive about function names; lowercase is
    /// the least-surprising canonical form across all of them.
    #[must_use]
    pub fn with_lowercase_name(&self) -> Self {
        Self {
            name: self.name.to_ascii_lowercase(),
            ..self.clone()
        }
    }
}

/// A tool call emitted by the model.
///
/// `arguments` stays an opaque JSON string until the target tool validates
/// it; streaming accumulation concatenates argument fragments into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the accumulated arguments as JSON.
    ///
    /// # Errors
    /// Returns the underlying parse error when the arguments are not valid
    /// JSON (e.g., a stream ended mid-call).
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Structured envelope for tool outputs.
///
/// All tool outputs use this format:
/// - Success: `{"ok": true, "data": { ... }}`
/// - Failure: `{"ok": false, "error": { "code": "...", "message": "...", "details": "..." (optional) }}`
/// - Canceled: serializes as failure with `code: "canceled"` but deserializes back to Canceled variant
///
/// The optional `image` field is not serialized to JSON - it's handled
/// separately when building API requests for vision-capable models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Success {
        ok: bool,
        data: Value,
        /// Optional image content (not serialized to JSON).
        image: Option<ImageContent>,
    },
    Failure {
        ok: bool,
        error: ToolError,
    },
    /// The run was aborted while the tool was executing.
    Canceled {
        /// User-facing message.
        message: String,
    },
}

/// Special error code that indicates a canceled operation.
const CANCELED_ERROR_CODE: &str = "canceled";

impl Serialize for ToolOutput {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        match self {
            ToolOutput::Success { ok, data, .. } => {
                // image is not serialized
                let mut state = serializer.serialize_struct("ToolOutput", 2)?;
                state.serialize_field("ok", ok)?;
                state.serialize_field("data", data)?;
                state.end()
            }
            ToolOutput::Failure { ok, error } => {
                let mut state = serializer.serialize_struct("ToolOutput", 2)?;
                state.serialize_field("ok", ok)?;
                state.serialize_field("error", error)?;
                state.end()
            }
            ToolOutput::Canceled { message } => {
                let error = ToolError {
                    code: CANCELED_ERROR_CODE.to_string(),
                    message: message.clone(),
                    details: None,
                };
                let mut state = serializer.serialize_struct("ToolOutput", 2)?;
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", &error)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ToolOutput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawToolOutput {
            ok: bool,
            #[serde(default)]
            data: Option<Value>,
            #[serde(default)]
            error: Option<ToolError>,
        }

        let raw = RawToolOutput::deserialize(deserializer)?;

        if raw.ok {
            Ok(ToolOutput::Success {
                ok: true,
                data: raw.data.unwrap_or(Value::Null),
                image: None, // image is never serialized
            })
        } else if let Some(error) = raw.error {
            if error.code == CANCELED_ERROR_CODE {
                Ok(ToolOutput::Canceled {
                    message: error.message,
                })
            } else {
                Ok(ToolOutput::Failure { ok: false, error })
            }
        } else {
            Ok(ToolOutput::Failure {
                ok: false,
                error: ToolError {
                    code: "unknown".to_string(),
                    message: "Unknown error".to_string(),
                    details: None,
                },
            })
        }
    }
}

impl ToolOutput {
    /// Creates a successful tool output.
    pub fn success(data: Value) -> Self {
        ToolOutput::Success {
            ok: true,
            data,
            image: None,
        }
    }

    /// Creates a successful tool output with image content.
    pub fn success_with_image(data: Value, image: ImageContent) -> Self {
        ToolOutput::Success {
            ok: true,
            data,
            image: Some(image),
        }
    }

    /// Creates a failed tool output.
    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        ToolOutput::Failure {
            ok: false,
            error: ToolError {
                code: code.into(),
                message: message.into(),
                details,
            },
        }
    }

    /// Creates a canceled tool output (run abort).
    pub fn canceled(message: impl Into<String>) -> Self {
        ToolOutput::Canceled {
            message: message.into(),
        }
    }

    /// Returns true if this output represents success.
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutput::Success { .. })
    }

    /// Returns the data if this is a successful output.
    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolOutput::Success { data, .. } => Some(data),
            ToolOutput::Failure { .. } | ToolOutput::Canceled { .. } => None,
        }
    }

    /// Returns the image content if present.
    pub fn image(&self) -> Option<&ImageContent> {
        match self {
            ToolOutput::Success { image, .. } => image.as_ref(),
            ToolOutput::Failure { .. } | ToolOutput::Canceled { .. } => None,
        }
    }

    /// Converts the tool output to a JSON value for event payloads.
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "ok": false,
                "error": {"code": "serialize_error", "message": "Failed to serialize tool output"}
            })
        })
    }

    /// Converts the tool output to a JSON string for sending to the model.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"ok":false,"error":{"code":"serialize_error","message":"Failed to serialize tool output"}}"#.to_string()
        })
    }
}

/// Error details for failed tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    /// Optional additional context for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Image content for vision-capable models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContent {
    /// MIME type (e.g., "image/png", "image/jpeg")
    pub mime_type: String,
    /// Base64-encoded image data
    pub data: String,
}

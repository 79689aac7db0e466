//! Conversation Turns
//!
//! Immutable conversation entries. Every constructor that can produce an
//! invalid turn returns a `Result`, and deserialization goes through the
//! same validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role of a turn's author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result (injected as context)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Function name and raw JSON arguments of a tool call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,

    /// JSON-encoded arguments exactly as the model produced them
    #[serde(default)]
    pub arguments: String,
}

/// Tool call requested by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call ID, echoed back on the tool result turn
    pub id: String,

    /// Always `"function"` on the wire
    #[serde(rename = "type", default = "default_call_kind")]
    pub kind: String,

    pub function: FunctionCall,
}

fn default_call_kind() -> String {
    "function".into()
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_call_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Unvalidated turn fields, as found on the wire
#[derive(Deserialize)]
struct RawTurn {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRequest>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

impl TryFrom<RawTurn> for Turn {
    type Error = Error;

    fn try_from(raw: RawTurn) -> Result<Self> {
        let mut turn = Turn::new(raw.role, raw.content, raw.tool_call_id, raw.tool_calls)?;
        turn.created_at = raw.created_at;
        Ok(turn)
    }
}

/// A single entry in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTurn")]
pub struct Turn {
    role: Role,

    content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallRequest>,

    created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a turn from its raw parts, validating role-specific rules
    pub fn new(
        role: Role,
        content: Option<String>,
        tool_call_id: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<Self> {
        match role {
            Role::Tool if tool_call_id.is_none() => {
                return Err(Error::validation("tool turn requires a tool_call_id"));
            }
            Role::Tool => {}
            _ if tool_call_id.is_some() => {
                return Err(Error::validation(format!(
                    "tool_call_id is only valid on tool turns, not {role}"
                )));
            }
            _ => {}
        }

        if role == Role::Assistant {
            if content.is_none() && tool_calls.is_empty() {
                return Err(Error::validation(
                    "assistant turn needs content or at least one tool call",
                ));
            }
        } else if !tool_calls.is_empty() {
            return Err(Error::validation(format!(
                "tool_calls are only valid on assistant turns, not {role}"
            )));
        }

        Ok(Self {
            role,
            content,
            tool_call_id,
            tool_calls,
            created_at: Utc::now(),
        })
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Create an assistant turn with text content
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Create an assistant turn carrying tool calls and no content
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Result<Self> {
        Self::new(Role::Assistant, None, None, tool_calls)
    }

    /// Create a tool result turn
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

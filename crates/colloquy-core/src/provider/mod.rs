//! LLM Provider Strategy Pattern
//!
//! Defines the seam between the orchestrator and vendor adapters (OpenAI,
//! Anthropic, Groq, Ollama, ...). An adapter receives a [`ProviderRequest`]
//! borrowing the live scope, translates it into its wire format, and maps the
//! reply back into a [`ProviderResponse`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use colloquy_core::provider::{Provider, ProviderRequest, ProviderResponse};
//!
//! struct MyAdapter { /* http client, model, credentials */ }
//!
//! #[async_trait]
//! impl Provider for MyAdapter {
//!     fn name(&self) -> &str { "my-vendor" }
//!
//!     async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse> {
//!         let system = request.system_prompt();
//!         let turns = request.turns();
//!         let tools = request.tools();
//!         // POST to the vendor, return Err on transport/protocol failure
//!     }
//! }
//! ```

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::capability::CapabilityDescription;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::scope::ConversationScope;
use crate::turn::{Role, ToolCallRequest, Turn};

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Vendor-specific reason, kept verbatim
    Other(String),
}

impl From<String> for FinishReason {
    fn from(reason: String) -> Self {
        match reason.as_str() {
            "stop" | "end_turn" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Other(reason),
        }
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => "stop".into(),
            FinishReason::Length => "length".into(),
            FinishReason::ToolCalls => "tool_calls".into(),
            FinishReason::ContentFilter => "content_filter".into(),
            FinishReason::Other(reason) => reason,
        }
    }
}

/// Assistant message inside a choice
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Always `assistant`
    #[serde(default = "assistant_role")]
    pub role: Role,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCallRequest>,
}

fn assistant_role() -> Role {
    Role::Assistant
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ToolCallRequest>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCallRequest>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One candidate answer from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,

    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl Choice {
    /// Plain text answer
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: AssistantMessage {
                role: Role::Assistant,
                content: Some(content.into()),
                tool_calls: Vec::new(),
            },
            finish_reason: Some(FinishReason::Stop),
        }
    }

    /// Answer requesting tool calls
    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            message: AssistantMessage {
                role: Role::Assistant,
                content: None,
                tool_calls,
            },
            finish_reason: Some(FinishReason::ToolCalls),
        }
    }
}

/// Response from a provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Empty means the model had nothing further to say
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ProviderResponse {
    pub fn new(choices: Vec<Choice>) -> Self {
        Self { choices }
    }

    /// Single plain text choice
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(vec![Choice::text(content)])
    }

    /// Single choice requesting tool calls
    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::new(vec![Choice::tool_calls(tool_calls)])
    }
}

/// What a provider sees when asked for a completion
#[derive(Clone, Copy)]
pub struct ProviderRequest<'a> {
    orchestrator: &'a Orchestrator,
    scope: &'a ConversationScope,
}

impl<'a> ProviderRequest<'a> {
    pub fn new(orchestrator: &'a Orchestrator, scope: &'a ConversationScope) -> Self {
        Self { orchestrator, scope }
    }

    pub fn orchestrator(&self) -> &'a Orchestrator {
        self.orchestrator
    }

    pub fn scope(&self) -> &'a ConversationScope {
        self.scope
    }

    /// Full conversation so far, inherited turns first
    pub fn turns(&self) -> Vec<Turn> {
        self.scope.turns()
    }

    /// Active directives joined into one block
    pub fn instructions(&self) -> Option<String> {
        self.scope.instruction_block(self.orchestrator)
    }

    /// Persona followed by the active directives
    pub fn system_prompt(&self) -> Option<String> {
        let persona = self.orchestrator.persona().trim();
        let persona = (!persona.is_empty()).then(|| persona.to_owned());

        match (persona, self.instructions()) {
            (Some(persona), Some(instructions)) => Some(format!("{persona}\n\n{instructions}")),
            (persona, instructions) => persona.or(instructions),
        }
    }

    /// Capabilities the model may call
    pub fn tools(&self) -> Vec<CapabilityDescription> {
        self.scope.capability_descriptions()
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends. Return `Err`
/// on any transport or protocol failure; the orchestrator handles failover.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "provider"
    }

    /// Generate a response for the current conversation
    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse>;
}

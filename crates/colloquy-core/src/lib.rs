//! # colloquy-core
//!
//! Conversation orchestration over interchangeable LLM providers, with
//! failover, tool-call resolution and hierarchical conversation scopes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  ┌──────────────┐  ┌────────────────────┐  ┌──────────────┐  │
//! │  │ converse()   │  │ ConversationScope  │  │  Providers   │  │
//! │  │ failover +   │──│ directives, tools, │──│  (Strategy)  │  │
//! │  │ tool loop    │  │ turns, ConfigStore │  │              │  │
//! │  └──────────────┘  └────────────────────┘  └──────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scopes inherit from parent scopes, so an organization-wide scope can
//! carry shared directives, capabilities and settings that every
//! conversation scope below it sees. The `Provider` trait is the only
//! contact point with vendor adapters.

pub mod capability;
pub mod config;
pub mod directive;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod scope;
pub mod turn;

mod lock;

pub use capability::{Capability, CapabilityDescription, CapabilityHandler, CapabilityOutput};
pub use config::ConfigStore;
pub use directive::Directive;
pub use error::{Error, Result};
pub use orchestrator::{ConversationOutcome, Orchestrator, OrchestratorBuilder, OrchestratorConfig};
pub use provider::{Choice, FinishReason, Provider, ProviderRequest, ProviderResponse};
pub use scope::{ConversationScope, ScopeId};
pub use turn::{FunctionCall, Role, ToolCallRequest, Turn};

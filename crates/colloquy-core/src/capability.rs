//! Capability System
//!
//! Named, described functions the model may call during a conversation.
//! A capability's identity is its name: scopes deduplicate by name only.
//!
//! ## Defining capabilities
//!
//! ```rust,ignore
//! use colloquy_core::{Capability, CapabilityOutput};
//! use serde_json::json;
//!
//! // Synchronous closure with declared parameters
//! let weather = Capability::from_fn(
//!     "get_weather",
//!     "Current weather for a city",
//!     [("city", "City name")],
//!     |_orchestrator, args| Ok(json!({ "city": args["city"], "sky": "clear" })),
//! )?;
//!
//! // Single implicit `input` parameter
//! let shout = Capability::simple("shout", "Upper-cases its input", |_o, input| {
//!     Ok(CapabilityOutput::text(input.to_uppercase()))
//! })?;
//! ```
//!
//! Async capabilities implement [`CapabilityHandler`] and use
//! [`Capability::new`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;

/// Parameter name used by [`Capability::simple`]
pub const SIMPLE_INPUT_PARAMETER: &str = "input";

/// Value returned by a capability, rendered into tool-result text.
///
/// Rendering policy:
///
/// | variant | rendered as |
/// |---|---|
/// | `Undefined` | `undefined` |
/// | `Function` | `[Function]` |
/// | `BigInt(n)` | decimal digits of `n` |
/// | `Json(v)` | compact JSON of `v` (strings are quoted) |
/// | `Rendered(s)` | `s` verbatim |
#[derive(Clone, Debug, PartialEq)]
pub enum CapabilityOutput {
    /// No value at all
    Undefined,
    /// A callable value that has no data representation
    Function,
    /// Integer too large for JSON numbers
    BigInt(i128),
    /// Any JSON value
    Json(Value),
    /// Final text, used as-is
    Rendered(String),
}

impl CapabilityOutput {
    /// Raw text, not JSON-quoted
    pub fn text(text: impl Into<String>) -> Self {
        Self::Rendered(text.into())
    }

    /// JSON-encode `value`, falling back to its `Display` form when
    /// serialization fails (cycles, non-string map keys and the like)
    pub fn from_serialize<T>(value: &T) -> Self
    where
        T: Serialize + fmt::Display + ?Sized,
    {
        match serde_json::to_string(value) {
            Ok(json) => Self::Rendered(json),
            Err(_) => Self::Rendered(value.to_string()),
        }
    }

    /// Tool-result text for this output
    pub fn render(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Function => "[Function]".into(),
            Self::BigInt(n) => n.to_string(),
            Self::Json(value) => value.to_string(),
            Self::Rendered(text) => text.clone(),
        }
    }
}

impl From<Value> for CapabilityOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<()> for CapabilityOutput {
    fn from((): ()) -> Self {
        Self::Undefined
    }
}

impl From<String> for CapabilityOutput {
    fn from(value: String) -> Self {
        Self::Json(Value::String(value))
    }
}

impl From<&str> for CapabilityOutput {
    fn from(value: &str) -> Self {
        Self::Json(Value::String(value.to_owned()))
    }
}

impl<T: Into<CapabilityOutput>> From<Option<T>> for CapabilityOutput {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Undefined, Into::into)
    }
}

/// Capability trait - implement for async capabilities
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Run the capability with parsed JSON arguments
    async fn invoke(&self, orchestrator: &Orchestrator, args: Value) -> Result<CapabilityOutput>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, O> CapabilityHandler for FnHandler<F>
where
    F: Fn(&Orchestrator, Value) -> Result<O> + Send + Sync,
    O: Into<CapabilityOutput> + Send,
{
    async fn invoke(&self, orchestrator: &Orchestrator, args: Value) -> Result<CapabilityOutput> {
        (self.0)(orchestrator, args).map(Into::into)
    }
}

/// JSON Schema fragment for a single parameter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Always `"string"`
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,
}

/// Object schema wrapping all parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParametersSchema {
    /// Always `"object"`
    #[serde(rename = "type")]
    pub schema_type: String,

    pub properties: BTreeMap<String, ParameterSchema>,
}

/// Capability definition as exposed to providers for function calling
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescription {
    /// Always `"function"`
    #[serde(rename = "type")]
    pub kind: String,

    pub name: String,

    pub description: String,

    pub parameters: ParametersSchema,
}

/// A named, described, invocable function
#[derive(Clone)]
pub struct Capability {
    name: String,
    description: String,
    parameters: BTreeMap<String, String>,
    handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    /// Create a capability backed by an async handler
    pub fn new<K, V>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: impl IntoIterator<Item = (K, V)>,
        handler: impl CapabilityHandler + 'static,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::with_handler(name, description, parameters, Arc::new(handler))
    }

    /// Create a capability from a shared handler
    pub fn with_handler<K, V>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: impl IntoIterator<Item = (K, V)>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let description = description.into();

        if name.trim().is_empty() {
            return Err(Error::validation("capability name must not be empty"));
        }
        if description.trim().is_empty() {
            return Err(Error::validation(format!(
                "capability '{name}' needs a description"
            )));
        }

        let mut schema = BTreeMap::new();
        for (param, param_description) in parameters {
            let param = param.into();
            if param.trim().is_empty() {
                return Err(Error::validation(format!(
                    "capability '{name}' has an unnamed parameter"
                )));
            }
            schema.insert(param, param_description.into());
        }

        Ok(Self {
            name,
            description,
            parameters: schema,
            handler,
        })
    }

    /// Create a capability from a synchronous closure
    pub fn from_fn<K, V, F, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: impl IntoIterator<Item = (K, V)>,
        f: F,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
        F: Fn(&Orchestrator, Value) -> Result<O> + Send + Sync + 'static,
        O: Into<CapabilityOutput> + Send + 'static,
    {
        Self::new(name, description, parameters, FnHandler(f))
    }

    /// Create a capability taking a single string `input` parameter.
    ///
    /// A missing `input` is passed as `""`; a non-string one as its JSON text.
    pub fn simple<F, O>(name: impl Into<String>, description: impl Into<String>, f: F) -> Result<Self>
    where
        F: Fn(&Orchestrator, &str) -> Result<O> + Send + Sync + 'static,
        O: Into<CapabilityOutput> + Send + 'static,
    {
        Self::from_fn(
            name,
            description,
            [(SIMPLE_INPUT_PARAMETER, "Input for the function")],
            move |orchestrator, args| {
                let input = match args.get(SIMPLE_INPUT_PARAMETER) {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                f(orchestrator, &input)
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameter name to description
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Run the capability
    pub async fn invoke(&self, orchestrator: &Orchestrator, args: Value) -> Result<CapabilityOutput> {
        self.handler.invoke(orchestrator, args).await
    }

    /// Whether both capabilities share the same handler instance
    pub fn same_handler(&self, other: &Capability) -> bool {
        Arc::ptr_eq(&self.handler, &other.handler)
    }

    /// Function-calling description for providers
    pub fn describe(&self) -> CapabilityDescription {
        let properties = self
            .parameters
            .iter()
            .map(|(name, description)| {
                let schema = ParameterSchema {
                    param_type: "string".into(),
                    description: description.clone(),
                };
                (name.clone(), schema)
            })
            .collect();

        CapabilityDescription {
            kind: "function".into(),
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: ParametersSchema {
                schema_type: "object".into(),
                properties,
            },
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

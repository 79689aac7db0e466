//! Directives
//!
//! Behavioral instructions injected into the system prompt, optionally
//! active only while a predicate over the orchestrator holds.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;

type Predicate = Arc<dyn Fn(&Orchestrator) -> bool + Send + Sync>;

/// A textual instruction for the model
#[derive(Clone)]
pub struct Directive {
    text: String,
    predicate: Predicate,
}

impl Directive {
    /// Create an unconditional directive
    pub fn new(text: impl Into<String>) -> Result<Self> {
        Self::when(text, |_| true)
    }

    /// Create a directive that only applies while `predicate` holds
    pub fn when<F>(text: impl Into<String>, predicate: F) -> Result<Self>
    where
        F: Fn(&Orchestrator) -> bool + Send + Sync + 'static,
    {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::validation("directive text must not be empty"));
        }

        Ok(Self {
            text,
            predicate: Arc::new(predicate),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate the predicate against `orchestrator`
    pub fn applies_to(&self, orchestrator: &Orchestrator) -> bool {
        (self.predicate)(orchestrator)
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

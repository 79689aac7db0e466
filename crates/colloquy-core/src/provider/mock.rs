//! Mock Provider
//!
//! For testing and demo purposes. Replays a scripted sequence of responses
//! and failures, then keeps repeating an optional fallback step.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Provider, ProviderRequest, ProviderResponse};
use crate::error::{Error, Result};
use crate::lock::lock;
use crate::turn::{ToolCallRequest, Turn};

/// One scripted provider reply
#[derive(Clone, Debug)]
pub enum Step {
    Respond(ProviderResponse),
    Fail(String),
}

/// Provider replaying a fixed script
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    /// Provider with an empty script. It fails every call until steps are
    /// queued.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::default(),
            fallback: None,
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::default(),
        }
    }

    /// Provider that fails every call
    pub fn failing(name: impl Into<String>) -> Self {
        Self::new(name).otherwise(Step::Fail("scripted outage".into()))
    }

    /// Queue a response
    pub fn respond(self, response: ProviderResponse) -> Self {
        self.step(Step::Respond(response))
    }

    /// Queue a single plain text answer
    pub fn respond_text(self, content: impl Into<String>) -> Self {
        self.respond(ProviderResponse::text(content))
    }

    /// Queue a single choice requesting tool calls
    pub fn respond_tool_calls(self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.respond(ProviderResponse::tool_calls(tool_calls))
    }

    /// Queue a failure
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.step(Step::Fail(message.into()))
    }

    pub fn step(self, step: Step) -> Self {
        lock(&self.script).push_back(step);
        self
    }

    /// Step to repeat once the script runs out
    pub fn otherwise(mut self, step: Step) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Conversation snapshot received on each call
    pub fn seen_turns(&self) -> Vec<Vec<Turn>> {
        lock(&self.seen).clone()
    }

    fn next_step(&self) -> Option<Step> {
        lock(&self.script)
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen).push(request.turns());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_step() {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(Error::ProviderUnavailable(message)),
            None => Err(Error::provider(format!("{}: script exhausted", self.name))),
        }
    }
}

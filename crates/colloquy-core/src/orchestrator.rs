//! Conversation Loop
//!
//! Drives one conversation turn to completion: asks a provider for a
//! response, executes any tool calls it requests, feeds the results back and
//! repeats until the model answers without tool calls.
//!
//! ## Provider failover
//!
//! ```text
//!   primary (all providers) ──fail──▶ secondary ──fail──▶ dropped
//!          │                              │
//!          └── random pick ◀── only when primary is empty
//! ```
//!
//! A provider is picked uniformly at random from `primary` while it has
//! members, otherwise from `secondary`. The first failure demotes it, the
//! second excludes it for the rest of the `converse` call.
//!
//! ## Round ceiling
//!
//! Each successful provider response is one round. A model that keeps asking
//! for tools stops after `max_rounds` rounds with `success == false`.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::capability::Capability;
use crate::directive::Directive;
use crate::error::{Error, Result};
use crate::provider::{AssistantMessage, Provider, ProviderRequest, ProviderResponse};
use crate::scope::ConversationScope;
use crate::turn::{Role, ToolCallRequest, Turn};

/// Tool result content when the model calls an unknown capability
pub const TOOL_NOT_FOUND: &str = "Tool not found";

/// Scope config key overriding [`OrchestratorConfig::max_rounds`]
pub const MAX_ROUNDS_KEY: &str = "max_rounds";

/// Environment variable read by [`OrchestratorConfig::from_env`]
pub const MAX_ROUNDS_ENV: &str = "COLLOQUY_MAX_ROUNDS";

/// Orchestrator configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Successful provider responses allowed per `converse` call
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    6
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self::from_max_rounds_var(std::env::var(MAX_ROUNDS_ENV).ok().as_deref())
    }

    /// Zero, unset and unparsable values fall back to the default
    fn from_max_rounds_var(value: Option<&str>) -> Self {
        let max_rounds = value
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or_else(default_max_rounds);

        Self { max_rounds }
    }
}

/// Result of a `converse` call
#[derive(Clone, Debug)]
pub struct ConversationOutcome {
    /// Full conversation, inherited turns included
    pub turns: Vec<Turn>,

    /// Whether the model finished without pending tool calls
    pub success: bool,

    /// Successful provider responses used
    pub rounds: usize,
}

impl ConversationOutcome {
    /// Content of the last assistant turn that has any
    pub fn reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.role() == Role::Assistant)
            .find_map(Turn::content)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pool {
    Primary,
    Secondary,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Primary => write!(f, "primary"),
            Pool::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Draw {
    index: usize,
    pool: Pool,
}

/// Failover bookkeeping by provider index
#[derive(Debug)]
struct ProviderPools {
    primary: Vec<usize>,
    secondary: Vec<usize>,
}

impl ProviderPools {
    fn new(len: usize) -> Self {
        Self {
            primary: (0..len).collect(),
            secondary: Vec::new(),
        }
    }

    fn draw(&self) -> Option<Draw> {
        let (pool, members) = if !self.primary.is_empty() {
            (Pool::Primary, &self.primary)
        } else {
            (Pool::Secondary, &self.secondary)
        };

        let index = *members.choose(&mut rand::thread_rng())?;
        Some(Draw { index, pool })
    }

    fn demote(&mut self, draw: Draw) {
        match draw.pool {
            Pool::Primary => {
                self.primary.retain(|&i| i != draw.index);
                self.secondary.push(draw.index);
            }
            Pool::Secondary => self.secondary.retain(|&i| i != draw.index),
        }
    }
}

/// Conversation orchestrator
pub struct Orchestrator {
    id_name: String,
    persona: String,
    scope: Arc<ConversationScope>,
    providers: Vec<Arc<dyn Provider>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn builder(id_name: impl Into<String>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(id_name)
    }

    pub fn id_name(&self) -> &str {
        &self.id_name
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// The scope `converse` appends to
    pub fn scope(&self) -> &Arc<ConversationScope> {
        &self.scope
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one user prompt to completion in the orchestrator's own scope
    pub async fn converse(&self, prompt: impl Into<String>) -> ConversationOutcome {
        self.converse_in(prompt, &self.scope).await
    }

    /// Run one user prompt to completion in `scope` instead of the
    /// orchestrator's own scope
    pub async fn converse_in(
        &self,
        prompt: impl Into<String>,
        scope: &ConversationScope,
    ) -> ConversationOutcome {
        let span = tracing::info_span!(
            "converse",
            orchestrator = %self.id_name,
            scope = %scope.id(),
        );

        self.run(prompt.into(), scope).instrument(span).await
    }

    async fn run(&self, prompt: String, scope: &ConversationScope) -> ConversationOutcome {
        scope.push_turn(Turn::user(prompt));

        let max_rounds = self.max_rounds(scope);
        let mut pools = ProviderPools::new(self.providers.len());
        let mut rounds = 0;

        let outcome = |success, rounds| ConversationOutcome {
            turns: scope.turns(),
            success,
            rounds,
        };

        while let Some(draw) = pools.draw() {
            let provider = &self.providers[draw.index];
            tracing::debug!(provider = provider.name(), pool = %draw.pool, "Requesting completion");

            let response = match provider.complete(ProviderRequest::new(self, scope)).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        pool = %draw.pool,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Provider failed"
                    );
                    pools.demote(draw);
                    continue;
                }
            };

            rounds += 1;

            if !self.apply_response(response, scope).await {
                tracing::info!(rounds, provider = provider.name(), "Conversation converged");
                return outcome(true, rounds);
            }

            if rounds >= max_rounds {
                tracing::warn!(max_rounds, "Round limit reached with tool calls pending");
                return outcome(false, rounds);
            }
        }

        tracing::warn!(rounds, "All providers exhausted");
        outcome(false, rounds)
    }

    /// Record a response in `scope`, running any requested tools.
    /// Returns whether tool results are waiting for the model.
    async fn apply_response(&self, response: ProviderResponse, scope: &ConversationScope) -> bool {
        let mut pending = false;

        for choice in response.choices {
            let AssistantMessage {
                content, tool_calls, ..
            } = choice.message;

            if let Some(content) = content {
                scope.push_turn(Turn::assistant(content));
            }

            // only fails when there are no tool calls
            let Ok(request_turn) = Turn::assistant_tool_calls(tool_calls.clone()) else {
                continue;
            };
            scope.push_turn(request_turn);
            pending = true;

            let capabilities = scope.capabilities();
            let results = join_all(
                tool_calls
                    .iter()
                    .map(|call| self.execute_tool(call, &capabilities)),
            )
            .await;

            scope.extend_turns(results);
        }

        pending
    }

    /// Execute a tool call, turning every failure into tool-result text
    async fn execute_tool(&self, call: &ToolCallRequest, capabilities: &[Capability]) -> Turn {
        let Some(capability) = capabilities.iter().find(|c| c.name() == call.name()) else {
            tracing::warn!(tool = %call.name(), "Model requested an unknown tool");
            return Turn::tool(call.id.clone(), TOOL_NOT_FOUND);
        };

        let content = match parse_arguments(&call.function.arguments) {
            Ok(args) => {
                tracing::debug!(tool = %call.name(), call_id = %call.id, "Executing tool");
                match capability.invoke(self, args).await {
                    Ok(output) => output.render(),
                    Err(e) => {
                        tracing::debug!(tool = %call.name(), error = %e, "Tool failed");
                        e.to_string()
                    }
                }
            }
            Err(e) => {
                tracing::debug!(tool = %call.name(), error = %e, "Rejected tool arguments");
                e.to_string()
            }
        };

        Turn::tool(call.id.clone(), content)
    }

    fn max_rounds(&self, scope: &ConversationScope) -> usize {
        match scope.config().get_parsed::<usize>(MAX_ROUNDS_KEY) {
            Ok(Some(n)) if n > 0 => n,
            Ok(_) => self.config.max_rounds,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring scope round limit");
                self.config.max_rounds
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<_> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("Orchestrator")
            .field("id_name", &self.id_name)
            .field("persona", &self.persona)
            .field("scope", &self.scope.id())
            .field("providers", &providers)
            .field("config", &self.config)
            .finish()
    }
}

/// Parse raw tool arguments; blank input means no arguments
fn parse_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    serde_json::from_str(raw).map_err(|e| Error::ToolArguments(e.to_string()))
}

/// Builder for Orchestrator configuration
pub struct OrchestratorBuilder {
    id_name: String,
    persona: String,
    scope: Option<Arc<ConversationScope>>,
    providers: Vec<Arc<dyn Provider>>,
    capabilities: Vec<Capability>,
    directives: Vec<Directive>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new(id_name: impl Into<String>) -> Self {
        Self {
            id_name: id_name.into(),
            persona: String::new(),
            scope: None,
            providers: Vec::new(),
            capabilities: Vec::new(),
            directives: Vec::new(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn provider<P: Provider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn shared_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: Vec<Arc<dyn Provider>>) -> Self {
        self.providers = providers;
        self
    }

    /// Use an existing (possibly shared) scope instead of a fresh one
    pub fn scope(mut self, scope: Arc<ConversationScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Add a local capability to the scope
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Add a local directive to the scope
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        if self.id_name.trim().is_empty() {
            return Err(Error::validation("orchestrator id_name must not be empty"));
        }
        if self.config.max_rounds == 0 {
            return Err(Error::validation("max_rounds must be at least 1"));
        }

        let scope = self
            .scope
            .unwrap_or_else(|| Arc::new(ConversationScope::new()));
        for capability in self.capabilities {
            scope.add_capability(capability);
        }
        for directive in self.directives {
            scope.add_directive(directive);
        }

        Ok(Orchestrator {
            id_name: self.id_name,
            persona: self.persona,
            scope,
            providers: self.providers,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Barrier;

    use super::*;
    use crate::capability::{CapabilityHandler, CapabilityOutput};
    use crate::provider::Choice;
    use crate::provider::mock::{ScriptedProvider, Step};

    /// Always fails and records its index in a shared log
    struct LoggedFailure {
        index: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Provider for LoggedFailure {
        async fn complete(&self, _: ProviderRequest<'_>) -> Result<ProviderResponse> {
            self.log.lock().unwrap().push(self.index);
            Err(Error::ProviderUnavailable("down".into()))
        }
    }

    struct Rendezvous(Arc<Barrier>);

    #[async_trait]
    impl CapabilityHandler for Rendezvous {
        async fn invoke(&self, _: &Orchestrator, _: Value) -> Result<CapabilityOutput> {
            self.0.wait().await;
            Ok(CapabilityOutput::text("met"))
        }
    }

    fn weather() -> Capability {
        Capability::from_fn("get_weather", "Current weather", [("city", "City")], |_, args| {
            Ok(json!({ "city": args["city"], "sky": "clear" }))
        })
        .unwrap()
    }

    fn tool_result_contents(outcome: &ConversationOutcome) -> Vec<String> {
        outcome
            .turns
            .iter()
            .filter(|t| t.role() == Role::Tool)
            .filter_map(|t| t.content().map(str::to_owned))
            .collect()
    }

    #[tokio::test]
    async fn test_plain_answer_converges() {
        let orchestrator = Orchestrator::builder("assistant")
            .provider(ScriptedProvider::new("only").respond_text("hello"))
            .build()
            .unwrap();

        let outcome = orchestrator.converse("hi").await;

        assert!(outcome.success);
        assert_eq!(outcome.rounds, 1);
        let last = outcome.turns.last().unwrap();
        assert_eq!(last.role(), Role::Assistant);
        assert_eq!(last.content(), Some("hello"));
        assert_eq!(outcome.reply(), Some("hello"));
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let call = ToolCallRequest::new("call_1", "get_weather", r#"{"city":"Madrid"}"#);
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .respond_tool_calls(vec![call])
                .respond_text("It is clear in Madrid."),
        );

        let orchestrator = Orchestrator::builder("assistant")
            .shared_provider(Arc::clone(&provider) as Arc<dyn Provider>)
            .capability(weather())
            .build()
            .unwrap();

        let outcome = orchestrator.converse("Weather in Madrid?").await;

        assert!(outcome.success);
        assert_eq!(provider.calls(), 2);
        let roles: Vec<_> = outcome.turns.iter().map(Turn::role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(outcome.turns[1].tool_calls()[0].id, "call_1");
        assert_eq!(outcome.turns[2].tool_call_id(), Some("call_1"));
        assert_eq!(
            outcome.turns[2].content(),
            Some(r#"{"city":"Madrid","sky":"clear"}"#)
        );
        assert_eq!(outcome.reply(), Some("It is clear in Madrid."));

        // the second request already carried the tool result
        let seen = provider.seen_turns();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2].role(), Role::Tool);
    }

    #[tokio::test]
    async fn test_all_providers_failing() {
        let orchestrator = Orchestrator::builder("assistant")
            .provider(ScriptedProvider::failing("a"))
            .provider(ScriptedProvider::failing("b"))
            .build()
            .unwrap();

        let outcome = orchestrator.converse("x").await;

        assert!(!outcome.success);
        assert_eq!(outcome.rounds, 0);
        assert_eq!(outcome.turns.len(), 1);
        assert_eq!(outcome.turns[0].role(), Role::User);
        assert_eq!(outcome.turns[0].content(), Some("x"));
    }

    #[tokio::test]
    async fn test_no_providers() {
        let orchestrator = Orchestrator::builder("assistant").build().unwrap();
        let outcome = orchestrator.converse("anyone?").await;
        assert!(!outcome.success);
        assert_eq!(outcome.turns.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_provider_waits_for_secondary_pool() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let providers: Vec<Arc<dyn Provider>> = (0..3)
            .map(|index| {
                Arc::new(LoggedFailure {
                    index,
                    log: Arc::clone(&log),
                }) as Arc<dyn Provider>
            })
            .collect();

        let orchestrator = Orchestrator::builder("assistant")
            .providers(providers)
            .build()
            .unwrap();
        let outcome = orchestrator.converse("x").await;
        assert!(!outcome.success);

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 6);
        // every provider gets one primary attempt before any second attempt
        let first: HashSet<_> = calls[..3].iter().copied().collect();
        let second: HashSet<_> = calls[3..].iter().copied().collect();
        assert_eq!(first, HashSet::from([0, 1, 2]));
        assert_eq!(second, HashSet::from([0, 1, 2]));
    }

    #[tokio::test]
    async fn test_broken_provider_never_answers() {
        for _ in 0..20 {
            let broken = Arc::new(ScriptedProvider::failing("broken"));
            let orchestrator = Orchestrator::builder("assistant")
                .shared_provider(Arc::clone(&broken) as Arc<dyn Provider>)
                .provider(ScriptedProvider::new("b").respond_text("from b"))
                .provider(ScriptedProvider::new("c").respond_text("from c"))
                .build()
                .unwrap();

            let outcome = orchestrator.converse("x").await;

            assert!(outcome.success);
            assert!(broken.calls() <= 1);
            assert_ne!(outcome.reply(), None);
        }
    }

    #[tokio::test]
    async fn test_secondary_provider_can_still_answer() {
        let flaky = ScriptedProvider::new("flaky").fail("blip").respond_text("recovered");
        let orchestrator = Orchestrator::builder("assistant")
            .provider(flaky)
            .build()
            .unwrap();

        let outcome = orchestrator.converse("x").await;

        assert!(outcome.success);
        assert_eq!(outcome.reply(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_round_limit_stops_tool_loop() {
        let call = ToolCallRequest::new("call_loop", "get_weather", r#"{"city":"Oslo"}"#);
        let looping = Arc::new(
            ScriptedProvider::new("looping")
                .otherwise(Step::Respond(ProviderResponse::tool_calls(vec![call]))),
        );

        let orchestrator = Orchestrator::builder("assistant")
            .shared_provider(Arc::clone(&looping) as Arc<dyn Provider>)
            .capability(weather())
            .max_rounds(3)
            .build()
            .unwrap();

        let outcome = orchestrator.converse("loop forever").await;

        assert!(!outcome.success);
        assert_eq!(outcome.rounds, 3);
        assert_eq!(looping.calls(), 3);
        // user + 3 x (assistant tool call + tool result)
        assert_eq!(outcome.turns.len(), 7);
    }

    #[tokio::test]
    async fn test_scope_config_overrides_round_limit() {
        let call = ToolCallRequest::new("call_loop", "get_weather", "{}");
        let orchestrator = Orchestrator::builder("assistant")
            .provider(
                ScriptedProvider::new("looping")
                    .otherwise(Step::Respond(ProviderResponse::tool_calls(vec![call]))),
            )
            .capability(weather())
            .build()
            .unwrap();
        orchestrator.scope().config().set(MAX_ROUNDS_KEY, "2");

        let outcome = orchestrator.converse("x").await;
        assert_eq!(outcome.rounds, 2);

        orchestrator.scope().config().set(MAX_ROUNDS_KEY, "lots");
        let outcome = orchestrator.converse("y").await;
        assert_eq!(outcome.rounds, default_max_rounds());
    }

    #[tokio::test]
    async fn test_tool_failures_become_tool_turns() {
        let failing = Capability::simple("explode", "Always fails", |_, _| {
            Err::<(), _>(Error::tool("kaboom"))
        })
        .unwrap();

        let calls = vec![
            ToolCallRequest::new("c1", "missing_tool", "{}"),
            ToolCallRequest::new("c2", "explode", ""),
            ToolCallRequest::new("c3", "get_weather", "{not json"),
            ToolCallRequest::new("c4", "get_weather", ""),
        ];

        let orchestrator = Orchestrator::builder("assistant")
            .provider(
                ScriptedProvider::new("scripted")
                    .respond_tool_calls(calls)
                    .respond_text("done"),
            )
            .capability(failing)
            .capability(weather())
            .build()
            .unwrap();

        let outcome = orchestrator.converse("go").await;
        assert!(outcome.success);

        let results = tool_result_contents(&outcome);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0], TOOL_NOT_FOUND);
        assert_eq!(results[1], "kaboom");
        assert!(results[2].starts_with("Invalid tool arguments:"));
        assert_eq!(results[3], r#"{"city":null,"sky":"clear"}"#);

        let ids: Vec<_> = outcome.turns.iter().filter_map(Turn::tool_call_id).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
    }

    #[tokio::test]
    async fn test_tools_run_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let no_params: [(&str, &str); 0] = [];
        let left = Capability::new("left", "Waits for right", no_params, Rendezvous(Arc::clone(&barrier)))
            .unwrap();
        let right = Capability::new("right", "Waits for left", no_params, Rendezvous(barrier)).unwrap();

        let orchestrator = Orchestrator::builder("assistant")
            .provider(
                ScriptedProvider::new("scripted")
                    .respond_tool_calls(vec![
                        ToolCallRequest::new("l", "left", ""),
                        ToolCallRequest::new("r", "right", ""),
                    ])
                    .respond_text("both met"),
            )
            .capability(left)
            .capability(right)
            .build()
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), orchestrator.converse("meet"))
            .await
            .expect("sequential tool execution would deadlock on the barrier");

        assert!(outcome.success);
        assert_eq!(tool_result_contents(&outcome), vec!["met", "met"]);
    }

    #[tokio::test]
    async fn test_multiple_choices_in_order() {
        let response = ProviderResponse::new(vec![
            Choice::text("thinking out loud"),
            Choice::tool_calls(vec![ToolCallRequest::new("c1", "get_weather", "{}")]),
        ]);
        let orchestrator = Orchestrator::builder("assistant")
            .provider(
                ScriptedProvider::new("scripted")
                    .respond(response)
                    .respond_text("final"),
            )
            .capability(weather())
            .build()
            .unwrap();

        let outcome = orchestrator.converse("q").await;

        assert!(outcome.success);
        let roles: Vec<_> = outcome.turns.iter().map(Turn::role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(outcome.turns[1].content(), Some("thinking out loud"));
        assert!(outcome.turns[2].content().is_none());
    }

    #[tokio::test]
    async fn test_empty_choices_converge() {
        let orchestrator = Orchestrator::builder("assistant")
            .provider(ScriptedProvider::new("quiet").respond(ProviderResponse::default()))
            .build()
            .unwrap();

        let outcome = orchestrator.converse("anything?").await;

        assert!(outcome.success);
        assert_eq!(outcome.turns.len(), 1);
        assert_eq!(outcome.reply(), None);
    }

    #[tokio::test]
    async fn test_converse_in_detached_scope() {
        let orchestrator = Orchestrator::builder("assistant")
            .provider(
                ScriptedProvider::new("scripted")
                    .respond_text("first")
                    .respond_text("second"),
            )
            .build()
            .unwrap();

        orchestrator.converse("kept").await;
        let detached = orchestrator.scope().child();
        let outcome = orchestrator.converse_in("aside", &detached).await;

        assert_eq!(outcome.turns.len(), 4);
        assert_eq!(orchestrator.scope().turns().len(), 2);
        assert_eq!(detached.local_turns().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_converse_accumulates() {
        let orchestrator = Orchestrator::builder("assistant")
            .provider(
                ScriptedProvider::new("scripted")
                    .respond_text("one")
                    .respond_text("two"),
            )
            .build()
            .unwrap();

        orchestrator.converse("a").await;
        let outcome = orchestrator.converse("b").await;

        let contents: Vec<_> = outcome.turns.iter().filter_map(Turn::content).collect();
        assert_eq!(contents, vec!["a", "one", "b", "two"]);
    }

    #[tokio::test]
    async fn test_shared_scope_across_tasks() {
        let shared = Arc::new(ConversationScope::new());
        let build = |name: &str| {
            Arc::new(
                Orchestrator::builder(name)
                    .scope(Arc::clone(&shared))
                    .provider(
                        ScriptedProvider::new("slow")
                            .respond_text(format!("{name} done"))
                            .with_delay(Duration::from_millis(10)),
                    )
                    .build()
                    .unwrap(),
            )
        };

        let first = build("first");
        let second = build("second");
        let a = tokio::spawn(async move { first.converse("from first").await });
        let b = tokio::spawn(async move { second.converse("from second").await });
        assert!(a.await.unwrap().success);
        assert!(b.await.unwrap().success);

        assert_eq!(shared.turns().len(), 4);
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            Orchestrator::builder(" ").build(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Orchestrator::builder("x").max_rounds(0).build(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        assert_eq!(OrchestratorConfig::default().max_rounds, 6);
        let parsed: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.max_rounds, 6);
    }

    #[test]
    fn test_max_rounds_from_env_value() {
        assert_eq!(OrchestratorConfig::from_max_rounds_var(Some("3")).max_rounds, 3);
        assert_eq!(OrchestratorConfig::from_max_rounds_var(Some(" 12 ")).max_rounds, 12);
        assert_eq!(OrchestratorConfig::from_max_rounds_var(Some("0")).max_rounds, 6);
        assert_eq!(OrchestratorConfig::from_max_rounds_var(Some("lots")).max_rounds, 6);
        assert_eq!(OrchestratorConfig::from_max_rounds_var(None).max_rounds, 6);
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments("  ").unwrap(), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(parse_arguments("{"), Err(Error::ToolArguments(_))));
    }

    #[test]
    fn test_pools_demote_then_drop() {
        let mut pools = ProviderPools::new(2);
        let draw = Draw { index: 1, pool: Pool::Primary };
        pools.demote(draw);
        assert_eq!(pools.primary, vec![0]);
        assert_eq!(pools.secondary, vec![1]);

        // primary members are always drawn first
        assert_eq!(pools.draw().map(|d| d.index), Some(0));

        pools.demote(Draw { index: 0, pool: Pool::Primary });
        pools.demote(Draw { index: 1, pool: Pool::Secondary });
        assert_eq!(pools.draw().map(|d| (d.index, d.pool)), Some((0, Pool::Secondary)));

        pools.demote(Draw { index: 0, pool: Pool::Secondary });
        assert!(pools.draw().is_none());
    }
}

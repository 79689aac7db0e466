//! Conversation Scopes
//!
//! A scope combines inherited state from parent scopes with its own local
//! directives, capabilities, turns and configuration. Inherited views are
//! recomputed on every read, so changes to a parent show up in its children
//! immediately.
//!
//! | view | composition |
//! |---|---|
//! | `directives` | parents in order, then local (accumulate) |
//! | `capabilities` | parents in order, then local; same name replaces |
//! | `turns` | parents in order, then local (chronological) |
//! | `config` | local store with each parent's store as a broker |
//!
//! Scopes are shared as `Arc<ConversationScope>`; every local slice sits
//! behind its own lock, so several orchestrators may append to one scope.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{Capability, CapabilityDescription};
use crate::config::ConfigStore;
use crate::directive::Directive;
use crate::lock::{read, write};
use crate::orchestrator::Orchestrator;
use crate::turn::Turn;

/// Unique scope identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inherited and local conversation state
#[derive(Debug)]
pub struct ConversationScope {
    id: ScopeId,
    parents: Vec<Arc<ConversationScope>>,
    directives: RwLock<Vec<Directive>>,
    capabilities: RwLock<Vec<Capability>>,
    turns: RwLock<Vec<Turn>>,
    config: Arc<ConfigStore>,
}

impl Default for ConversationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationScope {
    /// Create a root scope
    pub fn new() -> Self {
        Self::with_parents(Vec::new())
    }

    /// Create a scope inheriting from `parents` (in order)
    pub fn with_parents(parents: Vec<Arc<ConversationScope>>) -> Self {
        let config = ConfigStore::with_brokers(parents.iter().map(|p| Arc::clone(&p.config)));

        Self {
            id: ScopeId::new(),
            parents,
            directives: RwLock::default(),
            capabilities: RwLock::default(),
            turns: RwLock::default(),
            config: Arc::new(config),
        }
    }

    /// Create a fresh scope whose only parent is `self`.
    ///
    /// Turns appended to the child stay out of the parent, which makes this
    /// the usual detached scope for a one-off conversation.
    pub fn child(self: &Arc<Self>) -> Self {
        Self::with_parents(vec![Arc::clone(self)])
    }

    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    pub fn parents(&self) -> &[Arc<ConversationScope>] {
        &self.parents
    }

    /// Local store backed by every parent's store (last parent wins)
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    // ------------------------------------------------------------------
    // Directives
    // ------------------------------------------------------------------

    /// Inherited directives followed by local ones
    pub fn directives(&self) -> Vec<Directive> {
        let mut all: Vec<_> = self.parents.iter().flat_map(|p| p.directives()).collect();
        all.extend(read(&self.directives).iter().cloned());
        all
    }

    pub fn local_directives(&self) -> Vec<Directive> {
        read(&self.directives).clone()
    }

    /// Replace the local directives; inherited ones are untouched
    pub fn set_directives(&self, directives: Vec<Directive>) {
        *write(&self.directives) = directives;
    }

    pub fn add_directive(&self, directive: Directive) {
        write(&self.directives).push(directive);
    }

    /// Text of every directive whose predicate holds for `orchestrator`,
    /// separated by blank lines
    pub fn instruction_block(&self, orchestrator: &Orchestrator) -> Option<String> {
        let active: Vec<_> = self
            .directives()
            .into_iter()
            .filter(|d| d.applies_to(orchestrator))
            .map(|d| d.text().to_owned())
            .collect();

        if active.is_empty() {
            None
        } else {
            Some(active.join("\n\n"))
        }
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    /// Inherited capabilities overlaid with local ones, one per name.
    ///
    /// A name keeps the position where it first appeared; its value comes
    /// from the last definition (later parents over earlier, local over all).
    pub fn capabilities(&self) -> Vec<Capability> {
        let inherited = self.parents.iter().flat_map(|p| p.capabilities());
        let local = read(&self.capabilities).clone();
        dedup_by_name(inherited.chain(local))
    }

    pub fn local_capabilities(&self) -> Vec<Capability> {
        dedup_by_name(read(&self.capabilities).iter().cloned())
    }

    /// Look up a capability in the inherited view
    pub fn capability(&self, name: &str) -> Option<Capability> {
        self.capabilities().into_iter().find(|c| c.name() == name)
    }

    /// Replace the local capabilities; inherited ones are untouched
    pub fn set_capabilities(&self, capabilities: Vec<Capability>) {
        *write(&self.capabilities) = capabilities;
    }

    pub fn add_capability(&self, capability: Capability) {
        write(&self.capabilities).push(capability);
    }

    /// Function-calling descriptions of every visible capability
    pub fn capability_descriptions(&self) -> Vec<CapabilityDescription> {
        self.capabilities().iter().map(Capability::describe).collect()
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Inherited turns followed by local ones
    pub fn turns(&self) -> Vec<Turn> {
        let mut all: Vec<_> = self.parents.iter().flat_map(|p| p.turns()).collect();
        all.extend(read(&self.turns).iter().cloned());
        all
    }

    pub fn local_turns(&self) -> Vec<Turn> {
        read(&self.turns).clone()
    }

    /// Replace the local turns; inherited ones are untouched
    pub fn set_turns(&self, turns: Vec<Turn>) {
        *write(&self.turns) = turns;
    }

    pub fn push_turn(&self, turn: Turn) {
        write(&self.turns).push(turn);
    }

    /// Append a batch of turns under one lock
    pub fn extend_turns(&self, turns: impl IntoIterator<Item = Turn>) {
        write(&self.turns).extend(turns);
    }
}

fn dedup_by_name(capabilities: impl IntoIterator<Item = Capability>) -> Vec<Capability> {
    let mut slots: Vec<Capability> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for capability in capabilities {
        match index.get(capability.name()) {
            Some(&slot) => slots[slot] = capability,
            None => {
                index.insert(capability.name().to_owned(), slots.len());
                slots.push(capability);
            }
        }
    }

    slots
}

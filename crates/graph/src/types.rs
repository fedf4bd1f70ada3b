//! Typed structs representing the state-unit JSON shape.
//!
//! These types cover the superset of fields consumed by the compiler
//! crate and the CLI. Deeply nested or genuinely free-form leaves (step
//! arguments, navigation hints, expected values) are kept as
//! `serde_json::Value` so that each consumer can interpret them with its
//! own rules instead of forcing a lossy parse here.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::ExprNode;

/// A loaded state unit: one screen's lifecycle definition.
#[derive(Debug, Clone, Serialize)]
pub struct StateUnit {
    /// Unit basename without extension (e.g. `booking-draft`).
    pub name: String,
    pub graph: StateGraph,
}

/// A state graph is either a single state at the root, or a root with
/// `initial` + `states`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StateGraph {
    Single(StateNode),
    Multi {
        initial: String,
        states: BTreeMap<String, StateNode>,
    },
}

impl StateGraph {
    /// Look up a node: `None` selects the single state or the initial
    /// state of a multi-state graph; `Some(name)` selects a named
    /// sub-state (and returns `None` if absent).
    pub fn node(&self, sub_state: Option<&str>) -> Option<&StateNode> {
        match (self, sub_state) {
            (StateGraph::Single(node), None) => Some(node),
            (StateGraph::Single(_), Some(_)) => None,
            (StateGraph::Multi { initial, states }, None) => states.get(initial),
            (StateGraph::Multi { states, .. }, Some(name)) => states.get(name),
        }
    }

    /// All addressable state names, in deterministic order. A
    /// single-state graph has no sub-state names.
    pub fn state_names(&self) -> Vec<&str> {
        match self {
            StateGraph::Single(_) => Vec::new(),
            StateGraph::Multi { states, .. } => states.keys().map(String::as_str).collect(),
        }
    }

    /// Iterate every node in the graph with its sub-state name (empty
    /// for a single-state graph).
    pub fn nodes(&self) -> Vec<(&str, &StateNode)> {
        match self {
            StateGraph::Single(node) => vec![("", node)],
            StateGraph::Multi { states, .. } => states
                .iter()
                .map(|(name, node)| (name.as_str(), node))
                .collect(),
        }
    }
}

/// One state record: metadata, entry delta, outgoing transitions.
#[derive(Debug, Clone, Serialize)]
pub struct StateNode {
    pub meta: StateMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntryAssign>,
    /// Event name → transition, ordered for deterministic traversal.
    pub on: BTreeMap<String, TransitionSpec>,
}

/// Flat metadata attached to a state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    /// Platforms this state applies to; empty means all.
    pub platforms: Vec<String>,
    /// Owning entity name (e.g. `booking`), used to normalize
    /// entity-prefixed delta fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub required_fields: Vec<String>,
    /// Ordered per-platform setup entries.
    pub setup: Vec<SetupEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Explicit action-name override for inducer states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    /// Per-screen validation definitions, block format. Legacy
    /// `{visible, hidden, checks}` units are normalized into this shape
    /// at deserialization time.
    pub screens: Vec<ValidationScreen>,
}

/// One ordered setup entry (`platform` empty means all platforms).
#[derive(Debug, Clone, Serialize)]
pub struct SetupEntry {
    pub platform: String,
    pub instance: String,
    pub method: String,
    pub args: Vec<serde_json::Value>,
}

/// The delta fields applied on entering a state.
#[derive(Debug, Clone, Serialize)]
pub struct EntryAssign {
    pub fields: BTreeMap<String, ExprNode>,
}

/// A transition record under a state's `on` mapping.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionSpec {
    pub target: String,
    /// Platforms this transition applies to; empty means all.
    pub platforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_details: Option<ActionDetails>,
}

/// Action metadata attached to a transition.
#[derive(Debug, Clone, Serialize)]
pub struct ActionDetails {
    pub imports: Vec<ImportRef>,
    pub steps: Vec<ActionStep>,
}

/// An external reference a transition's steps need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRef {
    pub class_name: String,
    pub path: String,
    pub var_name: String,
}

/// One ordered action step.
#[derive(Debug, Clone, Serialize)]
pub struct ActionStep {
    pub instance: String,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Value>,
}

/// A fully resolved incoming transition (edge plus action metadata).
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub event: String,
    pub from: String,
    pub to: String,
    pub platforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_details: Option<ActionDetails>,
}

// ── Validation screens ──────────────────────────────────────────────

/// One screen's ordered validation definition, block format.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationScreen {
    pub screen_key: String,
    pub order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation: Option<serde_json::Value>,
    pub blocks: Vec<Block>,
}

/// A heterogeneous validation block.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub enabled: bool,
    pub order: i64,
    pub data: BlockData,
}

/// Type-specific block payload, dispatched on the JSON `type` field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BlockData {
    UiAssertion {
        visible: Vec<String>,
        hidden: Vec<String>,
        text_checks: Vec<TextCheck>,
        /// Function-based assertions. Presence forces raw emission mode.
        assertions: Vec<FunctionAssertion>,
    },
    FunctionCall {
        instance: String,
        method: String,
        args: Vec<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        store_as: Option<String>,
    },
    DataAssertion {
        field: String,
        expected: serde_json::Value,
    },
    CustomCode {
        code: String,
    },
}

impl Block {
    /// The `store_as` binding this block declares, if any.
    pub fn store_as(&self) -> Option<&str> {
        match &self.data {
            BlockData::FunctionCall { store_as, .. } => store_as.as_deref(),
            _ => None,
        }
    }
}

/// A text-content expectation on an element field.
#[derive(Debug, Clone, Serialize)]
pub struct TextCheck {
    pub field: String,
    pub expected: serde_json::Value,
}

/// A raw function-based assertion (`expect(await screen.total()).toBe(3)`
/// style). Stored verbatim; structured mode cannot express these.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionAssertion {
    pub call: String,
    pub expected: serde_json::Value,
}

//! Minimal expression AST for entry-assignment deltas and lenient unit
//! reconstruction.
//!
//! State units authored by the visual editor keep entry deltas as plain
//! JSON literals, but units exported from older projects carry function
//! sources, call expressions, and template strings in the same position.
//! Rather than failing the whole load, those degrade to a first-class
//! [`ExprNode::Opaque`] variant that keeps the raw text for diagnostics
//! and textual classification.

use std::collections::BTreeMap;
use std::fmt;

/// Why a node could not be represented as a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpaqueKind {
    /// A function source (`function (...) {...}` or an arrow function).
    Function,
    /// A bare call expression (`helperName(...)`).
    Call,
    /// A template string with interpolation (`` `...${...}...` ``).
    Template,
}

impl OpaqueKind {
    /// Placeholder marker used when rendering the node.
    pub fn marker(&self) -> &'static str {
        match self {
            OpaqueKind::Function => "<function>",
            OpaqueKind::Call => "<call>",
            OpaqueKind::Template => "<template>",
        }
    }
}

impl fmt::Display for OpaqueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// A value in a state unit, as reconstructed from JSON.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum ExprNode {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Str(String),
    Array(Vec<ExprNode>),
    Object(BTreeMap<String, ExprNode>),
    /// A node that cannot be represented as a literal. `raw` keeps the
    /// original text so classifiers can still inspect it.
    Opaque { kind: OpaqueKind, raw: String },
}

impl ExprNode {
    /// Structural reconstruction: every JSON value maps to the matching
    /// literal variant, strings included. Used for values that are plain
    /// data by contract (step arguments, navigation).
    pub fn from_value(v: &serde_json::Value) -> ExprNode {
        match v {
            serde_json::Value::Null => ExprNode::Null,
            serde_json::Value::Bool(b) => ExprNode::Bool(*b),
            serde_json::Value::Number(n) => ExprNode::Number(n.clone()),
            serde_json::Value::String(s) => ExprNode::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ExprNode::Array(items.iter().map(ExprNode::from_value).collect())
            }
            serde_json::Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (k, val) in map {
                    fields.insert(k.clone(), ExprNode::from_value(val));
                }
                ExprNode::Object(fields)
            }
        }
    }

    /// Lenient reconstruction for entry-assignment positions: strings
    /// that carry executable source are demoted to [`ExprNode::Opaque`]
    /// instead of being treated as string literals.
    pub fn from_source_value(v: &serde_json::Value) -> ExprNode {
        match v {
            serde_json::Value::String(s) => classify_source_str(s),
            serde_json::Value::Array(items) => {
                ExprNode::Array(items.iter().map(ExprNode::from_source_value).collect())
            }
            serde_json::Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (k, val) in map {
                    fields.insert(k.clone(), ExprNode::from_source_value(val));
                }
                ExprNode::Object(fields)
            }
            other => ExprNode::from_value(other),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExprNode::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, ExprNode::Opaque { .. })
    }

    /// Deterministic textual form. Opaque nodes render as their
    /// placeholder marker; object keys are already sorted by the
    /// `BTreeMap`, so identical trees render identically.
    pub fn render_source(&self) -> String {
        match self {
            ExprNode::Null => "null".to_string(),
            ExprNode::Bool(b) => b.to_string(),
            ExprNode::Number(n) => n.to_string(),
            ExprNode::Str(s) => format!("{:?}", s),
            ExprNode::Array(items) => {
                let parts: Vec<String> = items.iter().map(|n| n.render_source()).collect();
                format!("[{}]", parts.join(", "))
            }
            ExprNode::Object(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.render_source()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            ExprNode::Opaque { kind, .. } => kind.marker().to_string(),
        }
    }

    /// Underlying text of the whole tree, with opaque nodes contributing
    /// their raw source. Classifiers (e.g. the entity-logic detector)
    /// need the original text that `render_source` deliberately hides.
    pub fn raw_text(&self) -> String {
        match self {
            ExprNode::Opaque { raw, .. } => raw.clone(),
            ExprNode::Array(items) => {
                let parts: Vec<String> = items.iter().map(|n| n.raw_text()).collect();
                format!("[{}]", parts.join(", "))
            }
            ExprNode::Object(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.raw_text()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            other => other.render_source(),
        }
    }
}

/// Decide whether a string in an entry-assignment position is a literal
/// or executable source that must degrade to an opaque node.
fn classify_source_str(s: &str) -> ExprNode {
    let trimmed = s.trim();
    if looks_like_function(trimmed) {
        return ExprNode::Opaque {
            kind: OpaqueKind::Function,
            raw: trimmed.to_string(),
        };
    }
    if trimmed.contains("${") {
        return ExprNode::Opaque {
            kind: OpaqueKind::Template,
            raw: trimmed.to_string(),
        };
    }
    if looks_like_call(trimmed) {
        return ExprNode::Opaque {
            kind: OpaqueKind::Call,
            raw: trimmed.to_string(),
        };
    }
    ExprNode::Str(trimmed.to_string())
}

fn looks_like_function(s: &str) -> bool {
    if s.starts_with("function ") || s.starts_with("function(") {
        return true;
    }
    // Arrow functions: `(a, b) => ...` or `ctx => ...`.
    if let Some(arrow) = s.find("=>") {
        let head = s[..arrow].trim_end();
        if head.starts_with('(') && head.ends_with(')') {
            return true;
        }
        if !head.is_empty() && head.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            return true;
        }
    }
    false
}

fn looks_like_call(s: &str) -> bool {
    if !s.ends_with(')') {
        return false;
    }
    let Some(open) = s.find('(') else {
        return false;
    };
    let head = &s[..open];
    !head.is_empty()
        && head
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
        && head.chars().next().is_some_and(|c| !c.is_ascii_digit())
}

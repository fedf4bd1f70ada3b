//! Symbolic variable resolution.
//!
//! `{{name}}` references inside action arguments, text-check values, and
//! block fields resolve against an ordered scope chain: stored results of
//! the incoming transition's steps, stored results of prior blocks on the
//! same screen, then ambient context data. Resolution never fails; an
//! unresolvable reference degrades to a quoted string literal so that
//! partially specified units still compile.

use serde::Serialize;

use flowgen_graph::{ActionStep, Block};

/// Root object for stored step/block results in emitted code.
pub const STORED_ROOT: &str = "stored";
/// Root object for ambient context data in emitted code.
pub const CONTEXT_ROOT: &str = "testData";

/// What kind of binding a scope entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeKind {
    StoredResult,
    ContextField,
}

/// One visible binding. Never mutated after creation; shadowing is
/// first-match-wins during lookup, not replacement.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeEntry {
    pub name: String,
    pub kind: ScopeKind,
    /// Which step or block produced the binding, for diagnostics.
    pub produced_by: String,
}

/// An ordered chain of visible bindings.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain {
    entries: Vec<ScopeEntry>,
}

impl ScopeChain {
    /// Build the chain for the block at `position` on a screen reached
    /// via a transition: `[transition steps' store_as] ++ [store_as of
    /// blocks 0..position] ++ [context fields]`.
    pub fn for_block(
        transition_steps: &[ActionStep],
        screen_blocks: &[Block],
        position: usize,
        context_fields: &[String],
    ) -> ScopeChain {
        let mut entries = Vec::new();
        for step in transition_steps {
            if let Some(name) = &step.store_as {
                entries.push(ScopeEntry {
                    name: name.clone(),
                    kind: ScopeKind::StoredResult,
                    produced_by: format!("step {}.{}", step.instance, step.method),
                });
            }
        }
        for block in screen_blocks.iter().take(position) {
            if let Some(name) = block.store_as() {
                entries.push(ScopeEntry {
                    name: name.to_string(),
                    kind: ScopeKind::StoredResult,
                    produced_by: "prior block".to_string(),
                });
            }
        }
        for field in context_fields {
            entries.push(ScopeEntry {
                name: field.clone(),
                kind: ScopeKind::ContextField,
                produced_by: "context data".to_string(),
            });
        }
        ScopeChain { entries }
    }

    /// First entry with the given name, in chain order.
    pub fn lookup(&self, name: &str) -> Option<&ScopeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }
}

/// Resolve an arbitrary JSON value into a JS expression.
///
/// Numbers and booleans pass through verbatim; strings go through
/// [`resolve_str`]; arrays and objects are resolved element-wise.
pub fn resolve_value(value: &serde_json::Value, chain: &ScopeChain) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => resolve_str(s, chain),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| resolve_value(v, chain)).collect();
            format!("[{}]", parts.join(", "))
        }
        serde_json::Value::Object(map) => {
            let mut parts: Vec<String> = Vec::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                parts.push(format!("{}: {}", key, resolve_value(&map[key], chain)));
            }
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

/// Resolve one string into a JS expression. Never fails.
pub fn resolve_str(s: &str, chain: &ScopeChain) -> String {
    let trimmed = s.trim();

    // A single whole-string {{reference}}.
    if let Some(name) = sole_reference(trimmed) {
        return resolve_reference(name, chain);
    }

    // Embedded references become a template literal.
    if trimmed.contains("{{") && trimmed.contains("}}") {
        return interpolate(trimmed, chain);
    }

    // Literal classification: numeric, boolean, already-qualified.
    if trimmed.parse::<f64>().is_ok() {
        return trimmed.to_string();
    }
    if trimmed == "true" || trimmed == "false" || trimmed == "null" {
        return trimmed.to_string();
    }
    if is_qualified(trimmed) {
        return trimmed.to_string();
    }

    format!("'{}'", crate::strings::escape_js(trimmed))
}

/// Resolve a bare reference name (the inside of `{{...}}`).
pub fn resolve_reference(name: &str, chain: &ScopeChain) -> String {
    let name = name.trim();
    if is_qualified(name) {
        return name.to_string();
    }
    match chain.lookup(name) {
        Some(entry) if entry.kind == ScopeKind::StoredResult => {
            format!("{}.{}", STORED_ROOT, name)
        }
        _ => format!("{}.{}", CONTEXT_ROOT, name),
    }
}

fn is_qualified(s: &str) -> bool {
    s.starts_with(&format!("{}.", STORED_ROOT)) || s.starts_with(&format!("{}.", CONTEXT_ROOT))
}

/// `{{name}}` with nothing around it.
fn sole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

/// Mixed text and references lower to a JS template literal.
fn interpolate(s: &str, chain: &ScopeChain) -> String {
    let mut out = String::from("`");
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open].replace('`', "\\`"));
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let name = &after[..close];
                out.push_str("${");
                out.push_str(&resolve_reference(name, chain));
                out.push('}');
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..].replace('`', "\\`"));
                rest = "";
                break;
            }
        }
    }
    out.push_str(&rest.replace('`', "\\`"));
    out.push('`');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgen_graph::{Block, BlockData};

    fn step(store_as: Option<&str>) -> ActionStep {
        ActionStep {
            instance: "bookingActions".to_string(),
            method: "accept".to_string(),
            args: Vec::new(),
            store_as: store_as.map(str::to_string),
            conditions: None,
        }
    }

    fn call_block(store_as: Option<&str>) -> Block {
        Block {
            enabled: true,
            order: 0,
            data: BlockData::FunctionCall {
                instance: "screen".to_string(),
                method: "read".to_string(),
                args: Vec::new(),
                store_as: store_as.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_stored_result_resolution() {
        let steps = vec![step(Some("bookingId"))];
        let chain = ScopeChain::for_block(&steps, &[], 0, &[]);
        assert_eq!(resolve_str("{{bookingId}}", &chain), "stored.bookingId");
    }

    #[test]
    fn test_context_fallback() {
        let chain = ScopeChain::for_block(&[], &[], 0, &[]);
        assert_eq!(resolve_str("{{customerName}}", &chain), "testData.customerName");
    }

    #[test]
    fn test_qualified_passthrough() {
        let chain = ScopeChain::for_block(&[], &[], 0, &[]);
        assert_eq!(resolve_str("{{stored.x}}", &chain), "stored.x");
        assert_eq!(resolve_str("testData.y", &chain), "testData.y");
    }

    #[test]
    fn test_scope_ordering_prior_blocks_only() {
        let blocks = vec![call_block(Some("total")), call_block(None)];
        // Block 1 sees block 0's binding.
        let chain = ScopeChain::for_block(&[], &blocks, 1, &[]);
        assert_eq!(resolve_str("{{total}}", &chain), "stored.total");
        // Block 0 does not see its own (or any later) binding.
        let chain = ScopeChain::for_block(&[], &blocks, 0, &[]);
        assert_eq!(resolve_str("{{total}}", &chain), "testData.total");
    }

    #[test]
    fn test_literal_classification() {
        let chain = ScopeChain::default();
        assert_eq!(resolve_str("42", &chain), "42");
        assert_eq!(resolve_str("-3.5", &chain), "-3.5");
        assert_eq!(resolve_str("true", &chain), "true");
        assert_eq!(resolve_str("confirmed", &chain), "'confirmed'");
        assert_eq!(resolve_str("it's", &chain), "'it\\'s'");
    }

    #[test]
    fn test_value_resolution() {
        let steps = vec![step(Some("id"))];
        let chain = ScopeChain::for_block(&steps, &[], 0, &[]);
        assert_eq!(resolve_value(&serde_json::json!(7), &chain), "7");
        assert_eq!(resolve_value(&serde_json::json!(false), &chain), "false");
        assert_eq!(
            resolve_value(&serde_json::json!(["{{id}}", "x"]), &chain),
            "[stored.id, 'x']"
        );
        assert_eq!(
            resolve_value(&serde_json::json!({"ref": "{{id}}"}), &chain),
            "{ ref: stored.id }"
        );
    }

    #[test]
    fn test_interpolation() {
        let steps = vec![step(Some("id"))];
        let chain = ScopeChain::for_block(&steps, &[], 0, &[]);
        assert_eq!(
            resolve_str("Booking {{id}} ready", &chain),
            "`Booking ${stored.id} ready`"
        );
    }

    #[test]
    fn test_first_match_wins_shadowing() {
        // A transition step and a context field with the same name: the
        // step comes earlier in the chain and wins.
        let steps = vec![step(Some("total"))];
        let chain = ScopeChain::for_block(&steps, &[], 0, &["total".to_string()]);
        assert_eq!(resolve_str("{{total}}", &chain), "stored.total");
        assert_eq!(chain.entries().len(), 2);
    }
}

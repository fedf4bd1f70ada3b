//! Discovery index and state registry snapshots.
//!
//! The discovery index is a precomputed map of every `from --event--> to`
//! triple across all state units. It is loaded once per compilation run
//! and queried as an immutable snapshot; lookups are pure functions, so
//! transition resolution never rescans directories mid-run.

use std::collections::BTreeMap;

use serde::Serialize;

/// One `from --event--> to` triple from the discovery index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTriple {
    pub from: String,
    pub event: String,
    pub to: String,
}

/// Immutable snapshot of all known transitions.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryIndex {
    triples: Vec<IndexTriple>,
}

impl DiscoveryIndex {
    /// Build an index from its JSON form: either a bare array of triples
    /// or an object with a `transitions` array. Duplicate `(from, event)`
    /// pairs are suppressed, first occurrence wins.
    pub fn from_value(v: &serde_json::Value) -> DiscoveryIndex {
        let items = v
            .get("transitions")
            .and_then(|t| t.as_array())
            .or_else(|| v.as_array());

        let mut triples: Vec<IndexTriple> = Vec::new();
        if let Some(items) = items {
            for item in items {
                let (Some(from), Some(event), Some(to)) = (
                    item.get("from").and_then(|x| x.as_str()),
                    item.get("event").and_then(|x| x.as_str()),
                    item.get("to").and_then(|x| x.as_str()),
                ) else {
                    continue;
                };
                let duplicate = triples
                    .iter()
                    .any(|t| t.from == from && t.event == event);
                if !duplicate {
                    triples.push(IndexTriple {
                        from: from.to_string(),
                        event: event.to_string(),
                        to: to.to_string(),
                    });
                }
            }
        }
        DiscoveryIndex { triples }
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn triples(&self) -> &[IndexTriple] {
        &self.triples
    }

    /// All triples whose destination matches `target` under the
    /// normalization rule, in index order.
    pub fn incoming<'a>(&'a self, target: &str) -> Vec<&'a IndexTriple> {
        let wanted = normalize_state_name(target);
        self.triples
            .iter()
            .filter(|t| normalize_state_name(&t.to) == wanted)
            .collect()
    }
}

/// Status name → source-unit basename, loaded from the registry file.
#[derive(Debug, Clone, Default)]
pub struct StateRegistry {
    entries: BTreeMap<String, String>,
}

impl StateRegistry {
    /// Build a registry from its JSON form: either a bare object or an
    /// object with a `states` map. Keys are stored normalized.
    pub fn from_value(v: &serde_json::Value) -> StateRegistry {
        let map = v
            .get("states")
            .and_then(|s| s.as_object())
            .or_else(|| v.as_object());

        let mut entries = BTreeMap::new();
        if let Some(map) = map {
            for (status, basename) in map {
                if let Some(name) = basename.as_str() {
                    entries.insert(normalize_state_name(status), name.to_string());
                }
            }
        }
        StateRegistry { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the source-unit basename for a status name.
    pub fn lookup(&self, status: &str) -> Option<&str> {
        self.entries
            .get(&normalize_state_name(status))
            .map(String::as_str)
    }
}

/// Normalize a state/status name for matching: lowercase, underscores and
/// hyphens removed, a trailing `state`/`screen` suffix stripped. State
/// units, registries and index files disagree on these details, so every
/// comparison goes through this one rule.
pub fn normalize_state_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect();
    for suffix in ["state", "screen"] {
        if out.len() > suffix.len() {
            if let Some(stripped) = out.strip_suffix(suffix) {
                out = stripped.to_string();
                break;
            }
        }
    }
    out
}

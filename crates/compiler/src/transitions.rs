//! Incoming-transition resolution.
//!
//! Given a target state, find every transition across the state graphs
//! whose destination matches it. Two modes:
//!
//! - **Explicit**: the caller names an `(event, from)` pair. The source
//!   unit is re-read from disk and the transition record is taken from
//!   it; caller-supplied transition data is never trusted, because it
//!   may be stale relative to the unit on disk.
//! - **Discovery**: the discovery-index snapshot is filtered for triples
//!   landing on the target. An empty index result falls back to scanning
//!   the target's own graph for in-graph transitions, preferring source
//!   states from a fixed priority list.
//!
//! No match at all is not fatal: the target is treated downstream as an
//! inducer/initial state.

use log::{debug, warn};

use flowgen_graph::{
    normalize_state_name, StateGraph, Transition,
};

use crate::error::CompileError;
use crate::loader::{find_unit_file, UnitArena};
use crate::platform::Platform;
use crate::project::Project;

/// Source-state names preferred by the previous-state heuristic, in
/// priority order.
pub const PREVIOUS_STATE_PRIORITY: [&str; 5] =
    ["draft", "filling", "empty", "pending", "created"];

/// A caller-supplied `(event, from)` override.
#[derive(Debug, Clone)]
pub struct ExplicitTransition {
    pub event: String,
    pub from: String,
}

/// The outcome of incoming-transition resolution.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResolvedTransitions {
    /// The transition used for naming and delta computation: the one
    /// matching the graph's declared previous status when there is one,
    /// otherwise the first resolved.
    pub primary: Option<Transition>,
    /// Every resolved incoming transition, deduplicated by
    /// `(from, event)`.
    pub all: Vec<Transition>,
}

impl ResolvedTransitions {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// Everything resolution reads besides the unit arena. The index and
/// registry are immutable snapshots taken once per compilation run.
pub struct ResolverEnv<'a> {
    pub project: &'a Project,
    pub registry: &'a flowgen_graph::StateRegistry,
    pub index: &'a flowgen_graph::DiscoveryIndex,
    pub platform: Platform,
}

/// Resolve every transition landing on `target`.
pub fn resolve_incoming(
    env: &ResolverEnv<'_>,
    arena: &mut UnitArena,
    target: &str,
    target_graph: &StateGraph,
    declared_previous: Option<&str>,
    explicit: Option<&ExplicitTransition>,
) -> Result<ResolvedTransitions, CompileError> {
    let mut found: Vec<Transition> = Vec::new();

    if let Some(pair) = explicit {
        if let Some(t) = resolve_explicit(env, arena, target, pair) {
            found.push(t);
        }
    } else {
        found = resolve_from_index(env, arena, target);
        if found.is_empty() {
            found = resolve_from_graph(env, target, target_graph);
        }
    }

    // Duplicate suppression by (from, event), first kept.
    let mut deduped: Vec<Transition> = Vec::new();
    for t in found {
        let seen = deduped
            .iter()
            .any(|d| d.from == t.from && d.event == t.event);
        if !seen {
            deduped.push(t);
        }
    }

    let primary = select_primary(&deduped, declared_previous);
    Ok(ResolvedTransitions {
        primary,
        all: deduped,
    })
}

/// Previous-state heuristic on its own: the preferred source state among
/// every in-graph transition landing on `target`. Used by the metadata
/// extractor when no previous status is declared.
pub fn previous_state_heuristic(target: &str, graph: &StateGraph) -> Option<String> {
    let candidates = graph_candidates(target, graph);
    if candidates.is_empty() {
        return None;
    }
    for preferred in PREVIOUS_STATE_PRIORITY {
        if let Some((from, _, _)) = candidates
            .iter()
            .find(|(from, _, _)| normalize_state_name(from) == preferred)
        {
            return Some(from.clone());
        }
    }
    // Arbitrary pick among equally valid candidates; deterministic
    // because candidates are sorted, but not a stability contract.
    warn!(
        "no priority match among {} previous-state candidates for '{}', taking '{}'",
        candidates.len(),
        target,
        candidates[0].0
    );
    Some(candidates[0].0.clone())
}

// ── Explicit mode ───────────────────────────────────────────────────

fn resolve_explicit(
    env: &ResolverEnv<'_>,
    arena: &mut UnitArena,
    target: &str,
    pair: &ExplicitTransition,
) -> Option<Transition> {
    let transition = load_source_transition(env, arena, &pair.from, &pair.event, target);
    if transition.is_none() {
        warn!(
            "explicit transition {} --{}--> {} not found on disk, treating '{}' as inducer",
            pair.from, pair.event, target, target
        );
    }
    transition
}

// ── Discovery mode ──────────────────────────────────────────────────

fn resolve_from_index(
    env: &ResolverEnv<'_>,
    arena: &mut UnitArena,
    target: &str,
) -> Vec<Transition> {
    let mut out = Vec::new();
    for triple in env.index.incoming(target) {
        match load_source_transition(env, arena, &triple.from, &triple.event, target) {
            Some(t) => out.push(t),
            None => {
                warn!(
                    "discovery triple {} --{}--> {} has no matching record in its source unit",
                    triple.from, triple.event, triple.to
                );
            }
        }
    }
    out
}

/// Re-read the source unit for `from` and extract its transition record
/// for `event`. Returns `None` when the unit cannot be located or the
/// record is missing or excluded for the current platform.
fn load_source_transition(
    env: &ResolverEnv<'_>,
    arena: &mut UnitArena,
    from: &str,
    event: &str,
    target: &str,
) -> Option<Transition> {
    let path = match find_unit_file(env.project, env.registry, from, env.platform) {
        Ok(path) => path,
        Err(e) => {
            debug!("no unit file for source state '{}': {}", from, e);
            return None;
        }
    };
    let unit = match arena.load(&path) {
        Ok(unit) => unit,
        Err(e) => {
            warn!("source unit '{}' failed to load: {}", from, e);
            return None;
        }
    };

    let wanted = normalize_state_name(target);
    for (_, node) in unit.graph.nodes() {
        if let Some(spec) = node.on.get(event) {
            if normalize_state_name(&spec.target) != wanted {
                continue;
            }
            if !env.platform.matches(&spec.platforms) {
                debug!(
                    "transition {} --{}--> {} excluded on platform {}",
                    from, event, target, env.platform
                );
                return None;
            }
            return Some(Transition {
                event: event.to_string(),
                from: from.to_string(),
                to: target.to_string(),
                platforms: spec.platforms.clone(),
                action_details: spec.action_details.clone(),
            });
        }
    }
    None
}

// ── Previous-state fallback ─────────────────────────────────────────

/// In-graph transitions landing on `target`, sorted by `(from, event)`.
fn graph_candidates<'g>(
    target: &str,
    graph: &'g StateGraph,
) -> Vec<(String, String, &'g flowgen_graph::TransitionSpec)> {
    let wanted = normalize_state_name(target);
    let mut candidates: Vec<(String, String, &flowgen_graph::TransitionSpec)> = Vec::new();
    for (state_name, node) in graph.nodes() {
        if normalize_state_name(state_name) == wanted {
            continue;
        }
        for (event, spec) in &node.on {
            if normalize_state_name(&spec.target) == wanted {
                candidates.push((state_name.to_string(), event.clone(), spec));
            }
        }
    }
    candidates.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    candidates
}

fn resolve_from_graph(
    env: &ResolverEnv<'_>,
    target: &str,
    graph: &StateGraph,
) -> Vec<Transition> {
    let candidates = graph_candidates(target, graph);
    let ordered: Vec<&(String, String, &flowgen_graph::TransitionSpec)> = {
        let mut preferred: Vec<&(String, String, &flowgen_graph::TransitionSpec)> = Vec::new();
        let mut rest: Vec<&(String, String, &flowgen_graph::TransitionSpec)> = Vec::new();
        for candidate in &candidates {
            let is_priority = PREVIOUS_STATE_PRIORITY
                .iter()
                .any(|p| normalize_state_name(&candidate.0) == *p);
            if is_priority {
                preferred.push(candidate);
            } else {
                rest.push(candidate);
            }
        }
        preferred.into_iter().chain(rest).collect()
    };

    ordered
        .into_iter()
        .filter(|(_, _, spec)| env.platform.matches(&spec.platforms))
        .map(|(from, event, spec)| Transition {
            event: event.clone(),
            from: from.clone(),
            to: target.to_string(),
            platforms: spec.platforms.clone(),
            action_details: spec.action_details.clone(),
        })
        .collect()
}

fn select_primary(
    transitions: &[Transition],
    declared_previous: Option<&str>,
) -> Option<Transition> {
    if let Some(previous) = declared_previous {
        let wanted = normalize_state_name(previous);
        if let Some(t) = transitions
            .iter()
            .find(|t| normalize_state_name(&t.from) == wanted)
        {
            return Some(t.clone());
        }
    }
    transitions.first().cloned()
}

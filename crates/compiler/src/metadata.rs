//! Metadata extraction: normalize a resolved state into the flat record
//! the emitter consumes.
//!
//! This is where naming conventions live (action name, class name), where
//! entity-prefixed delta fields are rewritten, and where the entity-logic
//! classifier decides between single- and multi-entity parameter
//! variants.

use std::collections::BTreeMap;

use serde::Serialize;

use flowgen_graph::{
    ActionStep, BlockData, ExprNode, SetupEntry, StateNode, StateUnit, ValidationScreen,
};

use crate::blocks::ExternalRef;
use crate::error::CompileError;
use crate::platform::Platform;
use crate::scope::{CONTEXT_ROOT, STORED_ROOT};
use crate::strings::{to_camel, to_pascal};
use crate::transitions::{previous_state_heuristic, ResolvedTransitions};

/// The flat metadata record for one `(state, platform)` pair.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    /// Screen-object class name (`PendingScreen` style).
    pub class_name: String,
    /// Screen-object instance name (`pendingScreen` style).
    pub instance_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    /// Derived action name (`acceptedViaPending` or the bare fallback).
    pub action_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Entry delta with entity prefixes stripped, rendered textually.
    pub delta_fields: BTreeMap<String, String>,
    pub required_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Setup entries applicable to the target platform, in declared order.
    pub setup: Vec<SetupEntry>,
    /// Validation screens, already ordered.
    pub screens: Vec<ValidationScreen>,
    /// Unique external screen references across enabled function-call
    /// blocks, in first-appearance order.
    pub external_refs: Vec<ExternalRef>,
    /// Array-oriented delta detected: generated tests take
    /// single-vs-multi entity parameter variants.
    pub entity_logic: bool,
    /// No incoming transition found: the state induces itself.
    pub inducer: bool,
    pub transitions: ResolvedTransitions,
}

/// Extract metadata for one state of a unit.
///
/// `target_sub_state` selects a sub-state of a multi-state graph and is a
/// `Validation` error when absent; `None` selects the single/initial
/// state.
pub fn extract(
    unit: &StateUnit,
    platform: Platform,
    target_sub_state: Option<&str>,
    transitions: ResolvedTransitions,
) -> Result<Metadata, CompileError> {
    let node = unit.graph.node(target_sub_state).ok_or_else(|| {
        CompileError::Validation(format!(
            "sub-state '{}' not present in unit '{}' (known: {})",
            target_sub_state.unwrap_or(""),
            unit.name,
            unit.graph.state_names().join(", ")
        ))
    })?;

    validate_store_as(&transitions)?;

    let status = node
        .meta
        .status
        .clone()
        .or_else(|| target_sub_state.map(str::to_string))
        .unwrap_or_else(|| unit.name.clone());

    let previous_status = node.meta.previous_status.clone().or_else(|| {
        transitions
            .primary
            .as_ref()
            .map(|t| t.from.clone())
            .or_else(|| previous_state_heuristic(&status, &unit.graph))
    });

    let action_name = derive_action_name(&status, node, &transitions);
    let delta_fields = normalized_delta(node);
    let entity_logic = classify_entity_logic(node);

    let setup: Vec<SetupEntry> = node
        .meta
        .setup
        .iter()
        .filter(|entry| entry.platform.is_empty() || entry.platform == platform.key())
        .cloned()
        .collect();

    let screens: Vec<ValidationScreen> = node.meta.screens.clone();

    let class_name = format!("{}Screen", to_pascal(&status));
    let instance_name = format!("{}Screen", to_camel(&status));

    validate_required_context(
        &status,
        &setup,
        &screens,
        &transitions,
        &node.meta.required_fields,
    )?;
    let external_refs = collect_external_refs(&screens, &instance_name);

    Ok(Metadata {
        class_name,
        instance_name,
        status,
        previous_status,
        action_name,
        entity: node.meta.entity.clone(),
        delta_fields,
        required_fields: node.meta.required_fields.clone(),
        trigger: node.meta.trigger.clone(),
        setup,
        screens,
        external_refs,
        entity_logic,
        inducer: transitions.is_empty(),
        transitions,
    })
}

/// Naming convention: `{toCamel}Via{FromPascal}` when transition context
/// exists, else the explicit override, else the bare camel-cased target.
fn derive_action_name(
    status: &str,
    node: &StateNode,
    transitions: &ResolvedTransitions,
) -> String {
    if let Some(primary) = &transitions.primary {
        return format!("{}Via{}", to_camel(&primary.to), to_pascal(&primary.from));
    }
    if let Some(override_name) = &node.meta.action_name {
        return override_name.clone();
    }
    to_camel(status)
}

/// Rewrite `entity.field` delta keys to bare `field` once the owning
/// entity is known. The same delta shape is reused both prefixed and
/// unprefixed across different state definitions.
fn normalized_delta(node: &StateNode) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(entry) = &node.entry else {
        return out;
    };
    let prefix = node.meta.entity.as_ref().map(|e| format!("{}.", e));
    for (field, value) in &entry.fields {
        let key = match &prefix {
            Some(p) => field.strip_prefix(p.as_str()).unwrap_or(field),
            None => field.as_str(),
        };
        out.insert(key.to_string(), value.render_source());
    }
    out
}

/// Array-oriented delta detection: the entry assignment's raw text uses
/// indexing together with one of `map`/`filter`/`forEach`.
fn classify_entity_logic(node: &StateNode) -> bool {
    let Some(entry) = &node.entry else {
        return false;
    };
    let text: String = entry
        .fields
        .values()
        .map(ExprNode::raw_text)
        .collect::<Vec<_>>()
        .join("\n");
    text.contains('[')
        && (text.contains(".map(") || text.contains(".filter(") || text.contains(".forEach("))
}

/// Every context-tier `{{reference}}` consumed by emission must name a
/// declared required field. Stored-result bindings and explicitly
/// qualified references are exempt. The check is structural, not
/// positional: a `store_as` anywhere in the emitted unit satisfies it.
fn validate_required_context(
    status: &str,
    setup: &[SetupEntry],
    screens: &[ValidationScreen],
    transitions: &ResolvedTransitions,
    required: &[String],
) -> Result<(), CompileError> {
    let steps: &[ActionStep] = transitions
        .primary
        .as_ref()
        .and_then(|t| t.action_details.as_ref())
        .map(|d| d.steps.as_slice())
        .unwrap_or(&[]);

    let mut bound: Vec<&str> = steps.iter().filter_map(|s| s.store_as.as_deref()).collect();
    for screen in screens {
        for block in screen.blocks.iter().filter(|b| b.enabled) {
            if let Some(name) = block.store_as() {
                bound.push(name);
            }
        }
    }

    let mut refs: Vec<String> = Vec::new();
    for entry in setup {
        for arg in &entry.args {
            collect_references(arg, &mut refs);
        }
    }
    for step in steps {
        for arg in &step.args {
            collect_references(arg, &mut refs);
        }
    }
    for screen in screens {
        for block in screen.blocks.iter().filter(|b| b.enabled) {
            match &block.data {
                BlockData::UiAssertion {
                    text_checks,
                    assertions,
                    ..
                } => {
                    for check in text_checks {
                        collect_references(&check.expected, &mut refs);
                    }
                    for assertion in assertions {
                        collect_references(&assertion.expected, &mut refs);
                    }
                }
                BlockData::FunctionCall { args, .. } => {
                    for arg in args {
                        collect_references(arg, &mut refs);
                    }
                }
                BlockData::DataAssertion { expected, .. } => {
                    collect_references(expected, &mut refs);
                }
                // Custom code is emitted verbatim, not resolved.
                BlockData::CustomCode { .. } => {}
            }
        }
    }

    let stored_prefix = format!("{}.", STORED_ROOT);
    let context_prefix = format!("{}.", CONTEXT_ROOT);
    for name in refs {
        if name.starts_with(&stored_prefix) || name.starts_with(&context_prefix) {
            continue;
        }
        if bound.iter().any(|b| *b == name) {
            continue;
        }
        if required.iter().any(|r| *r == name) {
            continue;
        }
        return Err(CompileError::Validation(format!(
            "context field '{}' referenced by state '{}' is not declared in its required fields",
            name, status
        )));
    }
    Ok(())
}

/// Every `{{name}}` reference inside a value, depth-first.
fn collect_references(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(open) = rest.find("{{") {
                let after = &rest[open + 2..];
                let Some(close) = after.find("}}") else {
                    break;
                };
                out.push(after[..close].trim().to_string());
                rest = &after[close + 2..];
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

/// Unique external screen references across all enabled function-call
/// blocks, deduplicated by class name.
fn collect_external_refs(screens: &[ValidationScreen], own_instance: &str) -> Vec<ExternalRef> {
    let mut out: Vec<ExternalRef> = Vec::new();
    for screen in screens {
        for block in screen.blocks.iter().filter(|b| b.enabled) {
            let BlockData::FunctionCall { instance, .. } = &block.data else {
                continue;
            };
            if instance == own_instance {
                continue;
            }
            let class_name = to_pascal(instance);
            if out.iter().any(|r| r.class_name == class_name) {
                continue;
            }
            out.push(ExternalRef {
                class_name,
                var_name: to_camel(instance),
            });
        }
    }
    out
}

/// Duplicate `store_as` declarations within one step list silently
/// discard an earlier step's result, so they are rejected up front.
fn validate_store_as(transitions: &ResolvedTransitions) -> Result<(), CompileError> {
    for transition in &transitions.all {
        let Some(details) = &transition.action_details else {
            continue;
        };
        let mut seen: Vec<&str> = Vec::new();
        for step in &details.steps {
            let Some(name) = step.store_as.as_deref() else {
                continue;
            };
            if seen.contains(&name) {
                return Err(CompileError::Validation(format!(
                    "duplicate store_as '{}' in steps of {} --{}--> {}",
                    name, transition.from, transition.event, transition.to
                )));
            }
            seen.push(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgen_graph::{parse_state_unit, ActionDetails, ActionStep, ParseMode, Transition};

    fn unit_from(doc: serde_json::Value) -> StateUnit {
        parse_state_unit("test-unit", &doc, ParseMode::Lenient).unwrap()
    }

    fn transition(from: &str, event: &str, to: &str) -> Transition {
        Transition {
            event: event.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            platforms: Vec::new(),
            action_details: None,
        }
    }

    #[test]
    fn test_action_name_with_transition_context() {
        let unit = unit_from(serde_json::json!({
            "machine": {"meta": {"status": "accepted"}, "on": {}}
        }));
        let resolved = ResolvedTransitions {
            primary: Some(transition("pending", "ACCEPT", "accepted")),
            all: vec![transition("pending", "ACCEPT", "accepted")],
        };
        let meta = extract(&unit, Platform::Web, None, resolved).unwrap();
        assert_eq!(meta.action_name, "acceptedViaPending");
        assert_eq!(meta.previous_status.as_deref(), Some("pending"));
        assert!(!meta.inducer);
    }

    #[test]
    fn test_action_name_bare_fallback() {
        let unit = unit_from(serde_json::json!({
            "machine": {"meta": {"status": "draft"}, "on": {}}
        }));
        let meta = extract(&unit, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        assert_eq!(meta.action_name, "draft");
        assert!(meta.inducer);
        assert_eq!(meta.class_name, "DraftScreen");
        assert_eq!(meta.instance_name, "draftScreen");
    }

    #[test]
    fn test_action_name_override() {
        let unit = unit_from(serde_json::json!({
            "machine": {"meta": {"status": "draft", "actionName": "startDraft"}, "on": {}}
        }));
        let meta = extract(&unit, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        assert_eq!(meta.action_name, "startDraft");
    }

    #[test]
    fn test_entity_prefix_normalization() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "meta": {"status": "draft", "entity": "booking"},
                "entry": {"assign": {"booking.total": 0, "status": "draft"}},
                "on": {}
            }
        }));
        let meta = extract(&unit, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        assert!(meta.delta_fields.contains_key("total"));
        assert!(meta.delta_fields.contains_key("status"));
        assert!(!meta.delta_fields.contains_key("booking.total"));
    }

    #[test]
    fn test_entity_logic_classification() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "meta": {"status": "draft"},
                "entry": {"assign": {"totals": "(ctx) => ctx.items[0].map(i => i.price)"}},
                "on": {}
            }
        }));
        let meta = extract(&unit, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        assert!(meta.entity_logic);

        let plain = unit_from(serde_json::json!({
            "machine": {
                "meta": {"status": "draft"},
                "entry": {"assign": {"status": "draft"}},
                "on": {}
            }
        }));
        let meta = extract(&plain, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        assert!(!meta.entity_logic);
    }

    #[test]
    fn test_missing_sub_state_is_validation_error() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "initial": "empty",
                "states": {"empty": {"meta": {"status": "empty"}, "on": {}}}
            }
        }));
        let err = extract(&unit, Platform::Web, Some("unknown"), ResolvedTransitions::default());
        assert!(matches!(err, Err(CompileError::Validation(_))));
    }

    #[test]
    fn test_setup_filtered_by_platform() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "meta": {
                    "status": "draft",
                    "setup": [
                        {"platform": "web", "instance": "a", "method": "m", "args": []},
                        {"platform": "mobile", "instance": "b", "method": "m", "args": []},
                        {"instance": "c", "method": "m", "args": []}
                    ]
                },
                "on": {}
            }
        }));
        let meta = extract(&unit, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        let instances: Vec<&str> = meta.setup.iter().map(|s| s.instance.as_str()).collect();
        assert_eq!(instances, vec!["a", "c"]);
    }

    #[test]
    fn test_duplicate_store_as_rejected() {
        let unit = unit_from(serde_json::json!({
            "machine": {"meta": {"status": "accepted"}, "on": {}}
        }));
        let step = |store: &str| ActionStep {
            instance: "actions".to_string(),
            method: "do".to_string(),
            args: Vec::new(),
            store_as: Some(store.to_string()),
            conditions: None,
        };
        let mut t = transition("pending", "ACCEPT", "accepted");
        t.action_details = Some(ActionDetails {
            imports: Vec::new(),
            steps: vec![step("id"), step("id")],
        });
        let resolved = ResolvedTransitions {
            primary: Some(t.clone()),
            all: vec![t],
        };
        let err = extract(&unit, Platform::Web, None, resolved);
        assert!(matches!(err, Err(CompileError::Validation(_))));
    }

    #[test]
    fn test_undeclared_context_reference_rejected() {
        let unit = unit_from(serde_json::json!({
            "machine": {"meta": {"status": "accepted"}, "on": {}}
        }));
        let step = ActionStep {
            instance: "bookingActions".to_string(),
            method: "accept".to_string(),
            args: vec![serde_json::json!("{{customerName}}")],
            store_as: None,
            conditions: None,
        };
        let mut t = transition("pending", "ACCEPT", "accepted");
        t.action_details = Some(ActionDetails {
            imports: Vec::new(),
            steps: vec![step],
        });
        let resolved = ResolvedTransitions {
            primary: Some(t.clone()),
            all: vec![t],
        };
        let err = extract(&unit, Platform::Web, None, resolved);
        match err {
            Err(CompileError::Validation(msg)) => assert!(msg.contains("customerName")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_and_stored_context_references_accepted() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "meta": {
                    "status": "accepted",
                    "requiredFields": ["customerName"],
                    "screens": [{
                        "screenKey": "confirmation",
                        "order": 0,
                        "blocks": [{
                            "type": "ui-assertion", "enabled": true, "order": 0,
                            "data": {"textChecks": [
                                {"field": "reference", "expected": "{{bookingId}}"}
                            ]}
                        }]
                    }]
                },
                "on": {}
            }
        }));
        let step = ActionStep {
            instance: "bookingActions".to_string(),
            method: "accept".to_string(),
            args: vec![serde_json::json!("{{customerName}}")],
            store_as: Some("bookingId".to_string()),
            conditions: None,
        };
        let mut t = transition("pending", "ACCEPT", "accepted");
        t.action_details = Some(ActionDetails {
            imports: Vec::new(),
            steps: vec![step],
        });
        let resolved = ResolvedTransitions {
            primary: Some(t.clone()),
            all: vec![t],
        };
        // customerName is declared; bookingId is a stored result.
        let meta = extract(&unit, Platform::Web, None, resolved).unwrap();
        assert_eq!(meta.required_fields, vec!["customerName"]);
    }

    #[test]
    fn test_external_refs_collected_and_deduplicated() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "meta": {
                    "status": "paid",
                    "screens": [{
                        "screenKey": "receipt",
                        "order": 0,
                        "blocks": [
                            {"type": "function-call", "enabled": true, "order": 0,
                             "data": {"instance": "paymentPanel", "method": "open", "args": []}},
                            {"type": "function-call", "enabled": true, "order": 1,
                             "data": {"instance": "paymentPanel", "method": "confirm", "args": []}},
                            {"type": "function-call", "enabled": true, "order": 2,
                             "data": {"instance": "paidScreen", "method": "read", "args": []}},
                            {"type": "function-call", "enabled": false, "order": 3,
                             "data": {"instance": "auditPanel", "method": "open", "args": []}}
                        ]
                    }]
                },
                "on": {}
            }
        }));
        let meta = extract(&unit, Platform::Web, None, ResolvedTransitions::default()).unwrap();
        // Two paymentPanel calls collapse to one reference; the own
        // instance and the disabled block contribute nothing.
        assert_eq!(meta.external_refs.len(), 1);
        assert_eq!(meta.external_refs[0].class_name, "PaymentPanel");
        assert_eq!(meta.external_refs[0].var_name, "paymentPanel");
    }

    #[test]
    fn test_previous_status_from_graph_heuristic() {
        let unit = unit_from(serde_json::json!({
            "machine": {
                "initial": "draft",
                "states": {
                    "draft": {"meta": {"status": "draft"}, "on": {"SUBMIT": "submitted"}},
                    "submitted": {"meta": {"status": "submitted"}, "on": {}}
                }
            }
        }));
        let meta = extract(
            &unit,
            Platform::Web,
            Some("submitted"),
            ResolvedTransitions::default(),
        )
        .unwrap();
        assert_eq!(meta.previous_status.as_deref(), Some("draft"));
    }
}

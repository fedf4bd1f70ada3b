//! Deserialization from state-unit JSON into typed structs.
//!
//! The main entry point is [`parse_state_unit`], which takes a
//! `&serde_json::Value` and produces a [`StateUnit`].
//!
//! Two parse modes implement the loader's two strategies:
//!
//! - [`ParseMode::Strict`] rejects units whose entry deltas carry
//!   executable source (function strings, call expressions, template
//!   strings) and rejects unknown block types.
//! - [`ParseMode::Lenient`] degrades those deltas to opaque placeholder
//!   nodes and skips unknown block types, so that a partially
//!   reconstructable unit still loads.

use std::collections::BTreeMap;

use crate::ast::ExprNode;
use crate::error::GraphError;
use crate::types::*;

/// How forgiving the parse should be. See the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    Lenient,
}

/// Deserialize a state-unit JSON document into typed structs.
///
/// The document must contain a `machine` field holding either a
/// single-state graph (`meta`/`entry`/`on` at the root) or a multi-state
/// graph (`initial` + `states`).
pub fn parse_state_unit(
    name: &str,
    doc: &serde_json::Value,
    mode: ParseMode,
) -> Result<StateUnit, GraphError> {
    let machine = doc.get("machine").ok_or_else(|| GraphError::MissingField {
        field: "machine".to_string(),
    })?;

    let graph = parse_state_graph(name, machine, mode)?;
    Ok(StateUnit {
        name: name.to_string(),
        graph,
    })
}

fn parse_state_graph(
    unit: &str,
    machine: &serde_json::Value,
    mode: ParseMode,
) -> Result<StateGraph, GraphError> {
    if let Some(states_val) = machine.get("states") {
        let initial = required_str(machine, "initial")
            .map_err(|_| unit_err(unit, "multi-state graph missing 'initial'"))?;
        let states_obj = states_val
            .as_object()
            .ok_or_else(|| unit_err(unit, "'states' must be an object"))?;
        let mut states = BTreeMap::new();
        for (state_name, node_val) in states_obj {
            states.insert(state_name.clone(), parse_state_node(unit, node_val, mode)?);
        }
        if !states.contains_key(&initial) {
            return Err(unit_err(
                unit,
                format!("initial state '{}' not present in 'states'", initial),
            ));
        }
        return Ok(StateGraph::Multi { initial, states });
    }

    if machine.get("meta").is_some() || machine.get("on").is_some() {
        return Ok(StateGraph::Single(parse_state_node(unit, machine, mode)?));
    }

    Err(GraphError::InvalidGraph(format!(
        "unit '{}' has neither 'states' nor a root 'meta'/'on'",
        unit
    )))
}

fn parse_state_node(
    unit: &str,
    node: &serde_json::Value,
    mode: ParseMode,
) -> Result<StateNode, GraphError> {
    let meta = match node.get("meta") {
        Some(meta_val) => parse_meta(unit, meta_val, mode)?,
        None => StateMeta::default(),
    };

    let entry = match node.get("entry") {
        Some(entry_val) => Some(parse_entry(unit, entry_val, mode)?),
        None => None,
    };

    let mut on = BTreeMap::new();
    if let Some(on_obj) = node.get("on").and_then(|v| v.as_object()) {
        for (event, spec_val) in on_obj {
            on.insert(event.clone(), parse_transition_spec(unit, event, spec_val)?);
        }
    }

    Ok(StateNode { meta, entry, on })
}

fn parse_meta(
    unit: &str,
    meta: &serde_json::Value,
    mode: ParseMode,
) -> Result<StateMeta, GraphError> {
    let mut screens = Vec::new();
    if let Some(screens_val) = meta.get("screens").and_then(|v| v.as_array()) {
        for screen_val in screens_val {
            screens.push(parse_screen(unit, screen_val, mode)?);
        }
    }

    // Legacy format: a flat visible/hidden/checks record at the meta
    // level, normalized into one synthetic block-format screen.
    if screens.is_empty() && (meta.get("visible").is_some() || meta.get("checks").is_some()) {
        screens.push(legacy_screen(meta));
    }
    screens.sort_by(|a, b| a.order.cmp(&b.order).then(a.screen_key.cmp(&b.screen_key)));

    let mut setup = Vec::new();
    if let Some(setup_val) = meta.get("setup").and_then(|v| v.as_array()) {
        for entry in setup_val {
            setup.push(SetupEntry {
                platform: opt_str(entry, "platform").unwrap_or_default(),
                instance: required_str(entry, "instance")
                    .map_err(|_| unit_err(unit, "setup entry missing 'instance'"))?,
                method: required_str(entry, "method")
                    .map_err(|_| unit_err(unit, "setup entry missing 'method'"))?,
                args: value_list(entry, "args"),
            });
        }
    }

    Ok(StateMeta {
        status: opt_str(meta, "status"),
        previous_status: opt_str(meta, "previousStatus"),
        platforms: str_list(meta, "platforms"),
        entity: opt_str(meta, "entity"),
        required_fields: str_list(meta, "requiredFields"),
        setup,
        trigger: opt_str(meta, "trigger"),
        action_name: opt_str(meta, "actionName"),
        screens,
    })
}

fn parse_entry(
    unit: &str,
    entry: &serde_json::Value,
    mode: ParseMode,
) -> Result<EntryAssign, GraphError> {
    // Accept both `{"assign": {...}}` and a bare field map.
    let assign = entry.get("assign").unwrap_or(entry);
    let obj = assign
        .as_object()
        .ok_or_else(|| unit_err(unit, "'entry' must be an assignment object"))?;

    let mut fields = BTreeMap::new();
    for (field, value) in obj {
        let node = ExprNode::from_source_value(value);
        if mode == ParseMode::Strict && node_contains_opaque(&node) {
            return Err(unit_err(
                unit,
                format!("entry field '{}' is not a literal value", field),
            ));
        }
        fields.insert(field.clone(), node);
    }
    Ok(EntryAssign { fields })
}

fn node_contains_opaque(node: &ExprNode) -> bool {
    match node {
        ExprNode::Opaque { .. } => true,
        ExprNode::Array(items) => items.iter().any(node_contains_opaque),
        ExprNode::Object(fields) => fields.values().any(node_contains_opaque),
        _ => false,
    }
}

fn parse_transition_spec(
    unit: &str,
    event: &str,
    spec: &serde_json::Value,
) -> Result<TransitionSpec,GraphError> {
    // Shorthand: `"EVENT": "targetState"`.
    if let Some(target) = spec.as_str() {
        return Ok(TransitionSpec {
            target: target.to_string(),
            platforms: Vec::new(),
            action_details: None,
        });
    }

    let target = required_str(spec, "target")
        .map_err(|_| unit_err(unit, format!("transition '{}' missing 'target'", event)))?;

    let action_details = match spec.get("actionDetails") {
        Some(details) if !details.is_null() => Some(parse_action_details(unit, event, details)?),
        _ => None,
    };

    Ok(TransitionSpec {
        target,
        platforms: str_list(spec, "platforms"),
        action_details,
    })
}

fn parse_action_details(
    unit: &str,
    event: &str,
    details: &serde_json::Value,
) -> Result<ActionDetails, GraphError> {
    let mut imports = Vec::new();
    if let Some(imports_val) = details.get("imports").and_then(|v| v.as_array()) {
        for import in imports_val {
            imports.push(ImportRef {
                class_name: required_str(import, "className")
                    .map_err(|_| unit_err(unit, "import missing 'className'"))?,
                path: required_str(import, "path")
                    .map_err(|_| unit_err(unit, "import missing 'path'"))?,
                var_name: required_str(import, "varName")
                    .map_err(|_| unit_err(unit, "import missing 'varName'"))?,
            });
        }
    }

    let mut steps = Vec::new();
    if let Some(steps_val) = details.get("steps").and_then(|v| v.as_array()) {
        for step in steps_val {
            steps.push(ActionStep {
                instance: required_str(step, "instance").map_err(|_| {
                    unit_err(unit, format!("step in '{}' missing 'instance'", event))
                })?,
                method: required_str(step, "method")
                    .map_err(|_| unit_err(unit, format!("step in '{}' missing 'method'", event)))?,
                args: value_list(step, "args"),
                store_as: opt_str(step, "storeAs"),
                conditions: step.get("conditions").filter(|v| !v.is_null()).cloned(),
            });
        }
    }

    Ok(ActionDetails { imports, steps })
}

// ── Validation screens ──────────────────────────────────────────────

fn parse_screen(
    unit: &str,
    screen: &serde_json::Value,
    mode: ParseMode,
) -> Result<ValidationScreen, GraphError> {
    let screen_key = required_str(screen, "screenKey")
        .map_err(|_| unit_err(unit, "screen missing 'screenKey'"))?;
    let order = screen.get("order").and_then(|v| v.as_i64()).unwrap_or(0);

    let mut blocks = Vec::new();
    if let Some(blocks_val) = screen.get("blocks").and_then(|v| v.as_array()) {
        for (position, block_val) in blocks_val.iter().enumerate() {
            match parse_block(unit, &screen_key, position, block_val)? {
                Some(block) => blocks.push(block),
                None if mode == ParseMode::Strict => {
                    return Err(unit_err(
                        unit,
                        format!(
                            "screen '{}' block {} has unknown type '{}'",
                            screen_key,
                            position,
                            opt_str(block_val, "type").unwrap_or_default()
                        ),
                    ));
                }
                None => {} // Lenient: skip unknown block types
            }
        }
    }
    blocks.sort_by_key(|b| b.order);

    Ok(ValidationScreen {
        screen_key,
        order,
        navigation: screen.get("navigation").filter(|v| !v.is_null()).cloned(),
        blocks,
    })
}

fn parse_block(
    unit: &str,
    screen_key: &str,
    position: usize,
    block: &serde_json::Value,
) -> Result<Option<Block>, GraphError> {
    let kind = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let enabled = block.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);
    let order = block
        .get("order")
        .and_then(|v| v.as_i64())
        .unwrap_or(position as i64);
    let data = block.get("data").cloned().unwrap_or(serde_json::Value::Null);

    let parsed = match kind {
        "ui-assertion" => BlockData::UiAssertion {
            visible: str_list(&data, "visible"),
            hidden: str_list(&data, "hidden"),
            text_checks: parse_text_checks(&data),
            assertions: parse_assertions(&data),
        },
        "function-call" => BlockData::FunctionCall {
            instance: required_str(&data, "instance").map_err(|_| {
                unit_err(
                    unit,
                    format!("function-call block on '{}' missing 'instance'", screen_key),
                )
            })?,
            method: required_str(&data, "method").map_err(|_| {
                unit_err(
                    unit,
                    format!("function-call block on '{}' missing 'method'", screen_key),
                )
            })?,
            args: value_list(&data, "args"),
            store_as: opt_str(&data, "storeAs"),
        },
        "data-assertion" => BlockData::DataAssertion {
            field: required_str(&data, "field").map_err(|_| {
                unit_err(
                    unit,
                    format!("data-assertion block on '{}' missing 'field'", screen_key),
                )
            })?,
            expected: data.get("expected").cloned().unwrap_or(serde_json::Value::Null),
        },
        "custom-code" => BlockData::CustomCode {
            code: opt_str(&data, "code").unwrap_or_default(),
        },
        _ => return Ok(None), // Unknown kinds are the caller's decision
    };

    Ok(Some(Block {
        enabled,
        order,
        data: parsed,
    }))
}

fn parse_text_checks(data: &serde_json::Value) -> Vec<TextCheck> {
    let mut checks = Vec::new();
    if let Some(items) = data.get("textChecks").and_then(|v| v.as_array()) {
        for item in items {
            if let Some(field) = opt_str(item, "field") {
                checks.push(TextCheck {
                    field,
                    expected: item.get("expected").cloned().unwrap_or(serde_json::Value::Null),
                });
            }
        }
    }
    checks
}

fn parse_assertions(data: &serde_json::Value) -> Vec<FunctionAssertion> {
    let mut assertions = Vec::new();
    if let Some(items) = data.get("assertions").and_then(|v| v.as_array()) {
        for item in items {
            if let Some(call) = opt_str(item, "call") {
                assertions.push(FunctionAssertion {
                    call,
                    expected: item.get("expected").cloned().unwrap_or(serde_json::Value::Null),
                });
            }
        }
    }
    assertions
}

/// Normalize a legacy `{visible, hidden, checks}` meta record into a
/// synthetic single-screen block definition.
fn legacy_screen(meta: &serde_json::Value) -> ValidationScreen {
    let mut text_checks = Vec::new();
    if let Some(checks) = meta.get("checks").and_then(|v| v.as_object()) {
        for (field, expected) in checks {
            text_checks.push(TextCheck {
                field: field.clone(),
                expected: expected.clone(),
            });
        }
    }

    ValidationScreen {
        screen_key: "main".to_string(),
        order: 0,
        navigation: None,
        blocks: vec![Block {
            enabled: true,
            order: 0,
            data: BlockData::UiAssertion {
                visible: str_list(meta, "visible"),
                hidden: str_list(meta, "hidden"),
                text_checks,
                assertions: Vec::new(),
            },
        }],
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn required_str(obj: &serde_json::Value, field: &str) -> Result<String, GraphError> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GraphError::MissingField {
            field: field.to_string(),
        })
}

fn opt_str(obj: &serde_json::Value, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn str_list(obj: &serde_json::Value, field: &str) -> Vec<String> {
    obj.get(field)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn value_list(obj: &serde_json::Value, field: &str) -> Vec<serde_json::Value> {
    obj.get(field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

fn unit_err(unit: &str, message: impl Into<String>) -> GraphError {
    GraphError::UnitError {
        unit: unit.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_unit() -> serde_json::Value {
        serde_json::json!({
            "machine": {
                "meta": {
                    "status": "draft",
                    "platforms": ["web", "mobile"],
                    "entity": "booking",
                    "requiredFields": ["customerName"],
                    "setup": [
                        {"platform": "web", "instance": "bookingScreen", "method": "open", "args": []}
                    ],
                    "screens": [
                        {
                            "screenKey": "summary",
                            "order": 1,
                            "blocks": [
                                {"type": "ui-assertion", "enabled": true, "order": 0,
                                 "data": {"visible": ["title"], "hidden": [],
                                          "textChecks": [{"field": "total", "expected": "{{total}}"}]}},
                                {"type": "function-call", "enabled": false, "order": 1,
                                 "data": {"instance": "bookingScreen", "method": "refresh", "args": []}}
                            ]
                        }
                    ]
                },
                "entry": {"assign": {"status": "draft"}},
                "on": {
                    "SUBMIT": {
                        "target": "pending",
                        "platforms": ["web"],
                        "actionDetails": {
                            "imports": [{"className": "BookingActions",
                                         "path": "support/booking-actions",
                                         "varName": "bookingActions"}],
                            "steps": [{"instance": "bookingActions", "method": "submit",
                                       "args": ["{{customerName}}"], "storeAs": "bookingId"}]
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_single_state_unit() {
        let unit = parse_state_unit("booking-draft", &single_unit(), ParseMode::Strict).unwrap();
        assert_eq!(unit.name, "booking-draft");
        let node = unit.graph.node(None).unwrap();
        assert_eq!(node.meta.status.as_deref(), Some("draft"));
        assert_eq!(node.meta.entity.as_deref(), Some("booking"));
        assert_eq!(node.meta.required_fields, vec!["customerName"]);
        assert_eq!(node.on.len(), 1);
        let spec = &node.on["SUBMIT"];
        assert_eq!(spec.target, "pending");
        let details = spec.action_details.as_ref().unwrap();
        assert_eq!(details.imports[0].class_name, "BookingActions");
        assert_eq!(details.steps[0].store_as.as_deref(), Some("bookingId"));
    }

    #[test]
    fn test_parse_screens_and_blocks() {
        let unit = parse_state_unit("booking-draft", &single_unit(), ParseMode::Strict).unwrap();
        let node = unit.graph.node(None).unwrap();
        assert_eq!(node.meta.screens.len(), 1);
        let screen = &node.meta.screens[0];
        assert_eq!(screen.screen_key, "summary");
        assert_eq!(screen.blocks.len(), 2);
        assert!(screen.blocks[0].enabled);
        assert!(!screen.blocks[1].enabled);
        match &screen.blocks[0].data {
            BlockData::UiAssertion {
                visible,
                text_checks,
                ..
            } => {
                assert_eq!(visible, &vec!["title".to_string()]);
                assert_eq!(text_checks[0].field, "total");
            }
            other => panic!("expected ui-assertion, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_machine_field() {
        let doc = serde_json::json!({"meta": {}});
        let err = parse_state_unit("x", &doc, ParseMode::Strict).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingField {
                field: "machine".to_string()
            }
        );
    }

    #[test]
    fn test_multi_state_graph() {
        let doc = serde_json::json!({
            "machine": {
                "initial": "empty",
                "states": {
                    "empty": {"meta": {"status": "empty"}, "on": {"FILL": "filling"}},
                    "filling": {"meta": {"status": "filling"}, "on": {}}
                }
            }
        });
        let unit = parse_state_unit("wizard", &doc, ParseMode::Strict).unwrap();
        assert_eq!(unit.graph.state_names(), vec!["empty", "filling"]);
        let empty = unit.graph.node(Some("empty")).unwrap();
        assert_eq!(empty.on["FILL"].target, "filling");
        // No sub-state selects the initial state.
        let initial = unit.graph.node(None).unwrap();
        assert_eq!(initial.meta.status.as_deref(), Some("empty"));
    }

    #[test]
    fn test_multi_state_missing_initial() {
        let doc = serde_json::json!({
            "machine": {"states": {"a": {"meta": {}}}}
        });
        assert!(parse_state_unit("x", &doc, ParseMode::Strict).is_err());
    }

    #[test]
    fn test_strict_rejects_function_entry() {
        let doc = serde_json::json!({
            "machine": {
                "meta": {"status": "draft"},
                "entry": {"assign": {"total": "(ctx) => ctx.items.length"}},
                "on": {}
            }
        });
        assert!(parse_state_unit("x", &doc, ParseMode::Strict).is_err());
        let unit = parse_state_unit("x", &doc, ParseMode::Lenient).unwrap();
        let node = unit.graph.node(None).unwrap();
        let entry = node.entry.as_ref().unwrap();
        assert!(entry.fields["total"].is_opaque());
    }

    #[test]
    fn test_unknown_block_type() {
        let doc = serde_json::json!({
            "machine": {
                "meta": {
                    "status": "draft",
                    "screens": [{"screenKey": "main", "order": 0,
                                 "blocks": [{"type": "screenshot", "data": {}}]}]
                },
                "on": {}
            }
        });
        assert!(parse_state_unit("x", &doc, ParseMode::Strict).is_err());
        let unit = parse_state_unit("x", &doc, ParseMode::Lenient).unwrap();
        let node = unit.graph.node(None).unwrap();
        assert!(node.meta.screens[0].blocks.is_empty());
    }

    #[test]
    fn test_legacy_format_normalized() {
        let doc = serde_json::json!({
            "machine": {
                "meta": {
                    "status": "draft",
                    "visible": ["header", "submitButton"],
                    "hidden": ["errorBanner"],
                    "checks": {"total": "120.00"}
                },
                "on": {}
            }
        });
        let unit = parse_state_unit("legacy", &doc, ParseMode::Strict).unwrap();
        let node = unit.graph.node(None).unwrap();
        assert_eq!(node.meta.screens.len(), 1);
        let screen = &node.meta.screens[0];
        assert_eq!(screen.screen_key, "main");
        match &screen.blocks[0].data {
            BlockData::UiAssertion {
                visible,
                hidden,
                text_checks,
                ..
            } => {
                assert_eq!(visible.len(), 2);
                assert_eq!(hidden, &vec!["errorBanner".to_string()]);
                assert_eq!(text_checks[0].field, "total");
            }
            other => panic!("expected ui-assertion, got {:?}", other),
        }
    }

    #[test]
    fn test_blocks_sorted_by_order() {
        let doc = serde_json::json!({
            "machine": {
                "meta": {
                    "status": "draft",
                    "screens": [{"screenKey": "main", "order": 0, "blocks": [
                        {"type": "custom-code", "order": 2, "data": {"code": "b"}},
                        {"type": "custom-code", "order": 1, "data": {"code": "a"}}
                    ]}]
                },
                "on": {}
            }
        });
        let unit = parse_state_unit("x", &doc, ParseMode::Strict).unwrap();
        let blocks = &unit.graph.node(None).unwrap().meta.screens[0].blocks;
        match (&blocks[0].data, &blocks[1].data) {
            (BlockData::CustomCode { code: first }, BlockData::CustomCode { code: second }) => {
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected blocks: {:?}", other),
        }
    }

    #[test]
    fn test_transition_shorthand() {
        let doc = serde_json::json!({
            "machine": {"meta": {"status": "a"}, "on": {"GO": "b"}}
        });
        let unit = parse_state_unit("x", &doc, ParseMode::Strict).unwrap();
        let spec = &unit.graph.node(None).unwrap().on["GO"];
        assert_eq!(spec.target, "b");
        assert!(spec.action_details.is_none());
    }
}

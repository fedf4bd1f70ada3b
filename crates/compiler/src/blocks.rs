//! Validation-block lowering.
//!
//! Each screen's ordered, heterogeneous block list is lowered into an
//! emission plan in exactly one of two modes:
//!
//! - **Structured**: assertions become declarative check descriptors for
//!   the cross-platform assertion helper.
//! - **Raw**: assertions become direct browser-automation expression
//!   sequences (chained/indexable locator calls).
//!
//! Mode selection is per screen and short-circuits on the first matching
//! rule; a non-browser platform always downgrades back to structured,
//! because the raw dialect assumes browser locator APIs.

use log::{debug, warn};
use serde::Serialize;

use flowgen_graph::{Block, BlockData, ValidationScreen};

use crate::platform::Platform;
use crate::scope::{resolve_value, ScopeChain};
use crate::strings::{escape_js, to_camel, to_pascal};

/// Options passed down from the compile request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Global raw-mode override from the caller.
    pub force_raw: bool,
}

/// The chosen lowering strategy for one screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionMode {
    Structured,
    Raw,
}

/// Why raw mode was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RawReason {
    CallerOverride,
    CustomCode,
    FunctionAssertions,
    ExternalCall,
}

impl RawReason {
    pub fn describe(&self) -> &'static str {
        match self {
            RawReason::CallerOverride => "caller raw-mode override",
            RawReason::CustomCode => "custom code block",
            RawReason::FunctionAssertions => "function-based assertions",
            RawReason::ExternalCall => "external function call",
        }
    }
}

/// Index suffix parsed from an assertion field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldIndex {
    None,
    /// `field[N]` — the Nth match (zero-based; `field[0]` is the first).
    Nth { n: u32 },
    /// `field[last]` — the last match.
    Last,
    /// `field[all]` — iterate and assert every match.
    All,
    /// `field[any]` — assert at least one match (first match, asserted
    /// present).
    Any,
}

/// What a structured check asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "check", rename_all = "lowercase")]
pub enum CheckKind {
    Visible,
    Hidden,
    Text { expected: String },
    Data { expected: String },
}

/// One declarative check descriptor (structured mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckDescriptor {
    pub field: String,
    #[serde(flatten)]
    pub index: FieldIndex,
    #[serde(flatten)]
    pub kind: CheckKind,
}

/// A referenced instance that is not the screen's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRef {
    pub class_name: String,
    pub var_name: String,
}

/// The emission-ready plan for one screen.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionPlan {
    pub screen_key: String,
    pub mode: EmissionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RawReason>,
    /// Declarative checks (structured mode only).
    pub checks: Vec<CheckDescriptor>,
    /// Imperative statement lines: function calls in both modes, plus
    /// assertion expressions and custom code in raw mode.
    pub statements: Vec<String>,
    /// External instances referenced by function-call blocks, recorded
    /// once per class name.
    pub external_refs: Vec<ExternalRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation: Option<serde_json::Value>,
}

/// Parse the index suffix grammar on a field name. Malformed suffixes
/// are kept as part of the field name.
pub fn parse_field_index(raw: &str) -> (String, FieldIndex) {
    let Some(open) = raw.rfind('[') else {
        return (raw.to_string(), FieldIndex::None);
    };
    let Some(inner) = raw[open + 1..].strip_suffix(']') else {
        return (raw.to_string(), FieldIndex::None);
    };
    let base = raw[..open].to_string();
    if base.is_empty() {
        return (raw.to_string(), FieldIndex::None);
    }
    match inner {
        "last" => (base, FieldIndex::Last),
        "all" => (base, FieldIndex::All),
        "any" => (base, FieldIndex::Any),
        n => match n.parse::<u32>() {
            Ok(n) => (base, FieldIndex::Nth { n }),
            Err(_) => {
                warn!("unrecognized index suffix '[{}]' on field '{}'", n, raw);
                (raw.to_string(), FieldIndex::None)
            }
        },
    }
}

/// Lower one screen into an emission plan.
pub fn process(
    screen: &ValidationScreen,
    own_instance: &str,
    platform: Platform,
    transition_steps: &[flowgen_graph::ActionStep],
    context_fields: &[String],
    opts: ProcessOptions,
) -> EmissionPlan {
    let enabled: Vec<&Block> = screen.blocks.iter().filter(|b| b.enabled).collect();

    let (mode, reason) = select_mode(&enabled, own_instance, platform, opts);

    let mut plan = EmissionPlan {
        screen_key: screen.screen_key.clone(),
        mode,
        reason,
        checks: Vec::new(),
        statements: Vec::new(),
        external_refs: Vec::new(),
        navigation: screen.navigation.clone(),
    };

    // Scope chains are positional over the *enabled* block list: a block
    // sees bindings from transition steps and from enabled blocks that
    // precede it.
    let enabled_owned: Vec<Block> = enabled.iter().map(|b| (*b).clone()).collect();
    for (position, block) in enabled.iter().enumerate() {
        let chain = ScopeChain::for_block(
            transition_steps,
            &enabled_owned,
            position,
            context_fields,
        );
        lower_block(block, own_instance, &chain, &mut plan);
    }

    plan
}

/// Per-screen mode selection, short-circuiting in rule order.
fn select_mode(
    enabled: &[&Block],
    own_instance: &str,
    platform: Platform,
    opts: ProcessOptions,
) -> (EmissionMode, Option<RawReason>) {
    let raw_reason = raw_mode_reason(enabled, own_instance, opts);
    match raw_reason {
        Some(reason) if !platform.is_browser() => {
            debug!(
                "raw mode ({}) downgraded to structured on {}",
                reason.describe(),
                platform
            );
            (EmissionMode::Structured, None)
        }
        Some(reason) => (EmissionMode::Raw, Some(reason)),
        None => (EmissionMode::Structured, None),
    }
}

fn raw_mode_reason(
    enabled: &[&Block],
    own_instance: &str,
    opts: ProcessOptions,
) -> Option<RawReason> {
    if opts.force_raw {
        return Some(RawReason::CallerOverride);
    }
    if enabled.iter().any(|b| match &b.data {
        BlockData::CustomCode { code } => !code.trim().is_empty(),
        _ => false,
    }) {
        return Some(RawReason::CustomCode);
    }
    if enabled.iter().any(|b| match &b.data {
        BlockData::UiAssertion { assertions, .. } => !assertions.is_empty(),
        _ => false,
    }) {
        return Some(RawReason::FunctionAssertions);
    }
    if enabled.iter().any(|b| match &b.data {
        BlockData::FunctionCall { instance, .. } => instance != own_instance,
        _ => false,
    }) {
        return Some(RawReason::ExternalCall);
    }
    None
}

fn lower_block(block: &Block, own_instance: &str, chain: &ScopeChain, plan: &mut EmissionPlan) {
    match &block.data {
        BlockData::UiAssertion {
            visible,
            hidden,
            text_checks,
            assertions,
        } => {
            for field in visible {
                lower_check(field, CheckKind::Visible, own_instance, plan);
            }
            for field in hidden {
                lower_check(field, CheckKind::Hidden, own_instance, plan);
            }
            for check in text_checks {
                let expected = resolve_value(&check.expected, chain);
                lower_check(&check.field, CheckKind::Text { expected }, own_instance, plan);
            }
            for assertion in assertions {
                if plan.mode == EmissionMode::Raw {
                    let expected = resolve_value(&assertion.expected, chain);
                    plan.statements.push(format!(
                        "expect(await {}).toEqual({});",
                        assertion.call, expected
                    ));
                } else {
                    // Only reachable through the non-browser downgrade.
                    warn!(
                        "function assertion '{}' dropped: not expressible in structured mode",
                        assertion.call
                    );
                }
            }
        }
        BlockData::FunctionCall {
            instance,
            method,
            args,
            store_as,
        } => {
            if instance != own_instance {
                record_external(instance, plan);
            }
            let rendered_args: Vec<String> =
                args.iter().map(|a| resolve_value(a, chain)).collect();
            let call = format!("{}.{}({})", instance, method, rendered_args.join(", "));
            match store_as {
                Some(name) => plan
                    .statements
                    .push(format!("stored.{} = await {};", name, call)),
                None => plan.statements.push(format!("await {};", call)),
            }
        }
        BlockData::DataAssertion { field, expected } => {
            let expected = resolve_value(expected, chain);
            if plan.mode == EmissionMode::Raw {
                plan.statements.push(format!(
                    "expect(await {}.getValue('{}')).toEqual({});",
                    own_instance,
                    escape_js(field),
                    expected
                ));
            } else {
                lower_check(field, CheckKind::Data { expected }, own_instance, plan);
            }
        }
        BlockData::CustomCode { code } => {
            if plan.mode == EmissionMode::Raw {
                for line in code.lines() {
                    plan.statements.push(line.to_string());
                }
            } else if !code.trim().is_empty() {
                // Only reachable through the non-browser downgrade.
                warn!("custom code block dropped: not expressible in structured mode");
            }
        }
    }
}

/// Lower one field check, honoring the index-suffix grammar. Structured
/// mode keeps the descriptor; raw mode expands to locator expressions.
fn lower_check(raw_field: &str, kind: CheckKind, own_instance: &str, plan: &mut EmissionPlan) {
    let (field, index) = parse_field_index(raw_field);
    if plan.mode == EmissionMode::Structured {
        plan.checks.push(CheckDescriptor { field, index, kind });
        return;
    }

    let base = format!("{}.el('{}')", own_instance, escape_js(&field));
    let assertion = match &kind {
        CheckKind::Visible => "toBeVisible()".to_string(),
        CheckKind::Hidden => "toBeHidden()".to_string(),
        CheckKind::Text { expected } => format!("toHaveText({})", expected),
        CheckKind::Data { expected } => format!("toHaveValue({})", expected),
    };
    match index {
        FieldIndex::All => {
            // Iterate-and-assert-every shape.
            plan.statements.push(format!(
                "for (const item of await {}.all()) {{ await expect(item).{}; }}",
                base, assertion
            ));
        }
        FieldIndex::Any => {
            // First match, asserted present.
            plan.statements
                .push(format!("await expect({}.first()).{};", base, assertion));
        }
        FieldIndex::Nth { n } => {
            plan.statements
                .push(format!("await expect({}.nth({})).{};", base, n, assertion));
        }
        FieldIndex::Last => {
            plan.statements
                .push(format!("await expect({}.last()).{};", base, assertion));
        }
        FieldIndex::None => {
            plan.statements
                .push(format!("await expect({}).{};", base, assertion));
        }
    }
}

fn record_external(instance: &str, plan: &mut EmissionPlan) {
    let class_name = to_pascal(instance);
    if plan.external_refs.iter().any(|r| r.class_name == class_name) {
        return;
    }
    plan.external_refs.push(ExternalRef {
        class_name,
        var_name: to_camel(instance),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgen_graph::{FunctionAssertion, TextCheck};

    const OWN: &str = "bookingScreen";

    fn screen(blocks: Vec<Block>) -> ValidationScreen {
        ValidationScreen {
            screen_key: "summary".to_string(),
            order: 0,
            navigation: None,
            blocks,
        }
    }

    fn ui_block(visible: Vec<&str>) -> Block {
        Block {
            enabled: true,
            order: 0,
            data: BlockData::UiAssertion {
                visible: visible.into_iter().map(str::to_string).collect(),
                hidden: Vec::new(),
                text_checks: Vec::new(),
                assertions: Vec::new(),
            },
        }
    }

    fn call_block(instance: &str, store_as: Option<&str>) -> Block {
        Block {
            enabled: true,
            order: 0,
            data: BlockData::FunctionCall {
                instance: instance.to_string(),
                method: "refresh".to_string(),
                args: Vec::new(),
                store_as: store_as.map(str::to_string),
            },
        }
    }

    fn run(s: &ValidationScreen, platform: Platform, opts: ProcessOptions) -> EmissionPlan {
        process(s, OWN, platform, &[], &[], opts)
    }

    #[test]
    fn test_default_is_structured() {
        let s = screen(vec![ui_block(vec!["title"])]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Structured);
        assert_eq!(plan.checks.len(), 1);
        assert_eq!(plan.checks[0].field, "title");
        assert_eq!(plan.checks[0].kind, CheckKind::Visible);
    }

    #[test]
    fn test_caller_override_forces_raw() {
        let s = screen(vec![ui_block(vec!["title"])]);
        let plan = run(&s, Platform::Web, ProcessOptions { force_raw: true });
        assert_eq!(plan.mode, EmissionMode::Raw);
        assert_eq!(plan.reason, Some(RawReason::CallerOverride));
        assert_eq!(
            plan.statements,
            vec!["await expect(bookingScreen.el('title')).toBeVisible();"]
        );
    }

    #[test]
    fn test_custom_code_forces_raw() {
        let s = screen(vec![Block {
            enabled: true,
            order: 0,
            data: BlockData::CustomCode {
                code: "await page.reload();".to_string(),
            },
        }]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Raw);
        assert_eq!(plan.reason, Some(RawReason::CustomCode));
        assert_eq!(plan.statements, vec!["await page.reload();"]);
    }

    #[test]
    fn test_empty_custom_code_does_not_force_raw() {
        let s = screen(vec![
            Block {
                enabled: true,
                order: 0,
                data: BlockData::CustomCode {
                    code: "   ".to_string(),
                },
            },
            ui_block(vec!["title"]),
        ]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Structured);
    }

    #[test]
    fn test_function_assertions_force_raw() {
        let s = screen(vec![Block {
            enabled: true,
            order: 0,
            data: BlockData::UiAssertion {
                visible: Vec::new(),
                hidden: Vec::new(),
                text_checks: Vec::new(),
                assertions: vec![FunctionAssertion {
                    call: "bookingScreen.rowCount()".to_string(),
                    expected: serde_json::json!(3),
                }],
            },
        }]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Raw);
        assert_eq!(plan.reason, Some(RawReason::FunctionAssertions));
        assert_eq!(
            plan.statements,
            vec!["expect(await bookingScreen.rowCount()).toEqual(3);"]
        );
    }

    #[test]
    fn test_external_call_forces_raw_and_dedups_refs() {
        let s = screen(vec![
            call_block("paymentPanel", None),
            call_block("paymentPanel", None),
            call_block(OWN, None),
        ]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Raw);
        assert_eq!(plan.reason, Some(RawReason::ExternalCall));
        // Referenced twice, recorded once; the screen's own instance is
        // never recorded.
        assert_eq!(plan.external_refs.len(), 1);
        assert_eq!(plan.external_refs[0].class_name, "PaymentPanel");
        assert_eq!(plan.external_refs[0].var_name, "paymentPanel");
    }

    #[test]
    fn test_mobile_downgrades_raw_to_structured() {
        let s = screen(vec![
            call_block("paymentPanel", None),
            ui_block(vec!["title"]),
        ]);
        let plan = run(&s, Platform::Mobile, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Structured);
        assert!(plan.reason.is_none());
        // External refs are still collected for imports.
        assert_eq!(plan.external_refs.len(), 1);
        assert_eq!(plan.checks.len(), 1);
    }

    #[test]
    fn test_disabled_blocks_excluded_before_mode_selection() {
        let s = screen(vec![
            Block {
                enabled: false,
                order: 0,
                data: BlockData::CustomCode {
                    code: "await page.reload();".to_string(),
                },
            },
            ui_block(vec!["title"]),
        ]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Structured);
        assert!(plan.statements.is_empty());
    }

    #[test]
    fn test_index_suffix_grammar() {
        assert_eq!(parse_field_index("row"), ("row".to_string(), FieldIndex::None));
        assert_eq!(
            parse_field_index("row[2]"),
            ("row".to_string(), FieldIndex::Nth { n: 2 })
        );
        assert_eq!(
            parse_field_index("row[0]"),
            ("row".to_string(), FieldIndex::Nth { n: 0 })
        );
        assert_eq!(parse_field_index("row[last]"), ("row".to_string(), FieldIndex::Last));
        assert_eq!(parse_field_index("row[all]"), ("row".to_string(), FieldIndex::All));
        assert_eq!(parse_field_index("row[any]"), ("row".to_string(), FieldIndex::Any));
        assert_eq!(
            parse_field_index("row[wat]"),
            ("row[wat]".to_string(), FieldIndex::None)
        );
    }

    #[test]
    fn test_index_shapes_in_raw_mode() {
        let s = screen(vec![Block {
            enabled: true,
            order: 0,
            data: BlockData::UiAssertion {
                visible: vec![
                    "row[2]".to_string(),
                    "row[all]".to_string(),
                    "row[any]".to_string(),
                ],
                hidden: Vec::new(),
                text_checks: Vec::new(),
                assertions: Vec::new(),
            },
        }]);
        let plan = run(&s, Platform::Web, ProcessOptions { force_raw: true });
        assert_eq!(
            plan.statements[0],
            "await expect(bookingScreen.el('row').nth(2)).toBeVisible();"
        );
        // `all` lowers to a loop, `any` to a first-match access.
        assert!(plan.statements[1].starts_with("for (const item of await bookingScreen.el('row').all())"));
        assert_eq!(
            plan.statements[2],
            "await expect(bookingScreen.el('row').first()).toBeVisible();"
        );
    }

    #[test]
    fn test_store_as_visible_to_later_blocks() {
        let text_block = Block {
            enabled: true,
            order: 1,
            data: BlockData::UiAssertion {
                visible: Vec::new(),
                hidden: Vec::new(),
                text_checks: vec![TextCheck {
                    field: "total".to_string(),
                    expected: serde_json::json!("{{grandTotal}}"),
                }],
                assertions: Vec::new(),
            },
        };
        let s = screen(vec![call_block(OWN, Some("grandTotal")), text_block]);
        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(plan.mode, EmissionMode::Structured);
        assert_eq!(plan.statements, vec!["stored.grandTotal = await bookingScreen.refresh();"]);
        match &plan.checks[0].kind {
            CheckKind::Text { expected } => assert_eq!(expected, "stored.grandTotal"),
            other => panic!("expected text check, got {:?}", other),
        }
    }

    #[test]
    fn test_data_assertion_both_modes() {
        let block = Block {
            enabled: true,
            order: 0,
            data: BlockData::DataAssertion {
                field: "status".to_string(),
                expected: serde_json::json!("confirmed"),
            },
        };
        let s = screen(vec![block]);

        let plan = run(&s, Platform::Web, ProcessOptions::default());
        assert_eq!(
            plan.checks[0].kind,
            CheckKind::Data {
                expected: "'confirmed'".to_string()
            }
        );

        let plan = run(&s, Platform::Web, ProcessOptions { force_raw: true });
        assert_eq!(
            plan.statements,
            vec!["expect(await bookingScreen.getValue('status')).toEqual('confirmed');"]
        );
    }
}

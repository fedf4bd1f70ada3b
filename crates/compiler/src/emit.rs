//! Code emission: built-in templates, render-context assembly, and the
//! artifact naming convention.
//!
//! The emitter only reads the render context; everything in it is
//! resolved before rendering, so the templates stay purely presentational.

use std::path::Path;

use serde_json::{json, Value};

use flowgen_graph::ActionStep;

use crate::blocks::EmissionPlan;
use crate::metadata::Metadata;
use crate::paths::resolve_reference;
use crate::platform::Platform;
use crate::project::Project;
use crate::scope::{resolve_value, ScopeChain};
use crate::strings::{escape_js, to_pascal};
use crate::template::TemplateEngine;

/// Template id for browser tests.
pub const WEB_UNIT: &str = "web-unit";
/// Template id for non-browser tests.
pub const MOBILE_UNIT: &str = "mobile-unit";

/// Fallback utilities module when the config does not name one.
const DEFAULT_UTILITIES: &str = "support/utilities";

const WEB_UNIT_SOURCE: &str = r#"// Generated test. Do not edit by hand.
'use strict';

const { expect } = require('@playwright/test');
{{#each imports}}const { {{this.className}} } = require('{{this.path}}');
{{/each}}const { {{namespace}} } = require('{{utilitiesPath}}');

describe('{{title}}', () => {
  const stored = {};
  const testData = global.testData || {};
{{#each imports}}  let {{this.varName}};
{{/each}}{{#if entityLogic}}  const subjects = [].concat(testData['{{entity}}'] || []);
{{/if}}
  before(async () => {
{{#each imports}}    {{this.varName}} = new {{this.className}}(page);
{{/each}}{{#each setup}}    {{this}}
{{/each}}  });

  it('{{caseName}}', async () => {
{{#each steps}}    {{this}}
{{/each}}{{#each screens}}    // screen: {{this.screenKey}}
{{#each this.statements}}    {{this}}
{{/each}}{{#each this.checks}}    await {{namespace}}.verify({{instanceName}}, {{json this}});
{{/each}}{{/each}}{{#each deltaFields}}    await {{namespace}}.verifyField({{instanceName}}, '{{this.field}}', {{this.value}});
{{/each}}  });
});
"#;

const MOBILE_UNIT_SOURCE: &str = r#"// Generated test. Do not edit by hand.
'use strict';

{{#each imports}}const { {{this.className}} } = require('{{this.path}}');
{{/each}}const { {{namespace}} } = require('{{utilitiesPath}}');

describe('{{title}}', () => {
  const stored = {};
  const testData = driver.testData || {};
{{#each imports}}  let {{this.varName}};
{{/each}}{{#if entityLogic}}  const subjects = [].concat(testData['{{entity}}'] || []);
{{/if}}
  before(async () => {
{{#each imports}}    {{this.varName}} = new {{this.className}}(driver);
{{/each}}{{#each setup}}    {{this}}
{{/each}}  });

  it('{{caseName}}', async () => {
{{#each steps}}    {{this}}
{{/each}}{{#each screens}}    // screen: {{this.screenKey}}
{{#each this.statements}}    {{this}}
{{/each}}{{#each this.checks}}    await {{namespace}}.verify({{instanceName}}, {{json this}});
{{/each}}{{/each}}{{#each deltaFields}}    await {{namespace}}.verifyField({{instanceName}}, '{{this.field}}', {{this.value}});
{{/each}}  });
});
"#;

/// An engine with the built-in templates registered.
pub fn builtin_engine() -> TemplateEngine {
    let mut engine = TemplateEngine::new();
    engine.register(WEB_UNIT, WEB_UNIT_SOURCE);
    engine.register(MOBILE_UNIT, MOBILE_UNIT_SOURCE);
    engine
}

pub fn template_id(platform: Platform) -> &'static str {
    match platform {
        Platform::Web => WEB_UNIT,
        Platform::Mobile => MOBILE_UNIT,
    }
}

/// Artifact file name. The event segment is only present when a specific
/// transition event drove the compilation.
pub fn file_name(action_name: &str, event: Option<&str>, platform: Platform) -> String {
    match event {
        Some(event) => format!(
            "{}-{}-{}-UNIT.spec.js",
            to_pascal(action_name),
            to_pascal(event),
            platform.suffix()
        ),
        None => format!("{}-{}-UNIT.spec.js", to_pascal(action_name), platform.suffix()),
    }
}

/// Everything the context builder needs for one emission.
pub struct EmitInputs<'a> {
    pub project: &'a Project,
    pub platform: Platform,
    pub metadata: &'a Metadata,
    pub plans: &'a [EmissionPlan],
    /// The explicit transition event, when one drove the compilation.
    pub event: Option<&'a str>,
    /// Where the artifact will be written; import paths are relative to
    /// its directory.
    pub out_file: &'a Path,
}

/// Assemble the flat render context for the templates. Built once per
/// `(state, platform)` pair and never reused across pairs.
pub fn build_context(inputs: &EmitInputs) -> Value {
    let meta = inputs.metadata;

    let imports = collect_imports(inputs);
    let setup = render_setup(meta);
    let steps = render_steps(meta);

    let title = match (&meta.previous_status, meta.inducer) {
        (_, true) => format!("{} [{}]", meta.status, inputs.platform),
        (Some(prev), false) => format!("{} via {} [{}]", meta.status, prev, inputs.platform),
        (None, false) => format!("{} [{}]", meta.status, inputs.platform),
    };
    let case_name = match inputs.event {
        Some(event) => format!("reaches '{}' on {}", meta.status, event),
        None => format!("reaches '{}'", meta.status),
    };

    let delta_fields: Vec<Value> = meta
        .delta_fields
        .iter()
        .map(|(field, value)| json!({"field": escape_js(field), "value": value}))
        .collect();

    let screens: Vec<Value> = inputs
        .plans
        .iter()
        .map(|plan| serde_json::to_value(plan).unwrap_or(Value::Null))
        .collect();

    json!({
        "title": title,
        "caseName": case_name,
        "className": meta.class_name,
        "instanceName": meta.instance_name,
        "status": meta.status,
        "previousStatus": meta.previous_status,
        "actionName": meta.action_name,
        "entity": meta.entity,
        "entityLogic": meta.entity_logic,
        "inducer": meta.inducer,
        "platform": inputs.platform.key(),
        "namespace": inputs.project.config.validation_namespace(inputs.platform),
        "utilitiesPath": utilities_path(inputs),
        "imports": imports,
        "setup": setup,
        "steps": steps,
        "deltaFields": delta_fields,
        "requiredFields": meta.required_fields,
        "screens": screens,
    })
}

/// Own screen reference first, then the primary transition's declared
/// imports, then the unique external references from the metadata
/// record. Deduplicated by class name.
fn collect_imports(inputs: &EmitInputs) -> Vec<Value> {
    let meta = inputs.metadata;
    let mut seen: Vec<String> = Vec::new();
    let mut imports: Vec<Value> = Vec::new();

    let mut push = |class_name: &str, var_name: &str, target: &str| {
        if seen.iter().any(|c| c == class_name) {
            return;
        }
        seen.push(class_name.to_string());
        let path = resolve_reference(inputs.project, inputs.out_file, target, inputs.platform);
        imports.push(json!({
            "className": class_name,
            "varName": var_name,
            "path": path,
        }));
    };

    push(&meta.class_name, &meta.instance_name, &meta.class_name);

    if let Some(primary) = &meta.transitions.primary {
        if let Some(details) = &primary.action_details {
            for import in &details.imports {
                push(&import.class_name, &import.var_name, &import.path);
            }
        }
    }
    for external in &meta.external_refs {
        push(&external.class_name, &external.var_name, &external.class_name);
    }

    imports
}

fn utilities_path(inputs: &EmitInputs) -> String {
    let target = inputs
        .project
        .config
        .utilities_path
        .as_deref()
        .unwrap_or(DEFAULT_UTILITIES);
    resolve_reference(inputs.project, inputs.out_file, target, inputs.platform)
}

fn render_setup(meta: &Metadata) -> Vec<String> {
    let chain = ScopeChain::for_block(&[], &[], 0, &meta.required_fields);
    meta.setup
        .iter()
        .map(|entry| {
            let args: Vec<String> = entry.args.iter().map(|a| resolve_value(a, &chain)).collect();
            format!("await {}.{}({});", entry.instance, entry.method, args.join(", "))
        })
        .collect()
}

/// The primary transition's action steps as statements. Each step's
/// arguments see the stored results of the steps before it.
fn render_steps(meta: &Metadata) -> Vec<String> {
    let Some(primary) = &meta.transitions.primary else {
        return Vec::new();
    };
    let Some(details) = &primary.action_details else {
        return Vec::new();
    };
    let steps: &[ActionStep] = &details.steps;
    let mut rendered = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let chain = ScopeChain::for_block(&steps[..i], &[], 0, &meta.required_fields);
        let args: Vec<String> = step.args.iter().map(|a| resolve_value(a, &chain)).collect();
        let call = format!("{}.{}({})", step.instance, step.method, args.join(", "));
        match &step.store_as {
            Some(name) => rendered.push(format!("stored.{} = await {};", name, call)),
            None => rendered.push(format!("await {};", call)),
        }
    }
    rendered
}

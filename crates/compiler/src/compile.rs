//! Compilation orchestration.
//!
//! `Compiler` owns every cache (unit arena, compiled templates, the
//! discovery-index and registry snapshots), so sharing across threads is
//! a question of who owns the value, nothing more. Each compile runs
//! start-to-finish with no suspension points; identical inputs produce
//! byte-identical output.

use std::path::{Path, PathBuf};

use log::{debug, info};

use flowgen_graph::{DiscoveryIndex, StateRegistry, StateUnit};

use crate::blocks::{self, EmissionPlan, ProcessOptions};
use crate::emit::{self, EmitInputs};
use crate::error::CompileError;
use crate::loader::{self, UnitArena};
use crate::metadata::{self, Metadata};
use crate::platform::Platform;
use crate::project::Project;
use crate::template::TemplateEngine;
use crate::transitions::{self, ExplicitTransition, ResolvedTransitions, ResolverEnv};

/// Default output directory under the project root.
const DEFAULT_OUT_DIR: &str = "generated";

/// One compilation request: a unit, a platform, and the optional knobs.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub unit_path: PathBuf,
    pub platform: Platform,
    /// Sub-state of a multi-state graph; `None` selects the single or
    /// initial state.
    pub target_state: Option<String>,
    /// Explicit `(event, from)` pair; when set, transition resolution
    /// trusts only the on-disk source unit and the artifact name carries
    /// the event segment.
    pub explicit: Option<ExplicitTransition>,
    /// Force raw emission mode regardless of block contents.
    pub force_raw: bool,
    /// Artifact directory; defaults to `generated/` under the root.
    pub out_dir: Option<PathBuf>,
}

impl CompileRequest {
    pub fn new(unit_path: impl Into<PathBuf>, platform: Platform) -> CompileRequest {
        CompileRequest {
            unit_path: unit_path.into(),
            platform,
            target_state: None,
            explicit: None,
            force_raw: false,
            out_dir: None,
        }
    }
}

/// A finished compilation: artifact name, source text, and the metadata
/// record for introspection by the calling layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompileOutput {
    pub file_name: String,
    pub source: String,
    pub metadata: Metadata,
}

/// The compiler: a project plus every process-lifetime cache.
pub struct Compiler {
    project: Project,
    arena: UnitArena,
    engine: TemplateEngine,
    index: DiscoveryIndex,
    registry: StateRegistry,
}

impl Compiler {
    /// Build a compiler for an already-resolved project. The discovery
    /// index and registry are read once here and treated as immutable
    /// snapshots; call [`Compiler::refresh`] to re-read them.
    pub fn new(project: Project) -> Compiler {
        let index = project.load_discovery_index();
        let registry = project.load_registry();
        Compiler {
            project,
            arena: UnitArena::new(),
            engine: emit::builtin_engine(),
            index,
            registry,
        }
    }

    /// Discover the project root from a path and build a compiler.
    pub fn for_path(start: &Path) -> Result<Compiler, CompileError> {
        Ok(Compiler::new(Project::discover(start)?))
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Re-read the config, index and registry snapshots and drop all
    /// cached units.
    pub fn refresh(&mut self) {
        self.project.reload_config();
        self.index = self.project.load_discovery_index();
        self.registry = self.project.load_registry();
        self.arena.invalidate_all();
    }

    /// Compile one `(state, platform)` pair.
    pub fn compile(&mut self, request: &CompileRequest) -> Result<CompileOutput, CompileError> {
        let unit = self.arena.load(&request.unit_path)?.clone();
        self.compile_unit(&unit, request)
    }

    /// Compile every addressable state of a unit: one output for a
    /// single-state graph, one per sub-state otherwise (unless the
    /// request names a specific state).
    pub fn compile_all(
        &mut self,
        request: &CompileRequest,
    ) -> Result<Vec<CompileOutput>, CompileError> {
        let unit = self.arena.load(&request.unit_path)?.clone();
        if request.target_state.is_some() {
            return Ok(vec![self.compile_unit(&unit, request)?]);
        }
        let names: Vec<String> = unit.graph.state_names().iter().map(|s| s.to_string()).collect();
        if names.is_empty() {
            return Ok(vec![self.compile_unit(&unit, request)?]);
        }
        let mut outputs = Vec::with_capacity(names.len());
        for name in names {
            let mut sub = request.clone();
            sub.target_state = Some(name);
            outputs.push(self.compile_unit(&unit, &sub)?);
        }
        Ok(outputs)
    }

    /// Resolve incoming transitions for a status name, discovery mode.
    pub fn transitions_for(
        &mut self,
        status: &str,
        platform: Platform,
    ) -> Result<ResolvedTransitions, CompileError> {
        let path = loader::find_unit_file(&self.project, &self.registry, status, platform)?;
        let unit = self.arena.load(&path)?.clone();
        let env = ResolverEnv {
            project: &self.project,
            registry: &self.registry,
            index: &self.index,
            platform,
        };
        let declared = unit
            .graph
            .node(None)
            .and_then(|n| n.meta.previous_status.clone());
        transitions::resolve_incoming(
            &env,
            &mut self.arena,
            status,
            &unit.graph,
            declared.as_deref(),
            None,
        )
    }

    /// Extract the metadata record for every platform-addressable state
    /// of a unit, without emitting code.
    pub fn inspect(
        &mut self,
        unit_path: &Path,
        platform: Platform,
    ) -> Result<Vec<Metadata>, CompileError> {
        let unit = self.arena.load(unit_path)?.clone();
        let names = unit.graph.state_names();
        let targets: Vec<Option<String>> = if names.is_empty() {
            vec![None]
        } else {
            names.iter().map(|n| Some(n.to_string())).collect()
        };
        let mut records = Vec::with_capacity(targets.len());
        for target in targets {
            let resolved = self.resolve_for(&unit, target.as_deref(), platform, None)?;
            records.push(metadata::extract(&unit, platform, target.as_deref(), resolved)?);
        }
        Ok(records)
    }

    fn compile_unit(
        &mut self,
        unit: &StateUnit,
        request: &CompileRequest,
    ) -> Result<CompileOutput, CompileError> {
        let target = request.target_state.as_deref();
        let resolved =
            self.resolve_for(unit, target, request.platform, request.explicit.as_ref())?;
        let meta = metadata::extract(unit, request.platform, target, resolved)?;
        debug!(
            "unit '{}' state '{}' on {}: {} incoming transition(s), inducer={}",
            unit.name,
            meta.status,
            request.platform,
            meta.transitions.all.len(),
            meta.inducer
        );

        let steps = meta
            .transitions
            .primary
            .as_ref()
            .and_then(|t| t.action_details.as_ref())
            .map(|d| d.steps.clone())
            .unwrap_or_default();
        let opts = ProcessOptions {
            force_raw: request.force_raw,
        };
        let plans: Vec<EmissionPlan> = meta
            .screens
            .iter()
            .map(|screen| {
                blocks::process(
                    screen,
                    &meta.instance_name,
                    request.platform,
                    &steps,
                    &meta.required_fields,
                    opts,
                )
            })
            .collect();

        let event = request.explicit.as_ref().map(|e| e.event.as_str());
        let file_name = emit::file_name(&meta.action_name, event, request.platform);
        let out_file = self.out_dir(request).join(&file_name);

        let context = emit::build_context(&EmitInputs {
            project: &self.project,
            platform: request.platform,
            metadata: &meta,
            plans: &plans,
            event,
            out_file: &out_file,
        });
        let source = self
            .engine
            .render(emit::template_id(request.platform), &context)?;
        info!("compiled {} ({} bytes)", file_name, source.len());

        Ok(CompileOutput {
            file_name,
            source,
            metadata: meta,
        })
    }

    fn resolve_for(
        &mut self,
        unit: &StateUnit,
        target: Option<&str>,
        platform: Platform,
        explicit: Option<&ExplicitTransition>,
    ) -> Result<ResolvedTransitions, CompileError> {
        let node = unit.graph.node(target).ok_or_else(|| {
            CompileError::Validation(format!(
                "sub-state '{}' not present in unit '{}'",
                target.unwrap_or(""),
                unit.name
            ))
        })?;
        let status = node
            .meta
            .status
            .clone()
            .or_else(|| target.map(str::to_string))
            .unwrap_or_else(|| unit.name.clone());
        let env = ResolverEnv {
            project: &self.project,
            registry: &self.registry,
            index: &self.index,
            platform,
        };
        transitions::resolve_incoming(
            &env,
            &mut self.arena,
            &status,
            &unit.graph,
            node.meta.previous_status.as_deref(),
            explicit,
        )
    }

    fn out_dir(&self, request: &CompileRequest) -> PathBuf {
        match &request.out_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project.root.join(dir),
            None => self.project.root.join(DEFAULT_OUT_DIR),
        }
    }
}

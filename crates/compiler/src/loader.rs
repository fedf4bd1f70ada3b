//! Source loader: obtains state units from disk.
//!
//! Units live in an arena keyed by absolute path, with explicit
//! invalidation. Loading tries a strict parse first; units that carry
//! executable source in literal positions fall back to a lenient parse
//! that degrades those fields to opaque placeholders. Partial metadata
//! is more useful downstream than a hard failure, so only a unit that
//! neither strategy can shape into a state graph is a `Load` error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use flowgen_graph::{parse_state_unit, ParseMode, StateRegistry, StateUnit};

use crate::error::CompileError;
use crate::platform::Platform;
use crate::project::Project;

/// File suffix for state units.
pub const UNIT_SUFFIX: &str = ".machine.json";

/// Arena of loaded units, keyed by absolute path.
#[derive(Debug, Default)]
pub struct UnitArena {
    units: HashMap<PathBuf, StateUnit>,
}

impl UnitArena {
    pub fn new() -> UnitArena {
        UnitArena::default()
    }

    /// Load the unit at `path`, reusing the arena entry if present.
    pub fn load(&mut self, path: &Path) -> Result<&StateUnit, CompileError> {
        let key = absolute(path);
        if !self.units.contains_key(&key) {
            let unit = load_unit_file(&key)?;
            self.units.insert(key.clone(), unit);
        }
        Ok(&self.units[&key])
    }

    /// Drop one cached unit so the next load re-reads the file.
    pub fn invalidate(&mut self, path: &Path) {
        self.units.remove(&absolute(path));
    }

    /// Drop every cached unit.
    pub fn invalidate_all(&mut self) {
        self.units.clear();
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read and parse one unit file: strict first, lenient fallback.
fn load_unit_file(path: &Path) -> Result<StateUnit, CompileError> {
    let name = unit_basename(path);
    let attempted = vec![path.display().to_string()];

    let text = fs::read_to_string(path).map_err(|_| CompileError::Load {
        unit: name.clone(),
        attempted: attempted.clone(),
    })?;
    let doc: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| CompileError::Graph {
            unit: name.clone(),
            source: flowgen_graph::GraphError::InvalidGraph(format!("not valid JSON: {}", e)),
        })?;

    match parse_state_unit(&name, &doc, ParseMode::Strict) {
        Ok(unit) => Ok(unit),
        Err(strict_err) => {
            debug!(
                "strict parse of '{}' failed ({}), retrying leniently",
                name, strict_err
            );
            match parse_state_unit(&name, &doc, ParseMode::Lenient) {
                Ok(unit) => {
                    warn!(
                        "unit '{}' loaded with degraded fields: {}",
                        name, strict_err
                    );
                    Ok(unit)
                }
                Err(lenient_err) => Err(CompileError::Graph {
                    unit: name,
                    source: lenient_err,
                }),
            }
        }
    }
}

/// Unit basename without the `.machine.json` suffix.
pub fn unit_basename(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    file.strip_suffix(UNIT_SUFFIX)
        .or_else(|| file.strip_suffix(".json"))
        .unwrap_or(&file)
        .to_string()
}

/// Locate the unit file for a status name: registry lookup first, then
/// `<status>.machine.json` by naming convention in the configured search
/// paths, then a directory scan matching on normalized names.
pub fn find_unit_file(
    project: &Project,
    registry: &StateRegistry,
    status: &str,
    platform: Platform,
) -> Result<PathBuf, CompileError> {
    let mut attempted: Vec<String> = Vec::new();
    let search_paths = project.config.search_paths_for(platform);

    // 1. Registry: status → basename.
    if let Some(basename) = registry.lookup(status) {
        for dir in &search_paths {
            let candidate = project
                .root
                .join(dir)
                .join(format!("{}{}", basename, UNIT_SUFFIX));
            if candidate.is_file() {
                return Ok(candidate);
            }
            attempted.push(candidate.display().to_string());
        }
    }

    // 2. Naming convention: <status>.machine.json, as-is and snake/kebab.
    let mut names = vec![status.to_string()];
    let snake = crate::strings::to_snake(status);
    if !names.contains(&snake) {
        names.push(snake.clone());
    }
    let kebab = snake.replace('_', "-");
    if !names.contains(&kebab) {
        names.push(kebab);
    }
    for dir in &search_paths {
        for name in &names {
            let candidate = project
                .root
                .join(dir)
                .join(format!("{}{}", name, UNIT_SUFFIX));
            if candidate.is_file() {
                return Ok(candidate);
            }
            attempted.push(candidate.display().to_string());
        }
    }

    // 3. Directory scan with normalized-name matching.
    let wanted = flowgen_graph::normalize_state_name(status);
    for dir in &search_paths {
        let dir_path = project.root.join(dir);
        let Ok(entries) = fs::read_dir(&dir_path) else {
            continue;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(UNIT_SUFFIX))
            .collect();
        files.sort();
        for file in files {
            let base = unit_basename(&file);
            if flowgen_graph::normalize_state_name(&base) == wanted {
                warn!(
                    "unit for '{}' found by directory scan at {}",
                    status,
                    file.display()
                );
                return Ok(file);
            }
        }
        attempted.push(format!("{}/*{}", dir_path.display(), UNIT_SUFFIX));
    }

    Err(CompileError::Load {
        unit: status.to_string(),
        attempted,
    })
}

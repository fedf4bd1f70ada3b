//! Project root resolution and per-project configuration.
//!
//! A "project" is the directory tree containing the state units, the
//! discovery index, the state registry, and the generated artifacts. The
//! root is found by walking parent directories; all on-disk references
//! are resolved against it, so nothing ever mutates the process working
//! directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;

use flowgen_graph::{DiscoveryIndex, StateRegistry};

use crate::error::CompileError;
use crate::platform::Platform;

/// Project marker and config file name.
pub const CONFIG_FILE: &str = "flowgen.config.json";
/// Marker directory recognized when no config file exists.
pub const SCREENS_DIR: &str = "screens";
/// Discovery index file, relative to the project root.
pub const INDEX_FILE: &str = "transitions.index.json";
/// State registry file, relative to the project root.
pub const REGISTRY_FILE: &str = "states.registry.json";

/// Per-project configuration, deserialized from `flowgen.config.json`.
/// Every field has a default so a missing or partial file still works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Platform key → ordered search-path list (relative to the root)
    /// for screen objects and state units.
    pub search_paths: BTreeMap<String, Vec<String>>,
    /// Search paths consulted for every platform, after the
    /// platform-specific ones.
    pub shared_search_paths: Vec<String>,
    /// Platform key → validation-namespace key used by the structured
    /// assertion helper in emitted code.
    pub validation_namespaces: BTreeMap<String, String>,
    /// Explicit path to the shared test utilities module.
    pub utilities_path: Option<String>,
    /// Prefixes that mark a reference as already project-rooted.
    pub root_markers: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let mut search_paths = BTreeMap::new();
        search_paths.insert(
            "web".to_string(),
            vec!["screens/web".to_string(), "support/web".to_string()],
        );
        search_paths.insert(
            "mobile".to_string(),
            vec!["screens/mobile".to_string(), "support/mobile".to_string()],
        );

        let mut validation_namespaces = BTreeMap::new();
        validation_namespaces.insert("web".to_string(), "webChecks".to_string());
        validation_namespaces.insert("mobile".to_string(), "mobileChecks".to_string());

        ProjectConfig {
            search_paths,
            shared_search_paths: vec!["screens".to_string(), "support".to_string()],
            validation_namespaces,
            utilities_path: None,
            root_markers: vec![
                "screens/".to_string(),
                "support/".to_string(),
                "src/".to_string(),
            ],
        }
    }
}

impl ProjectConfig {
    /// Ordered search paths for a platform: platform-specific first,
    /// then shared.
    pub fn search_paths_for(&self, platform: Platform) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .search_paths
            .get(platform.key())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default();
        paths.extend(self.shared_search_paths.iter().map(String::as_str));
        paths
    }

    /// Validation-namespace key for a platform, with a derived default.
    pub fn validation_namespace(&self, platform: Platform) -> String {
        self.validation_namespaces
            .get(platform.key())
            .cloned()
            .unwrap_or_else(|| format!("{}Checks", platform.key()))
    }
}

/// A resolved project: root directory plus loaded configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    /// Walk parent directories from `start` until one contains the
    /// config file or a `screens/` marker directory.
    pub fn discover(start: &Path) -> Result<Project, CompileError> {
        let origin = if start.is_file() {
            start.parent().unwrap_or(start)
        } else {
            start
        };
        let mut dir = Some(origin);
        while let Some(candidate) = dir {
            if candidate.join(CONFIG_FILE).is_file() || candidate.join(SCREENS_DIR).is_dir() {
                let root = candidate.to_path_buf();
                let config = load_config(&root);
                debug!("project root resolved to {}", root.display());
                return Ok(Project { root, config });
            }
            dir = candidate.parent();
        }
        Err(CompileError::NoProjectRoot {
            start: origin.display().to_string(),
            marker: format!("{} or {}/", CONFIG_FILE, SCREENS_DIR),
        })
    }

    /// Open a project at a known root without walking parents.
    pub fn open(root: &Path) -> Project {
        Project {
            root: root.to_path_buf(),
            config: load_config(root),
        }
    }

    /// Re-read the configuration from disk. The only cache invalidation
    /// for config is this explicit call (or dropping the project).
    pub fn reload_config(&mut self) {
        self.config = load_config(&self.root);
    }

    /// Load the discovery index snapshot. A missing or unreadable file
    /// degrades to an empty index; resolution then falls back to the
    /// previous-state heuristic.
    pub fn load_discovery_index(&self) -> DiscoveryIndex {
        let path = self.root.join(INDEX_FILE);
        match read_json(&path) {
            Some(v) => DiscoveryIndex::from_value(&v),
            None => {
                debug!("no discovery index at {}", path.display());
                DiscoveryIndex::default()
            }
        }
    }

    /// Load the state registry. Missing file degrades to an empty
    /// registry; unit lookup then falls back to naming convention.
    pub fn load_registry(&self) -> StateRegistry {
        let path = self.root.join(REGISTRY_FILE);
        match read_json(&path) {
            Some(v) => StateRegistry::from_value(&v),
            None => {
                debug!("no state registry at {}", path.display());
                StateRegistry::default()
            }
        }
    }
}

fn load_config(root: &Path) -> ProjectConfig {
    let path = root.join(CONFIG_FILE);
    let Some(value) = read_json(&path) else {
        return ProjectConfig::default();
    };
    match serde_json::from_value(value) {
        Ok(config) => config,
        Err(e) => {
            warn!("config {} is malformed ({}), using defaults", path.display(), e);
            ProjectConfig::default()
        }
    }
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("unparseable JSON in {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_by_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let nested = dir.path().join("screens/web");
        fs::create_dir_all(&nested).unwrap();

        let project = Project::discover(&nested).unwrap();
        assert_eq!(project.root, dir.path());
    }

    #[test]
    fn test_discover_by_screens_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("screens")).unwrap();
        let project = Project::discover(dir.path()).unwrap();
        assert_eq!(project.root, dir.path());
    }

    #[test]
    fn test_discover_failure_lists_markers() {
        let dir = tempfile::tempdir().unwrap();
        let err = Project::discover(dir.path());
        // The tempdir has no markers; the walk may still hit one in an
        // ancestor, so only assert the error shape when it fails.
        if let Err(CompileError::NoProjectRoot { marker, .. }) = err {
            assert!(marker.contains(CONFIG_FILE));
        }
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path());
        assert_eq!(project.config.validation_namespace(Platform::Web), "webChecks");
        let paths = project.config.search_paths_for(Platform::Web);
        assert!(paths.contains(&"screens/web"));
        assert!(paths.contains(&"screens"));
    }

    #[test]
    fn test_partial_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            serde_json::json!({
                "validationNamespaces": {"web": "checks"},
                "rootMarkers": ["app/"]
            })
            .to_string(),
        )
        .unwrap();
        let project = Project::open(dir.path());
        assert_eq!(project.config.validation_namespace(Platform::Web), "checks");
        // Unset fields fall back to ProjectConfig::default values.
        assert!(!project.config.shared_search_paths.is_empty());
        assert_eq!(project.config.root_markers, vec!["app/".to_string()]);
    }
}

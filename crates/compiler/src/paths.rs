//! Import path resolution for emitted artifacts.
//!
//! Emitted test files reference screen objects and helper modules by
//! relative path. Resolution never fails: each strategy is tried in
//! priority order and the last resort is a conventional guess, logged so
//! a broken import is traceable back to the compile run.

use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use crate::platform::Platform;
use crate::project::Project;
use crate::strings::to_pascal;

/// Conventional directory names checked during the parent walk.
const SIBLING_DIRS: &[&str] = &["screens", "screen-objects", "pages", "pageobjects"];

/// File extensions tried when testing a candidate for existence.
const CANDIDATE_EXTENSIONS: &[&str] = &["js", "mjs", "ts"];

/// Resolve a reference from an emitted artifact to a dependency module.
///
/// `from_artifact` is the path (project-relative or absolute) of the file
/// that will contain the import; `target` is either a project-rooted
/// path or a bare module name. The result uses `/` separators and always
/// carries a `./` or `../` prefix.
pub fn resolve_reference(
    project: &Project,
    from_artifact: &Path,
    target: &str,
    platform: Platform,
) -> String {
    let from_dir = artifact_dir(project, from_artifact);

    // 1. Already project-rooted: relativize against the artifact.
    if let Some(found) = resolve_rooted(project, &from_dir, target) {
        return found;
    }

    // 2. Platform-specific search paths, then 3. shared paths. The
    // config API returns them in exactly that order.
    if let Some(found) = resolve_search_paths(project, &from_dir, target, platform) {
        return found;
    }

    // 4. Parent walk for conventional sibling directories.
    if let Some(found) = resolve_parent_walk(project, &from_dir, target) {
        return found;
    }

    // 5. Conventional guess.
    let guess = format!("../{}", module_stem(target));
    warn!(
        "no resolution strategy matched '{}' from {}; guessing '{}'",
        target,
        from_dir.display(),
        guess
    );
    guess
}

fn resolve_rooted(project: &Project, from_dir: &Path, target: &str) -> Option<String> {
    let normalized = target.replace('\\', "/");
    let rooted = project
        .config
        .root_markers
        .iter()
        .any(|marker| normalized.starts_with(marker.as_str()));
    if !rooted {
        return None;
    }
    let absolute = project.root.join(&normalized);
    let relative = relativize(from_dir, &absolute);
    debug!("'{}' resolved as project-rooted -> {}", target, relative);
    Some(relative)
}

fn resolve_search_paths(
    project: &Project,
    from_dir: &Path,
    target: &str,
    platform: Platform,
) -> Option<String> {
    let stem = module_stem(target);
    for search in project.config.search_paths_for(platform) {
        let dir = project.root.join(search);
        if let Some(file) = existing_candidate(&dir, &stem) {
            let relative = relativize(from_dir, &file);
            debug!("'{}' found under search path {} -> {}", target, search, relative);
            return Some(relative);
        }
    }
    None
}

fn resolve_parent_walk(project: &Project, from_dir: &Path, target: &str) -> Option<String> {
    let stem = module_stem(target);
    let mut dir = Some(from_dir);
    while let Some(current) = dir {
        for sibling in SIBLING_DIRS {
            let candidate_dir = current.join(sibling);
            if let Some(file) = existing_candidate(&candidate_dir, &stem) {
                let relative = relativize(from_dir, &file);
                debug!(
                    "'{}' found by parent walk in {} -> {}",
                    target,
                    candidate_dir.display(),
                    relative
                );
                return Some(relative);
            }
        }
        // The walk stops at the project root; imports above it would not
        // ship with the project.
        if current == project.root {
            break;
        }
        dir = current.parent();
    }
    None
}

/// Test a directory for a module file with the given stem, trying each
/// known extension plus the stem's Pascal variant.
fn existing_candidate(dir: &Path, stem: &str) -> Option<PathBuf> {
    let names = [stem.to_string(), to_pascal(stem)];
    for name in &names {
        for ext in CANDIDATE_EXTENSIONS {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// The directory the emitted artifact lives in, absolute.
fn artifact_dir(project: &Project, from_artifact: &Path) -> PathBuf {
    let absolute = if from_artifact.is_absolute() {
        from_artifact.to_path_buf()
    } else {
        project.root.join(from_artifact)
    };
    absolute.parent().map(Path::to_path_buf).unwrap_or(absolute)
}

/// The bare module name of a target: last path segment, extension
/// stripped.
fn module_stem(target: &str) -> String {
    let normalized = target.replace('\\', "/");
    let last = normalized.rsplit('/').next().unwrap_or(&normalized);
    match last.rsplit_once('.') {
        Some((stem, ext)) if CANDIDATE_EXTENSIONS.contains(&ext) => stem.to_string(),
        _ => last.to_string(),
    }
}

/// Lexical relative path from `from_dir` to `to`, with `/` separators,
/// extension stripped, and a guaranteed `./` or `../` prefix.
fn relativize(from_dir: &Path, to: &Path) -> String {
    let from: Vec<String> = normal_components(from_dir);
    let to_parts: Vec<String> = normal_components(to);

    let common = from
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for part in &to_parts[common..] {
        parts.push(part.clone());
    }
    if parts.is_empty() {
        parts.push(".".to_string());
    }

    let mut joined = parts.join("/");
    if !joined.starts_with('.') {
        joined = format!("./{}", joined);
    }
    strip_module_extension(&joined)
}

fn normal_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn strip_module_extension(path: &str) -> String {
    for ext in CANDIDATE_EXTENSIONS {
        if let Some(stem) = path.strip_suffix(&format!(".{}", ext)) {
            return stem.to_string();
        }
    }
    path.to_string()
}

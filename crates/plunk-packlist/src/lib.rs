// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Reproduce "which files would ship" for a publish without invoking an
//! external pack tool: the manifest's `files` field when present,
//! otherwise a full walk honoring a default ignore set plus an
//! `.npmignore`-style file.

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read directory {0:?}")]
    ReadDir(PathBuf, #[source] io::Error),
    #[error("invalid glob pattern {0:?}")]
    Glob(String, #[source] glob::PatternError),
}

/// Directory names skipped unconditionally during the default walk,
/// regardless of manifest or ignore-file content.
const UNCONDITIONAL_SKIP_DIRS: &[&str] = &["node_modules", ".git"];

/// Directories excluded by default when no `files` field narrows the
/// walk: version control, editors, local state, tests, common CI config.
const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git", ".hg", ".svn", ".vscode", ".idea", ".plunk", "test", "tests", "__tests__", "spec",
    ".github", ".circleci",
];

/// Default-excluded file patterns: editor/dev-tool configs, lock files,
/// OS metadata.
const DEFAULT_IGNORE_FILES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    ".editorconfig",
    ".eslintrc*",
    ".prettierrc*",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "bun.lock",
];

/// Top-level docs always shipped if present, regardless of `files` or
/// ignore rules.
const ALWAYS_INCLUDED: &[&str] = &["README", "LICENSE", "CHANGELOG.md"];

const IGNORE_FILE_NAME: &str = ".npmignore";

#[derive(Debug, Default)]
pub struct PackList {
    /// Absolute paths of every file that would ship.
    pub files: Vec<PathBuf>,
    /// Non-fatal issues, e.g. a `files` entry matching nothing.
    pub warnings: Vec<String>,
}

/// Resolve the pack list for `source_root`. `files` mirrors the
/// manifest's `files` field, if declared.
pub fn resolve(source_root: &Path, files: Option<&[String]>) -> Result<PackList, Error> {
    let mut resolved = match files {
        Some(entries) => resolve_with_files_field(source_root, entries)?,
        None => resolve_default_walk(source_root)?,
    };

    resolved.files.push(source_root.join("package.json"));

    for name in ALWAYS_INCLUDED {
        for candidate in matching_top_level(source_root, name) {
            resolved.files.push(candidate);
        }
    }

    resolved.files.retain(|p| p.is_file());
    dedupe(&mut resolved.files);

    Ok(resolved)
}

fn matching_top_level(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else { return Vec::new() };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n == prefix || n.starts_with(&format!("{prefix}.")) || n.starts_with(&format!("{prefix}-")))
                .unwrap_or(false)
        })
        .collect()
}

fn resolve_with_files_field(source_root: &Path, entries: &[String]) -> Result<PackList, Error> {
    let all_candidates = walk_all(source_root, &[])?;
    let mut files = Vec::new();
    let mut warnings = Vec::new();

    for entry in entries {
        let literal_path = source_root.join(entry);

        if literal_path.is_file() {
            files.push(literal_path);
            continue;
        }

        if literal_path.is_dir() {
            for candidate in &all_candidates {
                if candidate.starts_with(&literal_path) {
                    files.push(candidate.clone());
                }
            }
            continue;
        }

        let pattern = glob::Pattern::new(entry).map_err(|e| Error::Glob(entry.clone(), e))?;
        let mut matched_any = false;
        for candidate in &all_candidates {
            if let Ok(rel) = candidate.strip_prefix(source_root) {
                if pattern.matches_path(rel) {
                    files.push(candidate.clone());
                    matched_any = true;
                }
            }
        }

        if !matched_any {
            warnings.push(format!("pack-list entry {entry:?} matched nothing"));
        }
    }

    Ok(PackList { files, warnings })
}

fn resolve_default_walk(source_root: &Path) -> Result<PackList, Error> {
    let ignore_rules = load_ignore_rules(source_root)?;
    let candidates = walk_all(source_root, &[])?;

    let mut files = Vec::new();
    for candidate in candidates {
        let Ok(rel) = candidate.strip_prefix(source_root) else { continue };
        if is_default_ignored(rel) {
            continue;
        }
        if ignore_rules.is_excluded(rel) {
            continue;
        }
        files.push(candidate);
    }

    Ok(PackList { files, warnings: Vec::new() })
}

fn is_default_ignored(rel: &Path) -> bool {
    let components: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();

    if components.iter().any(|c| DEFAULT_IGNORE_DIRS.contains(&c.as_str())) {
        return true;
    }

    let Some(file_name) = rel.file_name().and_then(|n| n.to_str()) else { return false };
    DEFAULT_IGNORE_FILES.iter().any(|pat| glob::Pattern::new(pat).map(|p| p.matches(file_name)).unwrap_or(false))
}

/// A single parsed line from an `.npmignore`-style file, already
/// expanded to a root-relative glob (a bare `foo` becomes `**/foo` so it
/// matches at any depth, matching `.gitignore` semantics).
#[derive(Debug)]
struct IgnoreRule {
    pattern: glob::Pattern,
    negate: bool,
}

#[derive(Debug, Default)]
struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    /// Later rules win, matching `.gitignore` semantics: a path is
    /// excluded if the last matching rule is not a negation.
    fn is_excluded(&self, rel: &Path) -> bool {
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        let mut excluded = false;
        for rule in &self.rules {
            if rule.pattern.matches(&rel_str) {
                excluded = !rule.negate;
            }
        }
        excluded
    }
}

fn load_ignore_rules(source_root: &Path) -> Result<IgnoreRules, Error> {
    let path = source_root.join(IGNORE_FILE_NAME);
    let Ok(contents) = fs_err::read_to_string(&path) else {
        return Ok(IgnoreRules::default());
    };

    let mut rules = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue; // comment or blank
        }

        let negate = line.starts_with('!');
        let body = if negate { &line[1..] } else { line };
        // A pattern containing a slash (other than a trailing one) is
        // anchored to the ignore file's directory; a bare name matches
        // at any depth.
        let anchored = body.trim_end_matches('/').contains('/');
        let pattern_str = body.trim_start_matches('/').trim_end_matches('/').to_string();

        if pattern_str.is_empty() {
            continue;
        }

        let glob_pattern = if anchored { pattern_str.clone() } else { format!("**/{pattern_str}") };

        let pattern = glob::Pattern::new(&glob_pattern).map_err(|e| Error::Glob(pattern_str.clone(), e))?;
        rules.push(IgnoreRule { pattern, negate });
    }

    Ok(IgnoreRules { rules })
}

fn walk_all(root: &Path, extra_skip: &[&str]) -> Result<Vec<PathBuf>, Error> {
    let mut out = Vec::new();
    if root.exists() {
        walk_all_into(root, root, extra_skip, &mut out)?;
    }
    Ok(out)
}

fn walk_all_into(root: &Path, dir: &Path, extra_skip: &[&str], out: &mut Vec<PathBuf>) -> Result<(), Error> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::ReadDir(dir.to_path_buf(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::ReadDir(dir.to_path_buf(), e))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if UNCONDITIONAL_SKIP_DIRS.contains(&name.as_ref()) || extra_skip.contains(&name.as_ref()) {
            continue;
        }

        let file_type = entry.file_type().map_err(|e| Error::ReadDir(path.clone(), e))?;
        if file_type.is_dir() {
            walk_all_into(root, &path, extra_skip, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn dedupe(paths: &mut Vec<PathBuf>) {
    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
}

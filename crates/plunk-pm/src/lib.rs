// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Identify a consumer's package manager by walking upward for a
//! lockfile, and classify yarn's alternate dependency-layout mode.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("consumer uses yarn in plug-and-play mode, which this tool cannot inject into")]
    PlugAndPlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Bun => "bun",
        }
    }

    /// The dependency directory name every supported manager shares.
    pub fn deps_dir(&self) -> &'static str {
        "node_modules"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YarnLinker {
    Classic,
    PnpmStyle,
    PlugAndPlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub package_manager: PackageManager,
    pub yarn_linker: Option<YarnLinker>,
}

impl Detection {
    /// Plug-and-play consumers can't be injected into: there is no
    /// `node_modules` tree to write files into.
    pub fn ensure_compatible(&self) -> Result<(), Error> {
        if self.yarn_linker == Some(YarnLinker::PlugAndPlay) {
            return Err(Error::PlugAndPlay);
        }
        Ok(())
    }

    /// Whether the pnpm-style virtual store (`.pnpm/<name>@<version>/
    /// node_modules/<name>`) should be consulted for the dependency
    /// target, i.e. real pnpm or yarn configured in pnpm-style mode.
    pub fn uses_pnpm_virtual_store(&self) -> bool {
        self.package_manager == PackageManager::Pnpm || self.yarn_linker == Some(YarnLinker::PnpmStyle)
    }
}

/// Lockfile priority within one directory: pnpm, then bun, then yarn,
/// then npm. The closest ancestor directory with any match wins.
fn lockfile_manager(dir: &Path) -> Option<PackageManager> {
    if dir.join("pnpm-lock.yaml").is_file() {
        return Some(PackageManager::Pnpm);
    }
    if dir.join("bun.lockb").is_file() || dir.join("bun.lock").is_file() {
        return Some(PackageManager::Bun);
    }
    if dir.join("yarn.lock").is_file() {
        return Some(PackageManager::Yarn);
    }
    if dir.join("package-lock.json").is_file() {
        return Some(PackageManager::Npm);
    }
    None
}

/// Walk upward from `consumer_dir` looking for a lockfile; fall back to
/// npm if none is found anywhere above it.
pub fn detect(consumer_dir: &Path) -> Detection {
    let mut dir = Some(consumer_dir);
    while let Some(current) = dir {
        if let Some(package_manager) = lockfile_manager(current) {
            let yarn_linker = (package_manager == PackageManager::Yarn).then(|| detect_yarn_linker(consumer_dir));
            return Detection { package_manager, yarn_linker };
        }
        dir = current.parent();
    }
    Detection { package_manager: PackageManager::Npm, yarn_linker: None }
}

#[derive(Debug, Deserialize, Default)]
struct YarnRc {
    #[serde(rename = "nodeLinker")]
    node_linker: Option<String>,
    #[serde(rename = "pnpMode")]
    pnp_mode: Option<String>,
}

/// Read the nearest ancestor's `.yarnrc.yml` to classify the consumer's
/// dependency layout. Defaults to classic `node_modules` when no config
/// (or no recognized field) is found.
fn detect_yarn_linker(consumer_dir: &Path) -> YarnLinker {
    let mut dir = Some(consumer_dir);
    while let Some(current) = dir {
        let path = current.join(".yarnrc.yml");
        if let Ok(contents) = fs_err::read_to_string(&path) {
            if let Ok(config) = serde_yaml::from_str::<YarnRc>(&contents) {
                return classify_linker(&config);
            }
        }
        dir = current.parent();
    }
    YarnLinker::Classic
}

fn classify_linker(config: &YarnRc) -> YarnLinker {
    match config.node_linker.as_deref() {
        Some("pnpm") => YarnLinker::PnpmStyle,
        Some("node-modules") => YarnLinker::Classic,
        _ if config.pnp_mode.is_some() => YarnLinker::PlugAndPlay,
        None => YarnLinker::Classic,
        Some(_) => YarnLinker::PlugAndPlay,
    }
}

/// Candidate directory names under the pnpm virtual store sharing a
/// prefix with `encoded_name@`.
pub fn virtual_store_prefix(encoded_name: &str) -> String {
    format!("{encoded_name}@")
}

#[derive(Debug)]
pub struct VirtualStoreMatch {
    pub path: PathBuf,
    pub exact_version: bool,
}

/// Scan `<deps>/.pnpm/` for an entry `encoded_name@<version>`. An exact
/// version match is preferred; otherwise the first prefix match is
/// returned (caller should warn).
pub fn find_virtual_store_entry(pnpm_dir: &Path, encoded_name: &str, version: &str) -> Option<VirtualStoreMatch> {
    let prefix = virtual_store_prefix(encoded_name);
    let exact_name = format!("{encoded_name}@{version}");

    let entries = std::fs::read_dir(pnpm_dir).ok()?;
    let mut first_prefix_match = None;

    for entry in entries.flatten() {
        let Ok(file_name) = entry.file_name().into_string() else { continue };
        if file_name == exact_name {
            return Some(VirtualStoreMatch { path: entry.path(), exact_version: true });
        }
        if first_prefix_match.is_none() && file_name.starts_with(&prefix) {
            first_prefix_match = Some(entry.path());
        }
    }

    first_prefix_match.map(|path| VirtualStoreMatch { path, exact_version: false })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pnpm_over_npm_in_same_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "").unwrap();
        assert_eq!(detect(dir.path()).package_manager, PackageManager::Pnpm);
    }

    #[test]
    fn closest_ancestor_wins() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("yarn.lock"), "").unwrap();
        let nested = root.path().join("packages/app");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("package-lock.json"), "").unwrap();

        assert_eq!(detect(&nested).package_manager, PackageManager::Npm);
    }

    #[test]
    fn falls_back_to_npm_with_no_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect(dir.path()).package_manager, PackageManager::Npm);
    }

    #[test]
    fn yarn_pnp_mode_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        std::fs::write(dir.path().join(".yarnrc.yml"), "nodeLinker: pnp\n").unwrap();

        let detection = detect(dir.path());
        assert_eq!(detection.yarn_linker, Some(YarnLinker::PlugAndPlay));
        assert!(detection.ensure_compatible().is_err());
    }

    #[test]
    fn yarn_pnpm_style_uses_virtual_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        std::fs::write(dir.path().join(".yarnrc.yml"), "nodeLinker: pnpm\n").unwrap();

        let detection = detect(dir.path());
        assert_eq!(detection.yarn_linker, Some(YarnLinker::PnpmStyle));
        assert!(detection.uses_pnpm_virtual_store());
    }

    #[test]
    fn virtual_store_prefers_exact_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("test-lib@1.0.0")).unwrap();
        std::fs::create_dir_all(dir.path().join("test-lib@2.0.0")).unwrap();

        let found = find_virtual_store_entry(dir.path(), "test-lib", "1.0.0").unwrap();
        assert!(found.exact_version);
        assert_eq!(found.path, dir.path().join("test-lib@1.0.0"));
    }
}

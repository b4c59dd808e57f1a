// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Canonical on-disk layout for the Plunk store, registry and consumer state,
//! plus the reversible encoding used for scoped package names in directory
//! names.

use std::{
    env,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not determine a home directory; set PLUNK_HOME")]
    NoHomeDir,
    #[error("create directory {0:?}")]
    CreateDir(PathBuf, #[source] std::io::Error),
}

/// `encode(name) = name.replace('/', '+')`, used for on-disk entry and
/// backup directory names. Package names never contain `+`, so this is
/// reversible.
pub fn encode_name(name: &str) -> String {
    name.replace('/', "+")
}

/// Inverse of [`encode_name`]. Only scoped names (`@scope+name`) carry a
/// `+`; an unscoped name passes through unchanged.
pub fn decode_name(encoded: &str) -> String {
    if let Some(rest) = encoded.strip_prefix('@') {
        if let Some(idx) = rest.find('+') {
            let (scope, name) = rest.split_at(idx);
            return format!("@{scope}/{}", &name[1..]);
        }
    }
    encoded.to_string()
}

/// The entry directory name `<encoded-name>@<version>`.
pub fn encoded_entry_dir(name: &str, version: &str) -> String {
    format!("{}@{version}", encode_name(name))
}

/// Split an on-disk entry directory name back into `(name, version)`.
/// Returns `None` if the name has no `@version` suffix, mirroring the
/// store's tolerant enumeration policy (skip unparseable directories).
pub fn parse_entry_dir(dir_name: &str) -> Option<(String, String)> {
    // Scoped names encode the scope separator as `+`, never `@`, so the
    // last `@` is always the version separator.
    let at = dir_name.rfind('@')?;
    if at == 0 {
        return None;
    }
    let (encoded, version) = dir_name.split_at(at);
    let version = &version[1..];
    if encoded.is_empty() || version.is_empty() {
        return None;
    }
    Some((decode_name(encoded), version.to_string()))
}

/// The per-user Plunk root and every path derived from it.
#[derive(Debug, Clone)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    /// Resolve the per-user root: `PLUNK_HOME` if set, otherwise
    /// `<home>/.plunk`.
    pub fn resolve() -> Result<Self, Error> {
        if let Some(dir) = env::var_os("PLUNK_HOME") {
            return Ok(Self { root: PathBuf::from(dir) });
        }
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        Ok(Self { root: home.join(".plunk") })
    }

    /// Construct directly from a root, bypassing environment resolution.
    /// Used by tests and by `doctor`/`migrate` when pointed at a foreign
    /// root.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_root(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("consumers.json")
    }

    pub fn entry_root(&self, name: &str, version: &str) -> PathBuf {
        self.store_root().join(encoded_entry_dir(name, version))
    }

    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.entry_root(name, version).join("package")
    }

    pub fn meta_path(&self, name: &str, version: &str) -> PathBuf {
        self.entry_root(name, version).join(".plunk-meta.json")
    }

    /// Temp sibling of an entry root used during publish, e.g.
    /// `<entry>.tmp-<timestamp>`.
    pub fn entry_tmp_root(&self, name: &str, version: &str, timestamp: impl std::fmt::Display) -> PathBuf {
        let mut os = self.entry_root(name, version).into_os_string();
        os.push(format!(".tmp-{timestamp}"));
        PathBuf::from(os)
    }

    pub fn ensure_dirs_exist(&self) -> Result<(), Error> {
        for dir in [self.root.clone(), self.store_root()] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::CreateDir(dir, e))?;
        }
        Ok(())
    }
}

/// Paths scoped to one consumer project directory.
#[derive(Debug, Clone)]
pub struct Consumer {
    dir: PathBuf,
}

impl Consumer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plunk_dir(&self) -> PathBuf {
        self.dir.join(".plunk")
    }

    pub fn state_path(&self) -> PathBuf {
        self.plunk_dir().join("state.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.plunk_dir().join("backups")
    }

    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.backups_dir().join(encode_name(name))
    }

    /// Direct dependency target: `<consumer>/<deps>/<name>/`, expanding a
    /// scoped name to `<deps>/@scope/name/`.
    pub fn dependency_target(&self, deps_dir: &str, name: &str) -> PathBuf {
        self.dir.join(deps_dir).join(name)
    }

    pub fn dependency_dir(&self, deps_dir: &str) -> PathBuf {
        self.dir.join(deps_dir)
    }

    pub fn pnpm_virtual_store(&self, deps_dir: &str) -> PathBuf {
        self.dependency_dir(deps_dir).join(".pnpm")
    }

    pub fn bin_dir(&self, deps_dir: &str) -> PathBuf {
        self.dependency_dir(deps_dir).join(".bin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_plain() {
        assert_eq!(decode_name(&encode_name("my-lib")), "my-lib");
    }

    #[test]
    fn encode_decode_round_trip_scoped() {
        assert_eq!(decode_name(&encode_name("@scope/name")), "@scope/name");
    }

    #[test]
    fn encode_replaces_slash() {
        assert_eq!(encode_name("@scope/name"), "@scope+name");
    }

    #[test]
    fn parse_entry_dir_scoped() {
        let (name, version) = parse_entry_dir("@example+api-client@1.0.0").unwrap();
        assert_eq!(name, "@example/api-client");
        assert_eq!(version, "1.0.0");
    }

    #[test]
    fn parse_entry_dir_plain() {
        let (name, version) = parse_entry_dir("my-lib@2.3.4").unwrap();
        assert_eq!(name, "my-lib");
        assert_eq!(version, "2.3.4");
    }

    #[test]
    fn parse_entry_dir_rejects_unparseable() {
        assert!(parse_entry_dir("no-version-here").is_none());
        assert!(parse_entry_dir("@scope+name").is_none());
    }

    #[test]
    fn home_paths_derive_from_root() {
        let home = Home::at("/tmp/plunk-test-home");
        assert_eq!(home.store_root(), Path::new("/tmp/plunk-test-home/store"));
        assert_eq!(
            home.entry_root("my-lib", "1.0.0"),
            Path::new("/tmp/plunk-test-home/store/my-lib@1.0.0")
        );
        assert_eq!(
            home.package_dir("@a/b", "1.0.0"),
            Path::new("/tmp/plunk-test-home/store/@a+b@1.0.0/package")
        );
    }

    #[test]
    fn consumer_paths() {
        let consumer = Consumer::new("/proj");
        assert_eq!(consumer.state_path(), Path::new("/proj/.plunk/state.json"));
        assert_eq!(
            consumer.dependency_target("node_modules", "@scope/name"),
            Path::new("/proj/node_modules/@scope/name")
        );
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! A typed facade over `package.json`. Unlike a fully-typed struct, the
//! underlying JSON object is kept around verbatim — we only need strong
//! types for the handful of fields Plunk actually reads or rewrites
//! (name, version, files, bin, publishConfig, dependency maps); every
//! other property round-trips untouched through a publish.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};
use thiserror::Error;

pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Dependency map keys `workspace:` rewriting applies to.
const DEPENDENCY_FIELDS: &[&str] = &["dependencies", "devDependencies", "peerDependencies", "optionalDependencies"];

/// `publishConfig` fields merged into the written manifest.
const PUBLISH_CONFIG_OVERRIDE_FIELDS: &[&str] = &["main", "types", "typings", "module", "exports", "bin"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("read {0:?}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("{0:?} is not a JSON object")]
    NotAnObject(PathBuf),
    #[error("parse {0:?}")]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("serialize manifest")]
    Serialize(#[source] serde_json::Error),
    #[error("source directory has no package.json")]
    Missing,
    #[error("package.json is missing required field {0:?}")]
    FieldMissing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Manifest {
    raw: Map<String, Value>,
}

impl Manifest {
    /// Read and parse `<source_dir>/package.json`. Fails loudly: unlike
    /// consumer state or the registry, a manifest parse failure is never
    /// silently recovered.
    pub fn read(source_dir: &Path) -> Result<Self, Error> {
        let path = source_dir.join(MANIFEST_FILE_NAME);
        if !path.exists() {
            return Err(Error::Missing);
        }
        let contents = fs_err::read_to_string(&path).map_err(|e| Error::Read(path.clone(), e))?;
        let value: Value = serde_json::from_str(&contents).map_err(|e| Error::Parse(path.clone(), e))?;
        let Value::Object(raw) = value else { return Err(Error::NotAnObject(path)) };

        let manifest = Self { raw };
        manifest.require_str("name")?;
        manifest.require_str("version")?;
        Ok(manifest)
    }

    pub fn from_value(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    fn require_str(&self, field: &'static str) -> Result<&str, Error> {
        self.raw.get(field).and_then(Value::as_str).ok_or(Error::FieldMissing(field))
    }

    pub fn name(&self) -> &str {
        self.require_str("name").expect("validated in Manifest::read")
    }

    pub fn version(&self) -> &str {
        self.require_str("version").expect("validated in Manifest::read")
    }

    pub fn private(&self) -> bool {
        self.raw.get("private").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn files(&self) -> Option<Vec<String>> {
        let array = self.raw.get("files")?.as_array()?;
        Some(array.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
    }

    /// Dependency names that matter for the injector's missing-dependency
    /// check: runtime `dependencies` plus non-optional `peerDependencies`.
    pub fn runtime_dependency_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dependency_map("dependencies").into_keys().collect();

        let optional_peers = self
            .raw
            .get("peerDependenciesMeta")
            .and_then(Value::as_object)
            .map(|m| m.iter().filter(|(_, v)| v.get("optional").and_then(Value::as_bool).unwrap_or(false)).map(|(k, _)| k.clone()).collect::<std::collections::HashSet<_>>())
            .unwrap_or_default();

        names.extend(self.dependency_map("peerDependencies").into_keys().filter(|name| !optional_peers.contains(name)));
        names
    }

    fn dependency_map(&self, field: &str) -> BTreeMap<String, String> {
        self.raw
            .get(field)
            .and_then(Value::as_object)
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string()))).collect())
            .unwrap_or_default()
    }

    /// Replace every `workspace:` dependency specifier with the
    /// package's own version, across all four dependency sections.
    /// Never touches the source manifest: callers operate on an
    /// in-memory clone made for the write-side copy.
    pub fn rewrite_workspace_protocol(&mut self) {
        let version = self.version().to_string();
        for field in DEPENDENCY_FIELDS {
            let Some(deps) = self.raw.get_mut(*field).and_then(Value::as_object_mut) else { continue };
            for value in deps.values_mut() {
                let Some(spec) = value.as_str() else { continue };
                if let Some(rewritten) = rewrite_workspace_specifier(spec, &version) {
                    *value = Value::String(rewritten);
                }
            }
        }
    }

    /// Merge recognized `publishConfig` fields into the manifest, then
    /// remove the `publishConfig` key. Returns the `directory` override
    /// if one was set.
    pub fn apply_publish_config(&mut self) -> Option<String> {
        let Some(Value::Object(publish_config)) = self.raw.remove("publishConfig") else { return None };

        for field in PUBLISH_CONFIG_OVERRIDE_FIELDS {
            if let Some(value) = publish_config.get(*field) {
                self.raw.insert((*field).to_string(), value.clone());
            }
        }

        publish_config.get("directory").and_then(Value::as_str).map(str::to_string)
    }

    pub fn bin(&self) -> Executables {
        Executables::from_manifest(self.raw.get("bin"), self.name())
    }

    /// A `scripts.<name>` entry, e.g. `preplunk`/`postplunk`.
    pub fn script(&self, name: &str) -> Option<String> {
        self.raw.get("scripts")?.as_object()?.get(name)?.as_str().map(str::to_string)
    }

    /// Add empty `preplunk`/`postplunk` stubs if neither is already
    /// present. Returns whether the manifest changed.
    pub fn ensure_plunk_scripts(&mut self) -> bool {
        if self.script("preplunk").is_some() || self.script("postplunk").is_some() {
            return false;
        }
        let scripts = self.raw.entry("scripts").or_insert_with(|| Value::Object(Map::new()));
        let Some(scripts) = scripts.as_object_mut() else { return false };
        scripts.insert("preplunk".to_string(), Value::String(String::new()));
        scripts.insert("postplunk".to_string(), Value::String(String::new()));
        true
    }

    pub fn to_pretty_json(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec_pretty(&Value::Object(self.raw.clone())).map_err(Error::Serialize)
    }
}

/// `workspace:*` / `workspace:^` / `workspace:~` / `workspace:<version>`
/// rewritten to the package's own version, optionally prefixed by the
/// range operator. Returns `None` if `spec` isn't a workspace specifier.
fn rewrite_workspace_specifier(spec: &str, own_version: &str) -> Option<String> {
    let rest = spec.strip_prefix("workspace:")?;
    Some(match rest {
        "*" => own_version.to_string(),
        "^" => format!("^{own_version}"),
        "~" => format!("~{own_version}"),
        explicit => explicit.to_string(),
    })
}

/// The package's executables map: `{name -> relative_path}`. A string
/// `bin` field yields a single entry under the unscoped package name.
#[derive(Debug, Default, Clone)]
pub struct Executables {
    pub entries: BTreeMap<String, String>,
}

impl Executables {
    fn from_manifest(bin: Option<&Value>, package_name: &str) -> Self {
        let entries = match bin {
            Some(Value::String(path)) => {
                let unscoped = package_name.rsplit('/').next().unwrap_or(package_name);
                BTreeMap::from([(unscoped.to_string(), path.clone())])
            }
            Some(Value::Object(map)) => map.iter().filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string()))).collect(),
            _ => BTreeMap::new(),
        };
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_from_json(json: &str) -> Manifest {
        let Value::Object(raw) = serde_json::from_str(json).unwrap() else { panic!("not an object") };
        Manifest::from_value(raw)
    }

    #[test]
    fn workspace_rewrite_covers_all_operators() {
        let mut manifest = manifest_from_json(
            r#"{
                "name": "pkg", "version": "3.2.1",
                "dependencies": { "a": "workspace:*", "b": "workspace:^", "c": "workspace:~", "d": "workspace:1.5.0", "e": "^2.0.0" }
            }"#,
        );
        manifest.rewrite_workspace_protocol();
        let deps = manifest.dependency_map("dependencies");
        assert_eq!(deps["a"], "3.2.1");
        assert_eq!(deps["b"], "^3.2.1");
        assert_eq!(deps["c"], "~3.2.1");
        assert_eq!(deps["d"], "1.5.0");
        assert_eq!(deps["e"], "^2.0.0");
    }

    #[test]
    fn publish_config_merges_and_removes() {
        let mut manifest = manifest_from_json(
            r#"{
                "name": "pkg", "version": "1.0.0", "main": "index.js",
                "publishConfig": { "main": "dist/index.js", "directory": "dist" }
            }"#,
        );
        let directory = manifest.apply_publish_config();
        assert_eq!(directory.as_deref(), Some("dist"));
        assert_eq!(manifest.raw.get("main").unwrap().as_str().unwrap(), "dist/index.js");
        assert!(!manifest.raw.contains_key("publishConfig"));
    }

    #[test]
    fn ensure_plunk_scripts_adds_stubs_once() {
        let mut manifest = manifest_from_json(r#"{"name": "pkg", "version": "1.0.0"}"#);
        assert!(manifest.ensure_plunk_scripts());
        assert_eq!(manifest.script("preplunk").as_deref(), Some(""));
        assert_eq!(manifest.script("postplunk").as_deref(), Some(""));
        assert!(!manifest.ensure_plunk_scripts());
    }

    #[test]
    fn ensure_plunk_scripts_leaves_existing_hook_alone() {
        let mut manifest = manifest_from_json(r#"{"name": "pkg", "version": "1.0.0", "scripts": {"preplunk": "tsc -b"}}"#);
        assert!(!manifest.ensure_plunk_scripts());
        assert_eq!(manifest.script("preplunk").as_deref(), Some("tsc -b"));
        assert_eq!(manifest.script("postplunk"), None);
    }

    #[test]
    fn bin_as_string_uses_unscoped_name() {
        let manifest = manifest_from_json(r#"{"name": "@scope/cli", "version": "1.0.0", "bin": "bin/cli.js"}"#);
        let bin = manifest.bin();
        assert_eq!(bin.entries.get("cli").unwrap(), "bin/cli.js");
    }

    #[test]
    fn bin_as_object_keeps_all_entries() {
        let manifest = manifest_from_json(r#"{"name": "pkg", "version": "1.0.0", "bin": {"a": "a.js", "b": "b.js"}}"#);
        let bin = manifest.bin();
        assert_eq!(bin.entries.len(), 2);
    }

    #[test]
    fn runtime_dependency_names_excludes_optional_peers() {
        let manifest = manifest_from_json(
            r#"{
                "name": "pkg", "version": "1.0.0",
                "dependencies": {"a": "1.0.0"},
                "peerDependencies": {"react": "^18", "react-native": "^0.70"},
                "peerDependenciesMeta": {"react-native": {"optional": true}}
            }"#,
        );
        let names = manifest.runtime_dependency_names();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"react".to_string()));
        assert!(!names.contains(&"react-native".to_string()));
    }

    #[test]
    fn missing_manifest_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Manifest::read(dir.path()), Err(Error::Missing)));
    }

    #[test]
    fn manifest_missing_required_field_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), r#"{"name": "pkg"}"#).unwrap();
        assert!(matches!(Manifest::read(dir.path()), Err(Error::FieldMissing("version"))));
    }
}

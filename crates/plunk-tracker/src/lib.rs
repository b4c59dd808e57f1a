// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Two JSON registries tying store entries to consumers: a per-consumer
//! state file and a process-wide global registry. Both are written
//! atomically; both tolerate corruption on read by substituting an
//! empty value — destroying links on a bad parse is worse than losing
//! them silently.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATE_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum Error {
    #[error("serialize consumer state")]
    SerializeState(#[source] serde_json::Error),
    #[error("serialize registry")]
    SerializeRegistry(#[source] serde_json::Error),
    #[error(transparent)]
    Fs(#[from] plunk_fs::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEntry {
    pub version: String,
    pub content_hash: String,
    pub linked_at: DateTime<Utc>,
    pub source_path: String,
    pub backup_exists: bool,
    pub package_manager: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerState {
    pub version: String,
    pub package_manager: String,
    pub role: String,
    #[serde(default)]
    pub links: BTreeMap<String, LinkEntry>,
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self { version: STATE_VERSION.to_string(), package_manager: "npm".to_string(), role: "consumer".to_string(), links: BTreeMap::new() }
    }
}

pub struct Tracker {
    home: plunk_paths::Home,
    fs: std::sync::Arc<plunk_fs::Fs>,
}

impl Tracker {
    pub fn new(home: plunk_paths::Home, fs: std::sync::Arc<plunk_fs::Fs>) -> Self {
        Self { home, fs }
    }

    /// Never fails: a missing or unparseable state file reads as a fresh
    /// default state.
    pub async fn read_consumer_state(&self, consumer_dir: &Path) -> ConsumerState {
        let path = plunk_paths::Consumer::new(consumer_dir).state_path();
        let Ok(contents) = fs_err::tokio::read(&path).await else { return ConsumerState::default() };
        serde_json::from_slice(&contents).unwrap_or_default()
    }

    async fn write_consumer_state(&self, consumer_dir: &Path, state: &ConsumerState) -> Result<(), Error> {
        let path = plunk_paths::Consumer::new(consumer_dir).state_path();
        let bytes = serde_json::to_vec_pretty(state).map_err(Error::SerializeState)?;
        self.fs.atomic_write(&path, &bytes).await?;
        Ok(())
    }

    /// Overwrite any prior entry for `name`.
    pub async fn add_link(&self, consumer_dir: &Path, name: &str, entry: LinkEntry) -> Result<(), Error> {
        let mut state = self.read_consumer_state(consumer_dir).await;
        state.links.insert(name.to_string(), entry);
        self.write_consumer_state(consumer_dir, &state).await
    }

    /// Delete the link entry for `name`. The file is still written (and
    /// kept) even if `links` becomes empty.
    pub async fn remove_link(&self, consumer_dir: &Path, name: &str) -> Result<(), Error> {
        let mut state = self.read_consumer_state(consumer_dir).await;
        state.links.remove(name);
        self.write_consumer_state(consumer_dir, &state).await
    }

    pub async fn get_link(&self, consumer_dir: &Path, name: &str) -> Option<LinkEntry> {
        self.read_consumer_state(consumer_dir).await.links.get(name).cloned()
    }

    /// Record the consumer's detected package manager and role, used by
    /// `init`/`add` on a project with no prior state.
    pub async fn ensure_state(&self, consumer_dir: &Path, package_manager: &str, role: &str) -> Result<ConsumerState, Error> {
        let mut state = self.read_consumer_state(consumer_dir).await;
        state.package_manager = package_manager.to_string();
        state.role = role.to_string();
        self.write_consumer_state(consumer_dir, &state).await?;
        Ok(state)
    }

    async fn read_registry(&self) -> Registry {
        let Ok(contents) = fs_err::tokio::read(self.home.registry_path()).await else { return Registry::default() };
        serde_json::from_slice(&contents).unwrap_or_default()
    }

    async fn write_registry(&self, registry: &Registry) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(registry).map_err(Error::SerializeRegistry)?;
        self.fs.atomic_write(&self.home.registry_path(), &bytes).await?;
        Ok(())
    }

    /// Idempotent: registering the same `(pkg, path)` pair repeatedly
    /// leaves a single entry.
    pub async fn register_consumer(&self, pkg: &str, path: &Path) -> Result<(), Error> {
        let mut registry = self.read_registry().await;
        let consumers = registry.entries.entry(pkg.to_string()).or_default();
        if !consumers.iter().any(|p| p == path) {
            consumers.push(path.to_path_buf());
        }
        self.write_registry(&registry).await
    }

    /// Removes `path` from `pkg`'s consumer list; deletes the package
    /// key entirely once its list is empty.
    pub async fn unregister_consumer(&self, pkg: &str, path: &Path) -> Result<(), Error> {
        let mut registry = self.read_registry().await;
        if let Some(consumers) = registry.entries.get_mut(pkg) {
            consumers.retain(|p| p != path);
            if consumers.is_empty() {
                registry.entries.remove(pkg);
            }
        }
        self.write_registry(&registry).await
    }

    pub async fn get_consumers(&self, pkg: &str) -> Vec<PathBuf> {
        self.read_registry().await.entries.get(pkg).cloned().unwrap_or_default()
    }

    /// For each registered package, keep only consumer paths that still
    /// exist AND whose consumer state has a matching link; drop the
    /// package key if its list empties. Returns `(removed_consumers,
    /// removed_packages)`.
    pub async fn clean_stale_consumers(&self) -> Result<(usize, usize), Error> {
        let mut registry = self.read_registry().await;
        let mut removed_consumers = 0usize;
        let mut removed_packages = 0usize;

        let mut empty_keys = Vec::new();
        for (pkg, paths) in registry.entries.iter_mut() {
            let before = paths.len();
            let mut kept = Vec::new();
            for path in std::mem::take(paths) {
                let is_live = path.exists() && self.read_consumer_state(&path).await.links.contains_key(pkg);
                if is_live {
                    kept.push(path);
                }
            }
            removed_consumers += before - kept.len();
            *paths = kept;
            if paths.is_empty() {
                empty_keys.push(pkg.clone());
            }
        }

        for key in &empty_keys {
            registry.entries.remove(key);
        }
        removed_packages += empty_keys.len();

        self.write_registry(&registry).await?;
        Ok((removed_consumers, removed_packages))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(flatten)]
    pub entries: BTreeMap<String, Vec<PathBuf>>,
}

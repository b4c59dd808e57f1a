// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Orchestrates the store, tracker, injector, publisher and push engine
//! into the operations the CLI exposes. One `Plunk` instance is built
//! per invocation and threaded through every subcommand handler.

pub mod clean;
pub mod doctor;
pub mod migrate;

use std::{collections::BTreeMap, path::Path, sync::Arc};

use chrono::Utc;
use thiserror::Error;

pub use clean::CleanReport;
pub use doctor::DoctorReport;
pub use migrate::MigrateReport;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Paths(#[from] plunk_paths::Error),
    #[error(transparent)]
    Manifest(#[from] plunk_manifest::Error),
    #[error(transparent)]
    Fs(#[from] plunk_fs::Error),
    #[error(transparent)]
    Store(#[from] plunk_store::Error),
    #[error(transparent)]
    Tracker(#[from] plunk_tracker::Error),
    #[error(transparent)]
    Injector(#[from] plunk_injector::Error),
    #[error(transparent)]
    PackageManager(#[from] plunk_pm::Error),
    #[error(transparent)]
    Publish(#[from] plunk_publish::Error),
    #[error(transparent)]
    Push(#[from] plunk_push::Error),
    #[error("{0} is not present in the store")]
    NotFoundInStore(String),
    #[error("no package name given and --all was not passed")]
    MissingPackageArgument,
    #[error("{0} is not linked in this consumer")]
    PackageNotLinked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    Library,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Library => "library",
        }
    }
}

pub struct Plunk {
    pub(crate) home: plunk_paths::Home,
    pub(crate) fs: Arc<plunk_fs::Fs>,
    pub(crate) store: plunk_store::Store,
    pub(crate) tracker: plunk_tracker::Tracker,
    pub(crate) injector: plunk_injector::Injector,
    pub(crate) publisher: plunk_publish::Publisher,
    pub(crate) push: plunk_push::PushEngine,
}

impl Plunk {
    pub fn new(home: plunk_paths::Home, dry_run: bool) -> Self {
        let fs = Arc::new(plunk_fs::Fs::new(dry_run));
        let store = plunk_store::Store::new(home.clone(), fs.clone());
        let tracker = plunk_tracker::Tracker::new(home.clone(), fs.clone());
        let injector = plunk_injector::Injector::new(fs.clone());
        let publisher = plunk_publish::Publisher::new(home.clone(), fs.clone());
        let push = plunk_push::PushEngine::new(home.clone(), fs.clone());
        Self { home, fs, store, tracker, injector, publisher, push }
    }

    pub fn home(&self) -> &plunk_paths::Home {
        &self.home
    }

    pub fn fs(&self) -> &Arc<plunk_fs::Fs> {
        &self.fs
    }

    pub fn store(&self) -> &plunk_store::Store {
        &self.store
    }

    pub fn tracker(&self) -> &plunk_tracker::Tracker {
        &self.tracker
    }

    pub fn publisher(&self) -> &plunk_publish::Publisher {
        &self.publisher
    }

    pub fn push_engine(&self) -> &plunk_push::PushEngine {
        &self.push
    }

    /// Configure `consumer_dir`: detect its package manager, record a
    /// fresh consumer state with the given role, add `.plunk/` to
    /// `.gitignore` if one exists or create a minimal one, and scaffold
    /// `preplunk`/`postplunk` script stubs in `package.json`.
    pub async fn init(&self, consumer_dir: &Path, role: Role) -> Result<InitReport, Error> {
        self.home.ensure_dirs_exist()?;

        let detection = plunk_pm::detect(consumer_dir);
        self.tracker.ensure_state(consumer_dir, detection.package_manager.as_str(), role.as_str()).await?;

        let gitignore_updated = ensure_gitignore_entry(consumer_dir).await;
        let scripts_added = ensure_plunk_scripts(consumer_dir).await;

        Ok(InitReport { package_manager: detection.package_manager.as_str().to_string(), role, gitignore_updated, scripts_added })
    }

    /// Publish (if `from_dir` is given), then inject the named package
    /// into `consumer_dir` and record the link. `from_dir` absent means
    /// the package must already be in the store under some version.
    pub async fn add(&self, consumer_dir: &Path, name: &str, from_dir: Option<&Path>) -> Result<AddReport, Error> {
        if let Some(source_dir) = from_dir {
            let options = plunk_publish::PublishOptions { allow_private: true, run_scripts: true, force: false };
            self.publisher.publish(source_dir, options).await?;
        }

        let entry = self.store.find_store_entry(name).await?.ok_or_else(|| Error::NotFoundInStore(name.to_string()))?;

        let detection = plunk_pm::detect(consumer_dir);
        detection.ensure_compatible()?;
        let deps_dir = detection.package_manager.deps_dir();

        let backup_exists = self.injector.backup_existing(consumer_dir, name, deps_dir, &detection).await?;
        let result = self.injector.inject(&entry.package_dir, &entry.name, &entry.version, consumer_dir, deps_dir, &detection).await?;

        self.tracker.register_consumer(name, consumer_dir).await?;
        self.tracker
            .add_link(
                consumer_dir,
                name,
                plunk_tracker::LinkEntry {
                    version: entry.version.clone(),
                    content_hash: entry.meta.content_hash.clone(),
                    linked_at: Utc::now(),
                    source_path: entry.meta.source_path.clone(),
                    backup_exists,
                    package_manager: detection.package_manager.as_str().to_string(),
                    build_id: entry.meta.build_id.clone(),
                },
            )
            .await?;

        Ok(AddReport { name: name.to_string(), version: entry.version, copied: result.copied, bin_links: result.bin_links })
    }

    /// Uninject and untrack one package, or every linked package with
    /// `all`. Restores a pre-existing backup if one was made.
    pub async fn remove(&self, consumer_dir: &Path, name: Option<&str>, all: bool) -> Result<RemoveReport, Error> {
        let state = self.tracker.read_consumer_state(consumer_dir).await;
        let names: Vec<String> = if all {
            state.links.keys().cloned().collect()
        } else {
            let name = name.ok_or(Error::MissingPackageArgument)?;
            if !state.links.contains_key(name) {
                return Err(Error::PackageNotLinked(name.to_string()));
            }
            vec![name.to_string()]
        };

        let detection = plunk_pm::detect(consumer_dir);
        let deps_dir = detection.package_manager.deps_dir();

        let mut removed = Vec::new();
        let mut restored = Vec::new();
        for name in names {
            self.injector.remove_injected(consumer_dir, &name, deps_dir, &detection).await?;
            if self.injector.restore_backup(consumer_dir, &name, deps_dir, &detection).await? {
                restored.push(name.clone());
            }
            self.tracker.remove_link(consumer_dir, &name).await?;
            self.tracker.unregister_consumer(&name, consumer_dir).await?;
            removed.push(name);
        }

        Ok(RemoveReport { removed, restored })
    }

    /// Re-inject every package linked by `consumer_dir` from its
    /// already-recorded `(name, version)`, without touching the store.
    pub async fn restore(&self, consumer_dir: &Path) -> Result<RestoreReport, Error> {
        let state = self.tracker.read_consumer_state(consumer_dir).await;
        let detection = plunk_pm::detect(consumer_dir);
        let deps_dir = detection.package_manager.deps_dir();

        let mut restored = Vec::new();
        let mut missing = Vec::new();
        for (name, link) in &state.links {
            let Some(entry) = self.store.get_store_entry(name, &link.version).await else {
                missing.push(name.clone());
                continue;
            };
            self.injector.inject(&entry.package_dir, &entry.name, &entry.version, consumer_dir, deps_dir, &detection).await?;
            restored.push(name.clone());
        }

        Ok(RestoreReport { restored, missing })
    }

    /// Re-inject every linked package from the newest store version
    /// under its name, updating the link entry to match.
    pub async fn update(&self, consumer_dir: &Path) -> Result<RestoreReport, Error> {
        let state = self.tracker.read_consumer_state(consumer_dir).await;
        let detection = plunk_pm::detect(consumer_dir);
        let deps_dir = detection.package_manager.deps_dir();

        let mut updated = Vec::new();
        let mut missing = Vec::new();
        for name in state.links.keys() {
            let Some(entry) = self.store.find_store_entry(name).await? else {
                missing.push(name.clone());
                continue;
            };
            self.injector.inject(&entry.package_dir, &entry.name, &entry.version, consumer_dir, deps_dir, &detection).await?;
            self.tracker
                .add_link(
                    consumer_dir,
                    name,
                    plunk_tracker::LinkEntry {
                        version: entry.version.clone(),
                        content_hash: entry.meta.content_hash.clone(),
                        linked_at: Utc::now(),
                        source_path: entry.meta.source_path.clone(),
                        backup_exists: self.tracker.get_link(consumer_dir, name).await.map(|l| l.backup_exists).unwrap_or(false),
                        package_manager: detection.package_manager.as_str().to_string(),
                        build_id: entry.meta.build_id.clone(),
                    },
                )
                .await?;
            updated.push(name.clone());
        }

        Ok(RestoreReport { restored: updated, missing })
    }

    pub async fn list(&self, consumer_dir: &Path) -> BTreeMap<String, plunk_tracker::LinkEntry> {
        self.tracker.read_consumer_state(consumer_dir).await.links
    }

    /// Per-link health: whether the store still has the linked version,
    /// and whether its content hash is the newest published for that
    /// name.
    pub async fn status(&self, consumer_dir: &Path) -> Result<Vec<PackageStatus>, Error> {
        let state = self.tracker.read_consumer_state(consumer_dir).await;
        let mut statuses = Vec::new();
        for (name, link) in state.links {
            let store_entry_exists = self.store.get_store_entry(&name, &link.version).await.is_some();
            let latest = self.store.find_store_entry(&name).await?;
            let up_to_date = latest.as_ref().map(|e| e.meta.content_hash == link.content_hash).unwrap_or(false);
            statuses.push(PackageStatus { name, link, store_entry_exists, up_to_date });
        }
        Ok(statuses)
    }
}

/// Append `.plunk/` to `<consumer_dir>/.gitignore`, creating the file
/// if it doesn't exist. Returns whether the file was changed.
async fn ensure_gitignore_entry(consumer_dir: &Path) -> bool {
    let path = consumer_dir.join(".gitignore");
    let existing = fs_err::tokio::read_to_string(&path).await.unwrap_or_default();
    if existing.lines().any(|line| line.trim() == ".plunk/") {
        return false;
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(".plunk/\n");
    fs_err::tokio::write(&path, updated).await.is_ok()
}

/// Add the lifecycle-script stubs to `consumer_dir`'s manifest, if it
/// has one. Never an error: a missing or unparseable manifest just
/// means there's nothing to scaffold.
async fn ensure_plunk_scripts(consumer_dir: &Path) -> bool {
    let Ok(mut manifest) = plunk_manifest::Manifest::read(consumer_dir) else { return false };
    if !manifest.ensure_plunk_scripts() {
        return false;
    }
    let Ok(contents) = manifest.to_pretty_json() else { return false };
    fs_err::tokio::write(consumer_dir.join(plunk_manifest::MANIFEST_FILE_NAME), contents).await.is_ok()
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub package_manager: String,
    pub role: Role,
    pub gitignore_updated: bool,
    pub scripts_added: bool,
}

#[derive(Debug, Clone)]
pub struct AddReport {
    pub name: String,
    pub version: String,
    pub copied: usize,
    pub bin_links: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveReport {
    pub removed: Vec<String>,
    pub restored: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PackageStatus {
    pub name: String,
    pub link: plunk_tracker::LinkEntry,
    pub store_entry_exists: bool,
    pub up_to_date: bool,
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `migrate`: detect a prior local-linking tool's leftovers in a
//! consumer directory (yalc's `.yalc/` store and lockfile, and
//! npm/yarn-link symlinks under the dependency directory) and, if
//! asked, clean them up. Plunk's own state is left untouched either
//! way — this only clears the way for it.

use std::path::{Path, PathBuf};

use crate::{Error, Plunk};

const YALC_DIR: &str = ".yalc";
const YALC_LOCK: &str = "yalc.lock";

#[derive(Debug, Clone, Default)]
pub struct MigrateReport {
    pub yalc_dir_found: bool,
    pub yalc_lock_found: bool,
    pub linked_packages: Vec<String>,
    pub removed: bool,
}

impl Plunk {
    pub async fn migrate(&self, consumer_dir: &Path, remove: bool) -> Result<MigrateReport, Error> {
        let yalc_dir = consumer_dir.join(YALC_DIR);
        let yalc_lock = consumer_dir.join(YALC_LOCK);
        let yalc_dir_found = yalc_dir.is_dir();
        let yalc_lock_found = yalc_lock.is_file();

        let detection = plunk_pm::detect(consumer_dir);
        let deps_dir = consumer_dir.join(detection.package_manager.deps_dir());
        let linked_packages = find_symlinked_dependencies(&deps_dir);

        let mut removed = false;
        if remove {
            if yalc_dir_found {
                self.fs.remove_dir_all(&yalc_dir).await?;
            }
            if yalc_lock_found {
                let _ = fs_err::tokio::remove_file(&yalc_lock).await;
            }
            removed = yalc_dir_found || yalc_lock_found;
        }

        Ok(MigrateReport { yalc_dir_found, yalc_lock_found, linked_packages, removed })
    }
}

/// Top-level and scoped entries under `deps_dir` that are symlinks —
/// the signature `npm link` / `yarn link` leave behind.
fn find_symlinked_dependencies(deps_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(deps_dir) else { return Vec::new() };
    let mut linked = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if is_symlink(&entry.path()) {
            linked.push(name.clone());
            continue;
        }
        if name.starts_with('@') {
            linked.extend(find_symlinked_scope(&entry.path(), &name));
        }
    }

    linked
}

fn find_symlinked_scope(scope_dir: &Path, scope: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(scope_dir) else { return Vec::new() };
    entries
        .flatten()
        .filter(|entry| is_symlink(&entry.path()))
        .map(|entry| format!("{scope}/{}", entry.file_name().to_string_lossy()))
        .collect()
}

fn is_symlink(path: &PathBuf) -> bool {
    std::fs::symlink_metadata(path).map(|meta| meta.file_type().is_symlink()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_detects_yalc_artifacts() {
        let home = tempfile::tempdir().unwrap();
        let plunk = Plunk::new(plunk_paths::Home::at(home.path()), false);

        let consumer = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(consumer.path().join(YALC_DIR)).unwrap();
        std::fs::write(consumer.path().join(YALC_LOCK), "").unwrap();

        let report = plunk.migrate(consumer.path(), false).await.unwrap();
        assert!(report.yalc_dir_found);
        assert!(report.yalc_lock_found);
        assert!(!report.removed);
        assert!(consumer.path().join(YALC_DIR).exists());
    }

    #[tokio::test]
    async fn migrate_with_remove_deletes_yalc_artifacts() {
        let home = tempfile::tempdir().unwrap();
        let plunk = Plunk::new(plunk_paths::Home::at(home.path()), false);

        let consumer = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(consumer.path().join(YALC_DIR)).unwrap();
        std::fs::write(consumer.path().join(YALC_LOCK), "").unwrap();

        let report = plunk.migrate(consumer.path(), true).await.unwrap();
        assert!(report.removed);
        assert!(!consumer.path().join(YALC_DIR).exists());
        assert!(!consumer.path().join(YALC_LOCK).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn migrate_detects_npm_link_symlinks() {
        let home = tempfile::tempdir().unwrap();
        let plunk = Plunk::new(plunk_paths::Home::at(home.path()), false);

        let consumer = tempfile::tempdir().unwrap();
        let linked_target = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(consumer.path().join("node_modules")).unwrap();
        std::os::unix::fs::symlink(linked_target.path(), consumer.path().join("node_modules/linked-lib")).unwrap();

        let report = plunk.migrate(consumer.path(), false).await.unwrap();
        assert_eq!(report.linked_packages, vec!["linked-lib".to_string()]);
    }
}

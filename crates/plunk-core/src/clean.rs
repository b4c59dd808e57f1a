// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `clean` / `gc`: drop store entries no consumer links to anymore,
//! prune stale consumer registrations, and sweep orphaned publish temp
//! directories left behind by an interrupted `publish`.

use std::collections::HashSet;

use crate::{Error, Plunk};

#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub removed_consumers: usize,
    pub removed_packages: usize,
    pub removed_entries: usize,
    pub removed_temp_dirs: usize,
}

impl Plunk {
    pub async fn clean(&self) -> Result<CleanReport, Error> {
        let (removed_consumers, removed_packages) = self.tracker.clean_stale_consumers().await?;

        let mut referenced: HashSet<(String, String)> = HashSet::new();
        for entry in self.store.list_store_entries().await? {
            for consumer_dir in self.tracker.get_consumers(&entry.name).await {
                if let Some(link) = self.tracker.get_link(&consumer_dir, &entry.name).await {
                    referenced.insert((entry.name.clone(), link.version));
                }
            }
        }

        let mut removed_entries = 0usize;
        for entry in self.store.list_store_entries().await? {
            if !referenced.contains(&(entry.name.clone(), entry.version.clone())) {
                self.store.remove_store_entry(&entry.name, &entry.version).await?;
                removed_entries += 1;
            }
        }

        let removed_temp_dirs = self.remove_orphaned_temp_dirs().await?;

        Ok(CleanReport { removed_consumers, removed_packages, removed_entries, removed_temp_dirs })
    }

    /// `<entry>.tmp-<timestamp>` siblings left behind by a publish that
    /// never reached its final `move_dir`.
    async fn remove_orphaned_temp_dirs(&self) -> Result<usize, Error> {
        let root = self.home.store_root();
        if !root.is_dir() {
            return Ok(0);
        }

        let mut removed = 0usize;
        let mut read_dir = fs_err::tokio::read_dir(&root).await.map_err(|e| plunk_store::Error::ReadDir(root.clone(), e))?;
        while let Some(dir_entry) = read_dir.next_entry().await.map_err(|e| plunk_store::Error::ReadDir(root.clone(), e))? {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if name.contains(".tmp-") {
                self.fs.remove_dir_all(&dir_entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &std::path::Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn clean_removes_unreferenced_entries_and_orphaned_temp_dirs() {
        let home = tempfile::tempdir().unwrap();
        let plunk = Plunk::new(plunk_paths::Home::at(home.path()), false);

        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "orphan", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "x");
        plunk.publisher().publish(source.path(), plunk_publish::PublishOptions::default()).await.unwrap();

        std::fs::create_dir_all(plunk.home().store_root().join("stray@1.0.0.tmp-123")).unwrap();

        let report = plunk.clean().await.unwrap();
        assert_eq!(report.removed_entries, 1);
        assert_eq!(report.removed_temp_dirs, 1);
        assert!(plunk.store().get_store_entry("orphan", "1.0.0").await.is_none());
    }

    #[tokio::test]
    async fn clean_keeps_entries_still_linked_by_a_consumer() {
        let home = tempfile::tempdir().unwrap();
        let plunk = Plunk::new(plunk_paths::Home::at(home.path()), false);

        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "kept", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "x");

        let consumer = tempfile::tempdir().unwrap();
        write(consumer.path(), "package-lock.json", "{}");
        plunk.add(consumer.path(), "kept", Some(source.path())).await.unwrap();

        let report = plunk.clean().await.unwrap();
        assert_eq!(report.removed_entries, 0);
        assert!(plunk.store().get_store_entry("kept", "1.0.0").await.is_some());
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Content-addressed store of published artifacts: metadata read/write,
//! enumeration, deletion. No locking — consistency relies on the atomic
//! rename the publisher performs when it writes a new entry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read metadata {0:?}")]
    ReadMeta(PathBuf, #[source] std::io::Error),
    #[error("parse metadata {0:?}")]
    ParseMeta(PathBuf, #[source] serde_json::Error),
    #[error("serialize metadata")]
    SerializeMeta(#[source] serde_json::Error),
    #[error(transparent)]
    Fs(#[from] plunk_fs::Error),
    #[error("list store root {0:?}")]
    ReadDir(PathBuf, #[source] std::io::Error),
}

/// `.plunk-meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source_path: String,
}

/// A store entry: identity plus the metadata and directories backing it.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub name: String,
    pub version: String,
    pub meta: Meta,
    pub entry_root: PathBuf,
    pub package_dir: PathBuf,
}

pub struct Store {
    home: plunk_paths::Home,
    fs: std::sync::Arc<plunk_fs::Fs>,
}

impl Store {
    pub fn new(home: plunk_paths::Home, fs: std::sync::Arc<plunk_fs::Fs>) -> Self {
        Self { home, fs }
    }

    pub fn home(&self) -> &plunk_paths::Home {
        &self.home
    }

    pub async fn read_meta(&self, name: &str, version: &str) -> Result<Meta, Error> {
        let path = self.home.meta_path(name, version);
        let contents = fs_err::tokio::read(&path).await.map_err(|e| Error::ReadMeta(path.clone(), e))?;
        serde_json::from_slice(&contents).map_err(|e| Error::ParseMeta(path, e))
    }

    pub async fn write_meta(&self, name: &str, version: &str, meta: &Meta) -> Result<(), Error> {
        let path = self.home.meta_path(name, version);
        let bytes = serde_json::to_vec_pretty(meta).map_err(Error::SerializeMeta)?;
        self.fs.atomic_write(&path, &bytes).await?;
        Ok(())
    }

    /// Returns the entry only if both metadata and the package directory
    /// are present; `None` otherwise (treated as "not in the store").
    pub async fn get_store_entry(&self, name: &str, version: &str) -> Option<StoreEntry> {
        let package_dir = self.home.package_dir(name, version);
        if !package_dir.is_dir() {
            return None;
        }
        let meta = self.read_meta(name, version).await.ok()?;
        Some(StoreEntry {
            name: name.to_string(),
            version: version.to_string(),
            meta,
            entry_root: self.home.entry_root(name, version),
            package_dir,
        })
    }

    /// The entry for `name` with the most recent `published_at`, across
    /// every version currently in the store.
    pub async fn find_store_entry(&self, name: &str) -> Result<Option<StoreEntry>, Error> {
        let mut matches = Vec::new();
        for entry in self.list_store_entries().await? {
            if entry.name == name {
                matches.push(entry);
            }
        }
        Ok(matches.into_iter().max_by_key(|e| e.meta.published_at))
    }

    /// Enumerate the store root. Directories with an unparseable
    /// `<encoded-name>@<version>` name, or missing metadata, are
    /// silently skipped rather than failing the whole enumeration.
    pub async fn list_store_entries(&self) -> Result<Vec<StoreEntry>, Error> {
        let root = self.home.store_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read_dir = fs_err::tokio::read_dir(&root).await.map_err(|e| Error::ReadDir(root.clone(), e))?;
        while let Some(dir_entry) = read_dir.next_entry().await.map_err(|e| Error::ReadDir(root.clone(), e))? {
            let Ok(file_type) = dir_entry.file_type().await else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let dir_name = dir_entry.file_name().to_string_lossy().to_string();
            let Some((name, version)) = plunk_paths::parse_entry_dir(&dir_name) else {
                log::debug!("skipping unparseable store entry {dir_name:?}");
                continue;
            };
            if let Some(entry) = self.get_store_entry(&name, &version).await {
                entries.push(entry);
            } else {
                log::debug!("skipping store entry {name}@{version} with missing metadata or package dir");
            }
        }
        Ok(entries)
    }

    pub async fn remove_store_entry(&self, name: &str, version: &str) -> Result<(), Error> {
        let root = self.home.entry_root(name, version);
        self.fs.remove_dir_all(&root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let home = plunk_paths::Home::at(dir.path());
        let fs = std::sync::Arc::new(plunk_fs::Fs::new(false));
        (dir, Store::new(home, fs))
    }

    async fn seed_entry(store: &Store, name: &str, version: &str, hash: &str) {
        let package_dir = store.home().package_dir(name, version);
        tokio::fs::create_dir_all(&package_dir).await.unwrap();
        tokio::fs::write(package_dir.join("index.js"), b"x").await.unwrap();
        store
            .write_meta(
                name,
                version,
                &Meta {
                    content_hash: hash.to_string(),
                    build_id: Some(hash[..8.min(hash.len())].to_string()),
                    published_at: Utc::now(),
                    source_path: "/tmp/src".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_store_entry_requires_meta_and_package_dir() {
        let (_dir, store) = test_store();
        assert!(store.get_store_entry("pkg", "1.0.0").await.is_none());
        seed_entry(&store, "pkg", "1.0.0", "sha256v2:aaaa").await;
        assert!(store.get_store_entry("pkg", "1.0.0").await.is_some());
    }

    #[tokio::test]
    async fn list_store_entries_skips_unparseable_directories() {
        let (_dir, store) = test_store();
        seed_entry(&store, "pkg", "1.0.0", "sha256v2:aaaa").await;
        tokio::fs::create_dir_all(store.home().store_root().join("not-a-valid-name")).await.unwrap();

        let entries = store.list_store_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn remove_store_entry_deletes_the_tree() {
        let (_dir, store) = test_store();
        seed_entry(&store, "pkg", "1.0.0", "sha256v2:aaaa").await;
        store.remove_store_entry("pkg", "1.0.0").await.unwrap();
        assert!(store.get_store_entry("pkg", "1.0.0").await.is_none());
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Turn a source directory into an immutable, content-hashed store entry,
//! reproducing package-manager pack semantics: manifest validation,
//! lifecycle hooks, pack-list resolution, workspace-protocol rewriting,
//! publishConfig overrides, and an atomic store write.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] plunk_manifest::Error),
    #[error(transparent)]
    PackList(#[from] plunk_packlist::Error),
    #[error(transparent)]
    Fs(#[from] plunk_fs::Error),
    #[error(transparent)]
    Store(#[from] plunk_store::Error),
    #[error(transparent)]
    Hook(#[from] plunk_hooks::Error),
    #[error("{0} is private; pass allow_private to publish it anyway")]
    Private(String),
    #[error("pack list is empty for {0}")]
    EmptyPackList(PathBuf),
    #[error("read file {0:?}")]
    ReadFile(PathBuf, #[source] std::io::Error),
    #[error("serialize rewritten manifest")]
    SerializeManifest(#[source] plunk_manifest::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub allow_private: bool,
    pub run_scripts: bool,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub name: String,
    pub version: String,
    pub file_count: usize,
    pub skipped: bool,
    pub content_hash: String,
    pub build_id: String,
}

pub struct Publisher {
    home: plunk_paths::Home,
    fs: std::sync::Arc<plunk_fs::Fs>,
    store: plunk_store::Store,
    hook_timeout: std::time::Duration,
}

impl Publisher {
    pub fn new(home: plunk_paths::Home, fs: std::sync::Arc<plunk_fs::Fs>) -> Self {
        let store = plunk_store::Store::new(home.clone(), fs.clone());
        Self { home, fs, store, hook_timeout: plunk_hooks::default_timeout() }
    }

    pub fn store(&self) -> &plunk_store::Store {
        &self.store
    }

    pub async fn publish(&self, source_dir: &Path, options: PublishOptions) -> Result<PublishResult, Error> {
        let manifest = plunk_manifest::Manifest::read(source_dir)?;
        let name = manifest.name().to_string();
        let version = manifest.version().to_string();

        if manifest.private() && !options.allow_private {
            return Err(Error::Private(name));
        }

        if options.run_scripts {
            if let Some(script) = manifest.script("preplunk") {
                plunk_hooks::run_script(&script, source_dir, self.hook_timeout).await?;
            }
        }

        // Resolve the written manifest (workspace rewrite + publishConfig
        // merge) before packing: a `publishConfig.directory` override
        // changes which subdirectory the pack list is resolved against.
        let mut rewritten = manifest.clone();
        rewritten.rewrite_workspace_protocol();
        let directory_override = rewritten.apply_publish_config();
        let manifest_bytes = rewritten.to_pretty_json().map_err(Error::SerializeManifest)?;

        let pack_source_dir = match &directory_override {
            Some(directory) => source_dir.join(directory),
            None => source_dir.to_path_buf(),
        };

        let files = manifest.files();
        let pack_list = plunk_packlist::resolve(&pack_source_dir, files.as_deref())?;
        if pack_list.files.is_empty() {
            return Err(Error::EmptyPackList(pack_source_dir));
        }
        for warning in &pack_list.warnings {
            log::warn!("{warning}");
        }

        let contents = read_all(&pack_list.files)?;
        let mut entries: Vec<plunk_hash::FileEntry<'_>> = pack_list
            .files
            .iter()
            .zip(&contents)
            .filter(|(path, _)| path.file_name().map(|n| n != plunk_manifest::MANIFEST_FILE_NAME).unwrap_or(true))
            .map(|(path, content)| plunk_hash::FileEntry { path: relative_slash_path(&pack_source_dir, path), content })
            .collect();
        entries.push(plunk_hash::FileEntry { path: plunk_manifest::MANIFEST_FILE_NAME.to_string(), content: &manifest_bytes });
        let content_hash = plunk_hash::aggregate_content_hash(entries);
        let build_id = plunk_hash::build_id(&content_hash);

        if !options.force {
            if let Some(existing) = self.store.get_store_entry(&name, &version).await {
                if existing.meta.content_hash == content_hash {
                    return Ok(PublishResult { name, version, file_count: pack_list.files.len(), skipped: true, content_hash, build_id });
                }
            }
        }

        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let tmp_root = self.home.entry_tmp_root(&name, &version, timestamp);
        let tmp_package_dir = tmp_root.join("package");
        fs_err::tokio::create_dir_all(&tmp_package_dir).await.map_err(|e| plunk_fs::Error::CreateDir(tmp_package_dir.clone(), e))?;

        for (path, content) in pack_list.files.iter().zip(&contents) {
            if path.file_name().map(|n| n == plunk_manifest::MANIFEST_FILE_NAME).unwrap_or(false) {
                continue; // written separately below, already rewritten.
            }
            let rel = path.strip_prefix(&pack_source_dir).unwrap_or(path);
            let dest = tmp_package_dir.join(rel);
            if let Some(parent) = dest.parent() {
                fs_err::tokio::create_dir_all(parent).await.map_err(|e| plunk_fs::Error::CreateDir(parent.to_path_buf(), e))?;
            }
            fs_err::tokio::write(&dest, content).await.map_err(|e| plunk_fs::Error::Write(dest.clone(), e))?;
        }

        let manifest_dest = tmp_package_dir.join(plunk_manifest::MANIFEST_FILE_NAME);
        fs_err::tokio::write(&manifest_dest, &manifest_bytes).await.map_err(|e| plunk_fs::Error::Write(manifest_dest.clone(), e))?;

        let meta = plunk_store::Meta {
            content_hash: content_hash.clone(),
            build_id: Some(build_id.clone()),
            published_at: chrono::Utc::now(),
            source_path: source_dir.display().to_string(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(plunk_store::Error::SerializeMeta)?;
        self.fs.atomic_write(&tmp_root.join(".plunk-meta.json"), &meta_bytes).await?;

        let final_root = self.home.entry_root(&name, &version);
        if final_root.is_dir() {
            self.fs.remove_dir_all(&final_root).await?;
        }
        self.fs.move_dir(&tmp_root, &final_root).await?;

        if options.run_scripts {
            if let Some(script) = manifest.script("postplunk") {
                plunk_hooks::run_script(&script, source_dir, self.hook_timeout).await?;
            }
        }

        Ok(PublishResult { name, version, file_count: pack_list.files.len(), skipped: false, content_hash, build_id })
    }
}

fn read_all(files: &[PathBuf]) -> Result<Vec<Vec<u8>>, Error> {
    files.iter().map(|path| fs_err::read(path).map_err(|e| Error::ReadFile(path.clone(), e))).collect()
}

fn relative_slash_path(source_dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(source_dir).unwrap_or(path);
    rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn publisher(home_dir: &Path) -> Publisher {
        Publisher::new(plunk_paths::Home::at(home_dir), std::sync::Arc::new(plunk_fs::Fs::new(false)))
    }

    #[tokio::test]
    async fn publish_writes_hashed_store_entry() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "const a = 1;");

        let publisher = publisher(home.path());
        let result = publisher.publish(source.path(), PublishOptions::default()).await.unwrap();

        assert!(!result.skipped);
        assert_eq!(result.name, "test-lib");
        assert!(result.content_hash.starts_with(plunk_hash::HASH_PREFIX));

        let entry = publisher.store().get_store_entry("test-lib", "1.0.0").await.unwrap();
        assert_eq!(std::fs::read_to_string(entry.package_dir.join("index.js")).unwrap(), "const a = 1;");
    }

    #[tokio::test]
    async fn republish_with_identical_content_is_skipped() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "const a = 1;");

        let publisher = publisher(home.path());
        publisher.publish(source.path(), PublishOptions::default()).await.unwrap();
        let second = publisher.publish(source.path(), PublishOptions::default()).await.unwrap();

        assert!(second.skipped);
    }

    #[tokio::test]
    async fn private_package_is_rejected_without_allow_private() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0", "private": true}"#);
        write(source.path(), "index.js", "x");

        let publisher = publisher(home.path());
        let result = publisher.publish(source.path(), PublishOptions::default()).await;
        assert!(matches!(result, Err(Error::Private(_))));

        let allowed = publisher.publish(source.path(), PublishOptions { allow_private: true, ..Default::default() }).await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn workspace_dependency_is_rewritten_in_published_manifest() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(
            source.path(),
            "package.json",
            r#"{"name": "test-lib", "version": "2.0.0", "dependencies": {"sibling": "workspace:*"}}"#,
        );
        write(source.path(), "index.js", "x");

        let publisher = publisher(home.path());
        publisher.publish(source.path(), PublishOptions::default()).await.unwrap();

        let entry = publisher.store().get_store_entry("test-lib", "2.0.0").await.unwrap();
        let published = std::fs::read_to_string(entry.package_dir.join("package.json")).unwrap();
        assert!(published.contains("\"sibling\": \"2.0.0\""));
        assert!(!published.contains("workspace:"));
    }

    #[tokio::test]
    async fn publish_config_directory_repacks_from_subdirectory() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(
            source.path(),
            "package.json",
            r#"{"name": "test-lib", "version": "1.0.0", "publishConfig": {"directory": "dist"}}"#,
        );
        write(source.path(), "dist/index.js", "built");

        let publisher = publisher(home.path());
        let result = publisher.publish(source.path(), PublishOptions::default()).await.unwrap();
        assert!(!result.skipped);

        let entry = publisher.store().get_store_entry("test-lib", "1.0.0").await.unwrap();
        assert!(entry.package_dir.join("index.js").exists());
    }

    #[tokio::test]
    async fn empty_pack_list_fails() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(
            source.path(),
            "package.json",
            r#"{"name": "test-lib", "version": "1.0.0", "publishConfig": {"directory": "empty"}}"#,
        );
        std::fs::create_dir_all(source.path().join("empty")).unwrap();

        let publisher = publisher(home.path());
        let result = publisher.publish(source.path(), PublishOptions::default()).await;
        assert!(matches!(result, Err(Error::EmptyPackList(_))));
    }
}

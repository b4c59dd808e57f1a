// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Transplant a store entry into a consumer's dependency tree: resolve
//! the real target (direct or pnpm virtual store), run an incremental
//! copy, create executable shims, and offer backup/restore/remove.

mod binlink;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use binlink::create_bin_shims;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    PackageManager(#[from] plunk_pm::Error),
    #[error(transparent)]
    Fs(#[from] plunk_fs::Error),
    #[error(transparent)]
    Manifest(#[from] plunk_manifest::Error),
    #[error("create bin shim {0:?}")]
    BinShim(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Default)]
pub struct InjectResult {
    pub copied: usize,
    pub skipped: usize,
    pub removed: usize,
    pub bin_links: Vec<String>,
    pub target: PathBuf,
}

pub struct Injector {
    fs: std::sync::Arc<plunk_fs::Fs>,
}

impl Injector {
    pub fn new(fs: std::sync::Arc<plunk_fs::Fs>) -> Self {
        Self { fs }
    }

    /// Direct target is `<consumer>/<deps>/<name>/`. For pnpm (or yarn
    /// in pnpm-style-linker mode): follow an existing symlink if one
    /// resolves elsewhere; otherwise scan the virtual store for a
    /// version match (when `version` is known), falling back to a
    /// prefix match with a warning, and finally to the direct path with
    /// a warning if no virtual store structure exists at all.
    pub fn resolve_target(&self, consumer: &plunk_paths::Consumer, deps_dir: &str, name: &str, version: Option<&str>, detection: &plunk_pm::Detection) -> PathBuf {
        let direct = consumer.dependency_target(deps_dir, name);

        if !detection.uses_pnpm_virtual_store() {
            return direct;
        }

        if let Ok(link_target) = std::fs::read_link(&direct) {
            let resolved = if link_target.is_absolute() { link_target } else { direct.parent().unwrap_or(&direct).join(link_target) };
            if resolved.exists() {
                return resolved;
            }
        }

        let pnpm_dir = consumer.pnpm_virtual_store(deps_dir);
        let encoded = plunk_paths::encode_name(name);
        match plunk_pm::find_virtual_store_entry(&pnpm_dir, &encoded, version.unwrap_or_default()) {
            Some(m) => {
                if !m.exact_version {
                    log::warn!("no exact pnpm virtual-store match for {name}, using {:?}", m.path);
                }
                m.path.join("node_modules").join(name)
            }
            None => {
                log::warn!("no pnpm virtual store found under {pnpm_dir:?}, using direct target");
                direct
            }
        }
    }

    /// Copy `package_dir` into the consumer, resolving the real target
    /// first, then read the injected manifest and create bin shims.
    pub async fn inject(
        &self,
        package_dir: &Path,
        name: &str,
        version: &str,
        consumer_dir: &Path,
        deps_dir: &str,
        detection: &plunk_pm::Detection,
    ) -> Result<InjectResult, Error> {
        detection.ensure_compatible()?;
        let consumer = plunk_paths::Consumer::new(consumer_dir);
        let target = self.resolve_target(&consumer, deps_dir, name, Some(version), detection);

        let stats = self.fs.incremental_copy_dir(package_dir, &target).await?;

        let manifest = plunk_manifest::Manifest::read(&target)?;
        let bin_links = binlink::create_bin_shims(&consumer, deps_dir, &manifest, &target)?;

        Ok(InjectResult { copied: stats.copied, skipped: stats.skipped, removed: stats.removed, bin_links, target })
    }

    /// Runtime dependency names (plus non-optional peers) declared by
    /// the injected manifest that aren't present in the consumer's
    /// dependency tree. Advisory only: injection already succeeded.
    pub fn missing_dependencies(&self, manifest: &plunk_manifest::Manifest, consumer: &plunk_paths::Consumer, deps_dir: &str) -> Vec<String> {
        manifest
            .runtime_dependency_names()
            .into_iter()
            .filter(|dep| !consumer.dependency_target(deps_dir, dep).exists())
            .collect()
    }

    /// If a directory exists at the resolved target, copy it aside to
    /// the consumer's backup path and return `true`.
    pub async fn backup_existing(&self, consumer_dir: &Path, name: &str, deps_dir: &str, detection: &plunk_pm::Detection) -> Result<bool, Error> {
        let consumer = plunk_paths::Consumer::new(consumer_dir);
        let target = self.resolve_target(&consumer, deps_dir, name, None, detection);
        if !target.is_dir() {
            return Ok(false);
        }
        let backup = consumer.backup_path(name);
        self.fs.incremental_copy_dir(&target, &backup).await?;
        Ok(true)
    }

    /// If a backup exists, delete the target and copy the backup into
    /// its place, then delete the backup. Returns whether a restore
    /// occurred.
    pub async fn restore_backup(&self, consumer_dir: &Path, name: &str, deps_dir: &str, detection: &plunk_pm::Detection) -> Result<bool, Error> {
        let consumer = plunk_paths::Consumer::new(consumer_dir);
        let backup = consumer.backup_path(name);
        if !backup.is_dir() {
            return Ok(false);
        }
        let target = self.resolve_target(&consumer, deps_dir, name, None, detection);
        self.fs.remove_dir_all(&target).await?;
        self.fs.incremental_copy_dir(&backup, &target).await?;
        self.fs.remove_dir_all(&backup).await?;
        Ok(true)
    }

    /// Remove executable shims based on the currently-injected manifest
    /// (if readable), then delete the target.
    pub async fn remove_injected(&self, consumer_dir: &Path, name: &str, deps_dir: &str, detection: &plunk_pm::Detection) -> Result<(), Error> {
        let consumer = plunk_paths::Consumer::new(consumer_dir);
        let target = self.resolve_target(&consumer, deps_dir, name, None, detection);

        if let Ok(manifest) = plunk_manifest::Manifest::read(&target) {
            binlink::remove_bin_shims(&consumer, deps_dir, &manifest)?;
        }

        self.fs.remove_dir_all(&target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npm_detection() -> plunk_pm::Detection {
        plunk_pm::Detection { package_manager: plunk_pm::PackageManager::Npm, yarn_linker: None }
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn inject_copies_files_byte_for_byte() {
        let store = tempfile::tempdir().unwrap();
        write(store.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(store.path(), "dist/index.js", "const a=1;");

        let consumer = tempfile::tempdir().unwrap();
        let injector = Injector::new(std::sync::Arc::new(plunk_fs::Fs::new(false)));
        let result = injector
            .inject(store.path(), "test-lib", "1.0.0", consumer.path(), "node_modules", &npm_detection())
            .await
            .unwrap();

        assert_eq!(result.copied, 2); // package.json + dist/index.js
        assert_eq!(
            std::fs::read(consumer.path().join("node_modules/test-lib/dist/index.js")).unwrap(),
            b"const a=1;"
        );
    }

    #[tokio::test]
    async fn second_inject_of_unchanged_entry_copies_nothing() {
        let store = tempfile::tempdir().unwrap();
        write(store.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(store.path(), "dist/index.js", "const a=1;");

        let consumer = tempfile::tempdir().unwrap();
        let injector = Injector::new(std::sync::Arc::new(plunk_fs::Fs::new(false)));
        injector.inject(store.path(), "test-lib", "1.0.0", consumer.path(), "node_modules", &npm_detection()).await.unwrap();
        let result = injector
            .inject(store.path(), "test-lib", "1.0.0", consumer.path(), "node_modules", &npm_detection())
            .await
            .unwrap();

        assert_eq!(result.copied, 0);
        assert_eq!(result.removed, 0);
    }

    #[tokio::test]
    async fn backup_then_restore_round_trips() {
        let consumer = tempfile::tempdir().unwrap();
        write(consumer.path(), "node_modules/test-lib/original.js", "// v0.9");

        let injector = Injector::new(std::sync::Arc::new(plunk_fs::Fs::new(false)));
        let backed_up = injector.backup_existing(consumer.path(), "test-lib", "node_modules", &npm_detection()).await.unwrap();
        assert!(backed_up);

        // Simulate an inject overwriting the target.
        std::fs::remove_dir_all(consumer.path().join("node_modules/test-lib")).unwrap();
        write(consumer.path(), "node_modules/test-lib/original.js", "// plunk version");

        let restored = injector.restore_backup(consumer.path(), "test-lib", "node_modules", &npm_detection()).await.unwrap();
        assert!(restored);
        assert_eq!(std::fs::read_to_string(consumer.path().join("node_modules/test-lib/original.js")).unwrap(), "// v0.9");
        assert!(!plunk_paths::Consumer::new(consumer.path()).backup_path("test-lib").exists());
    }

    #[tokio::test]
    async fn pnpm_virtual_store_target_resolution() {
        let store = tempfile::tempdir().unwrap();
        write(store.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(store.path(), "index.js", "x");

        let consumer = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(consumer.path().join("node_modules/.pnpm/test-lib@1.0.0/node_modules/test-lib")).unwrap();

        let detection = plunk_pm::Detection { package_manager: plunk_pm::PackageManager::Pnpm, yarn_linker: None };
        let injector = Injector::new(std::sync::Arc::new(plunk_fs::Fs::new(false)));
        injector.inject(store.path(), "test-lib", "1.0.0", consumer.path(), "node_modules", &detection).await.unwrap();

        assert!(consumer
            .path()
            .join("node_modules/.pnpm/test-lib@1.0.0/node_modules/test-lib/index.js")
            .exists());
        assert!(!consumer.path().join("node_modules/test-lib").exists());
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem primitives: reflink-aware copy with a per-volume capability
//! cache, incremental directory sync, atomic write-rename, and a
//! cross-filesystem-safe `move_dir`.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use futures_util::{stream, StreamExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stat {0:?}")]
    Stat(PathBuf, #[source] io::Error),
    #[error("copy {0:?} -> {1:?}")]
    Copy(PathBuf, PathBuf, #[source] io::Error),
    #[error("create directory {0:?}")]
    CreateDir(PathBuf, #[source] io::Error),
    #[error("remove {0:?}")]
    Remove(PathBuf, #[source] io::Error),
    #[error("write {0:?}")]
    Write(PathBuf, #[source] io::Error),
    #[error("rename {0:?} -> {1:?}")]
    Rename(PathBuf, PathBuf, #[source] io::Error),
    #[error("walk {0:?}")]
    Walk(PathBuf, #[source] io::Error),
}

/// Number of concurrent filesystem operations for I/O-bound pools:
/// `max(available_cpu, 8)`.
pub fn pool_size() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(8)
}

#[derive(Default, Debug, Clone, Copy)]
pub struct CopyStats {
    pub copied: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Per-volume reflink capability cache plus the dry-run flag. One
/// instance is threaded through a whole command invocation; the cache
/// lives in process memory only.
pub struct Fs {
    dry_run: bool,
    reflink_supported: Mutex<HashMap<u64, bool>>,
}

impl Fs {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run, reflink_supported: Mutex::new(HashMap::new()) }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Copy one file, preferring a reflink clone. The destination's
    /// volume (identified by `st_dev`) is probed once; subsequent copies
    /// on that volume consult the cached result instead of re-probing.
    /// Hardlink fallback is never used here: incremental copy compares
    /// bytes across calls, and a shared inode would let a later source
    /// mutation silently leak into every consumer that shares it.
    pub async fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), Error> {
        if self.dry_run {
            log::info!("dry-run: would copy {src:?} -> {dest:?}");
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            fs_err::tokio::create_dir_all(parent)
                .await
                .map_err(|e| Error::CreateDir(parent.to_path_buf(), e))?;
        }

        let volume = volume_id(dest.parent().unwrap_or(dest)).unwrap_or(0);
        let supported = self.reflink_supported.lock().unwrap().get(&volume).copied();

        let src = src.to_path_buf();
        let dest_path = dest.to_path_buf();

        match supported {
            Some(true) => {
                self.reflink(&src, &dest_path).await?;
            }
            Some(false) => {
                plain_copy(&src, &dest_path).await?;
            }
            None => {
                let worked = self.reflink(&src, &dest_path).await.is_ok();
                if !worked {
                    plain_copy(&src, &dest_path).await?;
                }
                self.reflink_supported.lock().unwrap().insert(volume, worked);
            }
        }
        Ok(())
    }

    async fn reflink(&self, src: &Path, dest: &Path) -> Result<(), Error> {
        let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || reflink_copy::reflink(&src, &dest))
            .await
            .map_err(|e| Error::Copy(src.clone(), dest.clone(), io::Error::other(e)))?
            .map_err(|e| Error::Copy(src, dest, e))
    }

    /// Bring `dest` in sync with `src`: copy new/changed files, skip
    /// unchanged ones, remove dest files with no source counterpart.
    /// Copies run on a bounded pool sized by [`pool_size`].
    pub async fn incremental_copy_dir(&self, src: &Path, dest: &Path) -> Result<CopyStats, Error> {
        let relative_paths = walk_relative_files(src)?;

        if self.dry_run {
            log::info!("dry-run: would sync {} files {src:?} -> {dest:?}", relative_paths.len());
            return Ok(CopyStats::default());
        }

        fs_err::tokio::create_dir_all(dest)
            .await
            .map_err(|e| Error::CreateDir(dest.to_path_buf(), e))?;

        let decisions = stream::iter(relative_paths.iter().cloned())
            .map(|rel| {
                let src_path = src.join(&rel);
                let dest_path = dest.join(&rel);
                async move {
                    let needs_copy = needs_copy(&src_path, &dest_path).await;
                    (rel, needs_copy)
                }
            })
            .buffer_unordered(pool_size())
            .collect::<Vec<_>>()
            .await;

        let mut copied = 0usize;
        let mut skipped = 0usize;

        let to_copy: Vec<PathBuf> = decisions
            .into_iter()
            .filter_map(|(rel, copy)| {
                if copy {
                    Some(rel)
                } else {
                    skipped += 1;
                    None
                }
            })
            .collect();

        let results = stream::iter(to_copy)
            .map(|rel| async move {
                let src_path = src.join(&rel);
                let dest_path = dest.join(&rel);
                self.copy_file(&src_path, &dest_path).await
            })
            .buffer_unordered(pool_size())
            .collect::<Vec<_>>()
            .await;

        for result in results {
            result?;
            copied += 1;
        }

        let removed = remove_orphans(dest, &relative_paths.into_iter().collect()).await?;

        Ok(CopyStats { copied, skipped, removed })
    }

    /// Write `contents` to `<target>.tmp` then rename into place. Rename
    /// is atomic on the same filesystem.
    pub async fn atomic_write(&self, target: &Path, contents: &[u8]) -> Result<(), Error> {
        if self.dry_run {
            log::info!("dry-run: would write {target:?} ({} bytes)", contents.len());
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            fs_err::tokio::create_dir_all(parent)
                .await
                .map_err(|e| Error::CreateDir(parent.to_path_buf(), e))?;
        }

        let tmp = tmp_sibling(target);
        fs_err::tokio::write(&tmp, contents)
            .await
            .map_err(|e| Error::Write(tmp.clone(), e))?;
        fs_err::tokio::rename(&tmp, target)
            .await
            .map_err(|e| Error::Rename(tmp, target.to_path_buf(), e))?;
        Ok(())
    }

    /// Atomically rename `src` into `dest`, falling back to recursive
    /// copy + source removal on `EXDEV` (cross-filesystem rename).
    pub async fn move_dir(&self, src: &Path, dest: &Path) -> Result<(), Error> {
        if self.dry_run {
            log::info!("dry-run: would move {src:?} -> {dest:?}");
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            fs_err::tokio::create_dir_all(parent)
                .await
                .map_err(|e| Error::CreateDir(parent.to_path_buf(), e))?;
        }

        match fs_err::tokio::rename(src, dest).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
                self.copy_dir_recursive(src, dest).await?;
                fs_err::tokio::remove_dir_all(src)
                    .await
                    .map_err(|e| Error::Remove(src.to_path_buf(), e))?;
                Ok(())
            }
            Err(e) => Err(Error::Rename(src.to_path_buf(), dest.to_path_buf(), e)),
        }
    }

    async fn copy_dir_recursive(&self, src: &Path, dest: &Path) -> Result<(), Error> {
        let relative_paths = walk_relative_files(src)?;
        let results = stream::iter(relative_paths)
            .map(|rel| async move { self.copy_file(&src.join(&rel), &dest.join(&rel)).await })
            .buffer_unordered(pool_size())
            .collect::<Vec<_>>()
            .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Remove a directory tree. Honors dry-run.
    pub async fn remove_dir_all(&self, path: &Path) -> Result<(), Error> {
        if self.dry_run {
            log::info!("dry-run: would remove {path:?}");
            return Ok(());
        }
        match fs_err::tokio::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Remove(path.to_path_buf(), e)),
        }
    }
}

fn tmp_sibling(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

async fn plain_copy(src: &Path, dest: &Path) -> Result<(), Error> {
    fs_err::tokio::copy(src, dest)
        .await
        .map(|_| ())
        .map_err(|e| Error::Copy(src.to_path_buf(), dest.to_path_buf(), e))
}

async fn needs_copy(src: &Path, dest: &Path) -> bool {
    let (src_meta, dest_meta) = tokio::join!(fs_err::tokio::metadata(src), fs_err::tokio::metadata(dest));
    let Ok(src_meta) = src_meta else { return false };
    let Ok(dest_meta) = dest_meta else { return true };

    if src_meta.len() != dest_meta.len() {
        return true;
    }

    let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || {
        let src_hash = plunk_hash::fast_hash_file(&src).ok();
        let dest_hash = plunk_hash::fast_hash_file(&dest).ok();
        src_hash != dest_hash
    })
    .await
    .unwrap_or(true)
}

async fn remove_orphans(dest: &Path, source_relatives: &HashSet<PathBuf>) -> Result<usize, Error> {
    let dest_relatives = walk_relative_files(dest)?;
    let mut removed = 0usize;
    for rel in dest_relatives {
        if !source_relatives.contains(&rel) {
            let path = dest.join(&rel);
            if fs_err::tokio::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
    }
    remove_empty_dirs(dest);
    Ok(removed)
}

fn remove_empty_dirs(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_empty_dirs(&path);
            let _ = std::fs::remove_dir(&path);
        }
    }
}

/// Recursive enumeration of regular files under `root`, returned as
/// paths relative to `root`. Follows file entries only, matching the
/// aggregate-hash and incremental-copy contract; symlinked files are
/// read through, symlinked directories are not traversed.
fn walk_relative_files(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut out = Vec::new();
    if root.exists() {
        walk_relative_files_into(root, Path::new(""), &mut out)?;
    }
    Ok(out)
}

fn walk_relative_files_into(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    let dir = root.join(rel);
    let entries = std::fs::read_dir(&dir).map_err(|e| Error::Walk(dir.clone(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Walk(dir.clone(), e))?;
        let file_type = entry.file_type().map_err(|e| Error::Walk(entry.path(), e))?;
        let child_rel = rel.join(entry.file_name());
        if file_type.is_dir() {
            walk_relative_files_into(root, &child_rel, out)?;
        } else if file_type.is_file() {
            out.push(child_rel);
        }
    }
    Ok(())
}

fn volume_id(path: &Path) -> Option<u64> {
    nix::sys::stat::stat(path).ok().map(|s| s.st_dev as u64)
}

fn libc_exdev() -> i32 {
    #[cfg(unix)]
    {
        nix::libc::EXDEV
    }
    #[cfg(not(unix))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incremental_copy_copies_new_files() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();

        let fs = Fs::new(false);
        let stats = fs.incremental_copy_dir(src.path(), dest.path()).await.unwrap();
        assert_eq!(stats.copied, 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn incremental_copy_skips_unchanged_on_second_call() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();

        let fs = Fs::new(false);
        fs.incremental_copy_dir(src.path(), dest.path()).await.unwrap();
        let stats = fs.incremental_copy_dir(src.path(), dest.path()).await.unwrap();
        assert_eq!(stats.copied, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.removed, 0);
    }

    #[tokio::test]
    async fn incremental_copy_removes_orphans() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("keep.js"), b"keep").unwrap();

        let fs = Fs::new(false);
        fs.incremental_copy_dir(src.path(), dest.path()).await.unwrap();
        std::fs::write(src.path().join("remove-me.js"), b"bye").unwrap();
        fs.incremental_copy_dir(src.path(), dest.path()).await.unwrap();

        std::fs::remove_file(src.path().join("remove-me.js")).unwrap();
        let stats = fs.incremental_copy_dir(src.path(), dest.path()).await.unwrap();
        assert_eq!(stats.removed, 1);
        assert!(!dest.path().join("remove-me.js").exists());
        assert!(dest.path().join("keep.js").exists());
    }

    #[tokio::test]
    async fn atomic_write_then_rename() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        let fs = Fs::new(false);
        fs.atomic_write(&target, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
        assert!(!tmp_sibling(&target).exists());
    }

    #[tokio::test]
    async fn dry_run_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        let fs = Fs::new(true);
        fs.atomic_write(&target, b"{}").await.unwrap();
        assert!(!target.exists());
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Content hashing: the deterministic SHA-256 aggregate hash used to
//! identify a publish, the fast xxh3 per-file hash used for incremental
//! copy, and an in-memory content cache for watch-mode re-publishes.

use std::{
    collections::HashMap,
    io::{self, Read},
    path::{Path, PathBuf},
    time::SystemTime,
};

use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::Xxh3;

/// Versioned prefix on every aggregate content hash, so a future hashing
/// scheme can be distinguished from this one.
pub const HASH_PREFIX: &str = "sha256v2:";

const STREAM_THRESHOLD: u64 = 1024 * 1024;

/// One file entry contributing to the aggregate hash: a forward-slash
/// normalized relative path and its bytes.
pub struct FileEntry<'a> {
    pub path: String,
    pub content: &'a [u8],
}

/// Deterministic digest over a sorted sequence of file entries:
/// `path_bytes · NUL · length_u32_le(content) · content`, repeated per
/// file in ascending path order, then SHA-256'd and prefixed with
/// [`HASH_PREFIX`].
///
/// Sorting happens here so callers don't need to pre-sort; hash
/// computation is therefore independent of read order.
pub fn aggregate_content_hash<'a>(entries: impl IntoIterator<Item = FileEntry<'a>>) -> String {
    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.path.as_bytes());
        hasher.update([0u8]);
        hasher.update((entry.content.len() as u32).to_le_bytes());
        hasher.update(entry.content);
    }
    format!("{HASH_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// First 8 hex chars after the prefix, used as a short display tag in
/// logs and link entries. Returns the whole string if it is shorter than
/// that (defensive only; real hashes are always long enough).
pub fn build_id(content_hash: &str) -> String {
    let digest = content_hash.strip_prefix(HASH_PREFIX).unwrap_or(content_hash);
    digest.chars().take(8).collect()
}

/// Fast non-cryptographic 64-bit hash of in-memory bytes, used for
/// incremental-copy change detection. Never persisted.
pub fn fast_hash_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// Fast hash of a file's contents: buffered read for small files,
/// streaming for anything at or above [`STREAM_THRESHOLD`] so a large
/// asset doesn't need to be loaded whole into memory just to compare it.
pub fn fast_hash_file(path: &Path) -> io::Result<u64> {
    let mut file = fs_err::File::open(path)?;
    let len = file.metadata()?.len();

    if len < STREAM_THRESHOLD {
        let mut buf = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buf)?;
        return Ok(fast_hash_bytes(&buf));
    }

    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

struct CacheEntry {
    mtime_ms: u128,
    size: u64,
    content: Vec<u8>,
    touched: bool,
}

/// Keyed by absolute path; each entry caches `(mtime_ms, size,
/// content_bytes)` for watch-mode re-publishes so unchanged files aren't
/// re-read from disk on every rebuild. Invalidated on mtime or size
/// mismatch; entries not touched since the last [`ContentCache::evict_untouched`]
/// call are dropped, since that means the path left the current file set.
#[derive(Default)]
pub struct ContentCache {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this file's content, reading from disk only if the cached
    /// entry is absent or stale.
    pub fn get_or_read(&mut self, path: &Path) -> io::Result<&[u8]> {
        let metadata = fs_err::metadata(path)?;
        let mtime_ms = mtime_ms(&metadata);
        let size = metadata.len();

        let stale = match self.entries.get(path) {
            Some(entry) => entry.mtime_ms != mtime_ms || entry.size != size,
            None => true,
        };

        if stale {
            let content = fs_err::read(path)?;
            self.entries.insert(
                path.to_path_buf(),
                CacheEntry { mtime_ms, size, content, touched: true },
            );
        } else if let Some(entry) = self.entries.get_mut(path) {
            entry.touched = true;
        }

        Ok(&self.entries.get(path).expect("just inserted or present").content)
    }

    /// Drop any entry not touched via [`Self::get_or_read`] since the
    /// last call to this method, then reset the touched flags. Call once
    /// per publish/rebuild after resolving the current pack list.
    pub fn evict_untouched(&mut self) {
        self.entries.retain(|_, entry| entry.touched);
        for entry in self.entries.values_mut() {
            entry.touched = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn mtime_ms(metadata: &std::fs::Metadata) -> u128 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

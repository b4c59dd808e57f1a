// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Debounced source-change loop: pick watch targets, run the build
//! command (if any) to completion, then invoke a serialized push. A
//! change arriving while a push is in flight is coalesced into the
//! following run rather than spawning a concurrent push.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use notify::{RecursiveMode, Watcher};
use thiserror::Error;

use crate::{PushEngine, PushOptions};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);

/// Source-like directory names consulted when a build command is
/// configured but no explicit watch pattern was given.
const SOURCE_LIKE_DIRS: &[&str] = &["src", "lib", "source", "app", "pages", "components"];

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error("install signal handler")]
    Signal(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub cooldown: Duration,
    pub build_command: Option<String>,
    pub run_scripts: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { debounce: DEFAULT_DEBOUNCE, cooldown: DEFAULT_COOLDOWN, build_command: None, run_scripts: false }
    }
}

/// Choose what to watch: explicit patterns if given, else (with a build
/// command configured) whichever source-like directories exist, else
/// the manifest's `files` list, else the whole source directory.
pub fn resolve_watch_targets(source_dir: &Path, explicit_patterns: Option<&[String]>) -> Vec<PathBuf> {
    if let Some(patterns) = explicit_patterns {
        if !patterns.is_empty() {
            return patterns.iter().map(|p| source_dir.join(p)).collect();
        }
    }

    let source_like: Vec<PathBuf> = SOURCE_LIKE_DIRS.iter().map(|d| source_dir.join(d)).filter(|p| p.is_dir()).collect();
    if !source_like.is_empty() {
        return source_like;
    }

    if let Ok(manifest) = plunk_manifest::Manifest::read(source_dir) {
        if let Some(files) = manifest.files() {
            let from_manifest: Vec<PathBuf> = files.iter().map(|f| source_dir.join(f)).collect();
            if !from_manifest.is_empty() {
                return from_manifest;
            }
        }
    }

    vec![source_dir.to_path_buf()]
}

/// Explicit `--build` wins; otherwise fall back to the manifest's own
/// `scripts.build`, if any.
pub fn resolve_build_command(source_dir: &Path, explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| plunk_manifest::Manifest::read(source_dir).ok()?.script("build"))
}

/// Run the watch loop until `shutdown_signal()`. Every debounced batch
/// of changes triggers the build command (if configured) followed by a
/// push; both run to completion before the next batch is picked up, and
/// a cooldown after a just-finished push suppresses an immediate rerun.
pub async fn watch(package_dir: &Path, engine: &PushEngine, watch_paths: &[PathBuf], options: WatchOptions) -> Result<(), Error> {
    let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Event>();
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
        Ok(event) => {
            let _ = raw_tx.send(event);
        }
        Err(e) => log::warn!("watch error: {e}"),
    })?;

    for path in watch_paths {
        watcher.watch(path, RecursiveMode::Recursive)?;
        log::debug!("watching {path:?}");
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    std::thread::spawn(move || {
        while raw_rx.recv().is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let hook_timeout = plunk_hooks::default_timeout();
    let mut last_push: Option<Instant> = None;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.map_err(Error::Signal)?;
                log::info!("watch received shutdown signal, stopping");
                break;
            }
            received = rx.recv() => {
                if received.is_none() {
                    break;
                }
                drain_within_debounce(&mut rx, options.debounce).await;

                if let Some(last) = last_push {
                    if last.elapsed() < options.cooldown {
                        log::debug!("change within cooldown window, skipping");
                        continue;
                    }
                }

                if let Some(command) = &options.build_command {
                    if let Err(e) = plunk_hooks::run_script(command, package_dir, hook_timeout).await {
                        log::error!("build command failed: {e}");
                        continue;
                    }
                }

                match engine.do_push(package_dir, PushOptions { run_scripts: options.run_scripts, force: false }).await {
                    Ok(report) if report.skipped => log::info!("push skipped, content unchanged"),
                    Ok(report) => log::info!(
                        "pushed {}@{} to {} consumer(s) ({} failed)",
                        report.name, report.version, report.pushed, report.failed
                    ),
                    Err(e) => log::error!("push failed: {e}"),
                }
                last_push = Some(Instant::now());
            }
        }
    }

    Ok(())
}

/// Drain any further change notifications that arrive within the
/// debounce window, so a burst of filesystem events collapses into one
/// push.
async fn drain_within_debounce(rx: &mut tokio::sync::mpsc::UnboundedReceiver<()>, debounce: Duration) {
    loop {
        match tokio::time::timeout(debounce, rx.recv()).await {
            Ok(Some(())) => continue,
            _ => break,
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok(()),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    tokio::signal::ctrl_c().await
}

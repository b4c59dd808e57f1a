// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Publish then fan out an incremental re-inject to every registered
//! consumer, with bounded concurrency. The filesystem watcher (`watch`
//! module) drives this on every debounced source change.

pub mod watch;

use std::{path::Path, time::Duration};

use thiserror::Error;

/// Consumer fan-out concurrency, per the push/consumer-injection budget.
const FAN_OUT_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Publish(#[from] plunk_publish::Error),
    #[error(transparent)]
    Store(#[from] plunk_store::Error),
    #[error(transparent)]
    Tracker(#[from] plunk_tracker::Error),
    #[error("published entry for {0}@{1} is missing from the store immediately after publish")]
    MissingStoreEntry(String, String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    pub run_scripts: bool,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct ConsumerPushFailure {
    pub consumer_dir: std::path::PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub name: String,
    pub version: String,
    pub skipped: bool,
    pub pushed: usize,
    pub failed: usize,
    pub files_changed: usize,
    pub files_unchanged: usize,
    pub elapsed: Duration,
    pub failures: Vec<ConsumerPushFailure>,
}

pub struct PushEngine {
    publisher: plunk_publish::Publisher,
    tracker: plunk_tracker::Tracker,
    injector: plunk_injector::Injector,
}

impl PushEngine {
    pub fn new(home: plunk_paths::Home, fs: std::sync::Arc<plunk_fs::Fs>) -> Self {
        let publisher = plunk_publish::Publisher::new(home.clone(), fs.clone());
        let tracker = plunk_tracker::Tracker::new(home, fs.clone());
        let injector = plunk_injector::Injector::new(fs);
        Self { publisher, tracker, injector }
    }

    pub async fn do_push(&self, package_dir: &Path, options: PushOptions) -> Result<PushReport, Error> {
        let started = std::time::Instant::now();

        let publish_options = plunk_publish::PublishOptions { allow_private: true, run_scripts: options.run_scripts, force: options.force };
        let published = self.publisher.publish(package_dir, publish_options).await?;

        if published.skipped {
            return Ok(PushReport { name: published.name, version: published.version, skipped: true, elapsed: started.elapsed(), ..Default::default() });
        }

        let entry = self
            .publisher
            .store()
            .get_store_entry(&published.name, &published.version)
            .await
            .ok_or_else(|| Error::MissingStoreEntry(published.name.clone(), published.version.clone()))?;

        let consumers = self.tracker.get_consumers(&published.name).await;

        let results: Vec<ConsumerOutcome> = futures_util::stream::iter(consumers)
            .map(|consumer_dir| {
                let entry = entry.clone();
                async move { self.push_to_consumer(&consumer_dir, &entry).await }
            })
            .buffer_unordered(FAN_OUT_CONCURRENCY)
            .collect()
            .await;

        let mut report = PushReport { name: published.name, version: published.version, skipped: false, elapsed: started.elapsed(), ..Default::default() };
        for outcome in results {
            match outcome {
                ConsumerOutcome::Pushed { copied, skipped } => {
                    report.pushed += 1;
                    report.files_changed += copied;
                    report.files_unchanged += skipped;
                }
                ConsumerOutcome::NotLinked => {}
                ConsumerOutcome::Failed { consumer_dir, message } => {
                    report.failed += 1;
                    report.failures.push(ConsumerPushFailure { consumer_dir, message });
                }
            }
        }
        Ok(report)
    }

    /// Inject into one consumer, then always overwrite its link entry
    /// with the fresh hash/build id/timestamp, even if zero files
    /// changed: consumers treat a state-file write as their restart
    /// trigger regardless of copy volume.
    async fn push_to_consumer(&self, consumer_dir: &Path, entry: &plunk_store::StoreEntry) -> ConsumerOutcome {
        let Some(link) = self.tracker.get_link(consumer_dir, &entry.name).await else {
            return ConsumerOutcome::NotLinked;
        };

        let detection = plunk_pm::detect(consumer_dir);
        let package_manager = detection.package_manager;
        let deps_dir = package_manager.deps_dir();

        let inject_result = self
            .injector
            .inject(&entry.package_dir, &entry.name, &entry.version, consumer_dir, deps_dir, &detection)
            .await;

        let (copied, skipped) = match &inject_result {
            Ok(result) => (result.copied, result.skipped),
            Err(e) => return ConsumerOutcome::Failed { consumer_dir: consumer_dir.to_path_buf(), message: e.to_string() },
        };

        let new_link = plunk_tracker::LinkEntry {
            version: entry.version.clone(),
            content_hash: entry.meta.content_hash.clone(),
            linked_at: chrono::Utc::now(),
            source_path: entry.meta.source_path.clone(),
            backup_exists: link.backup_exists,
            package_manager: package_manager.as_str().to_string(),
            build_id: entry.meta.build_id.clone(),
        };
        if let Err(e) = self.tracker.add_link(consumer_dir, &entry.name, new_link).await {
            return ConsumerOutcome::Failed { consumer_dir: consumer_dir.to_path_buf(), message: e.to_string() };
        }

        ConsumerOutcome::Pushed { copied, skipped }
    }
}

use futures_util::StreamExt as _;

enum ConsumerOutcome {
    Pushed { copied: usize, skipped: usize },
    NotLinked,
    Failed { consumer_dir: std::path::PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn push_fans_out_to_registered_consumers() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "v1");

        let consumer = tempfile::tempdir().unwrap();
        write(consumer.path(), "package-lock.json", "{}");

        let home_root = plunk_paths::Home::at(home.path());
        let fs = std::sync::Arc::new(plunk_fs::Fs::new(false));
        let tracker = plunk_tracker::Tracker::new(home_root.clone(), fs.clone());
        tracker.register_consumer("test-lib", consumer.path()).await.unwrap();
        tracker
            .add_link(
                consumer.path(),
                "test-lib",
                plunk_tracker::LinkEntry {
                    version: "0.9.0".to_string(),
                    content_hash: "sha256v2:stale".to_string(),
                    linked_at: chrono::Utc::now(),
                    source_path: source.path().display().to_string(),
                    backup_exists: false,
                    package_manager: "npm".to_string(),
                    build_id: None,
                },
            )
            .await
            .unwrap();

        let engine = PushEngine::new(home_root, fs);
        let report = engine.do_push(source.path(), PushOptions::default()).await.unwrap();

        assert!(!report.skipped);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 0);
        assert!(consumer.path().join("node_modules/test-lib/index.js").exists());

        let link = tracker.get_link(consumer.path(), "test-lib").await.unwrap();
        assert_ne!(link.content_hash, "sha256v2:stale");
    }

    #[tokio::test]
    async fn push_skips_unlinked_consumers() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "v1");

        let consumer = tempfile::tempdir().unwrap();

        let home_root = plunk_paths::Home::at(home.path());
        let fs = std::sync::Arc::new(plunk_fs::Fs::new(false));
        let tracker = plunk_tracker::Tracker::new(home_root.clone(), fs.clone());
        tracker.register_consumer("test-lib", consumer.path()).await.unwrap();

        let engine = PushEngine::new(home_root, fs);
        let report = engine.do_push(source.path(), PushOptions::default()).await.unwrap();

        assert_eq!(report.pushed, 0);
        assert_eq!(report.failed, 0);
        assert!(!consumer.path().join("node_modules/test-lib").exists());
    }

    #[tokio::test]
    async fn second_push_with_unchanged_content_is_reported_as_skipped() {
        let home = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), "package.json", r#"{"name": "test-lib", "version": "1.0.0"}"#);
        write(source.path(), "index.js", "v1");

        let home_root = plunk_paths::Home::at(home.path());
        let fs = std::sync::Arc::new(plunk_fs::Fs::new(false));
        let engine = PushEngine::new(home_root, fs);

        engine.do_push(source.path(), PushOptions::default()).await.unwrap();
        let second = engine.do_push(source.path(), PushOptions::default()).await.unwrap();
        assert!(second.skipped);
    }
}

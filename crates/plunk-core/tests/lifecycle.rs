// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end coverage spanning publish, add, and push together, for
//! behavior that no single crate's unit tests can exercise alone.

use std::path::Path;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn npm_consumer(root: &Path) {
    write(root, "package-lock.json", "{}");
}

#[tokio::test]
async fn push_updates_every_consumer_even_if_one_is_gone() {
    let home = tempfile::tempdir().unwrap();
    let plunk = plunk_core::Plunk::new(plunk_paths::Home::at(home.path()), false);

    let source = tempfile::tempdir().unwrap();
    write(source.path(), "package.json", r#"{"name": "widget", "version": "1.0.0"}"#);
    write(source.path(), "index.js", "module.exports = 1;");

    let live_consumer = tempfile::tempdir().unwrap();
    npm_consumer(live_consumer.path());
    let gone_consumer = tempfile::tempdir().unwrap();
    npm_consumer(gone_consumer.path());

    plunk.add(live_consumer.path(), "widget", Some(source.path())).await.unwrap();
    plunk.add(gone_consumer.path(), "widget", None).await.unwrap();

    // Simulate one consumer having been deleted since it linked.
    std::fs::remove_dir_all(gone_consumer.path()).unwrap();

    write(source.path(), "index.js", "module.exports = 2;");

    let report = plunk
        .push_engine()
        .do_push(source.path(), plunk_push::PushOptions { run_scripts: false, force: false })
        .await
        .unwrap();

    assert_eq!(report.pushed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures.len(), 1);

    let injected = std::fs::read_to_string(live_consumer.path().join("node_modules/widget/index.js")).unwrap();
    assert_eq!(injected, "module.exports = 2;");
}

#[tokio::test]
async fn push_propagates_a_file_deletion_to_every_consumer() {
    let home = tempfile::tempdir().unwrap();
    let plunk = plunk_core::Plunk::new(plunk_paths::Home::at(home.path()), false);

    let source = tempfile::tempdir().unwrap();
    write(source.path(), "package.json", r#"{"name": "widget", "version": "1.0.0"}"#);
    write(source.path(), "index.js", "module.exports = 1;");
    write(source.path(), "extra.js", "module.exports = 'extra';");

    let consumer = tempfile::tempdir().unwrap();
    npm_consumer(consumer.path());
    plunk.add(consumer.path(), "widget", Some(source.path())).await.unwrap();
    assert!(consumer.path().join("node_modules/widget/extra.js").exists());

    std::fs::remove_file(source.path().join("extra.js")).unwrap();

    let report = plunk
        .push_engine()
        .do_push(source.path(), plunk_push::PushOptions { run_scripts: false, force: false })
        .await
        .unwrap();

    assert_eq!(report.pushed, 1);
    assert!(!consumer.path().join("node_modules/widget/extra.js").exists());
    assert!(consumer.path().join("node_modules/widget/index.js").exists());
}

#[tokio::test]
async fn status_reports_stale_when_a_newer_version_is_published() {
    let home = tempfile::tempdir().unwrap();
    let plunk = plunk_core::Plunk::new(plunk_paths::Home::at(home.path()), false);

    let source = tempfile::tempdir().unwrap();
    write(source.path(), "package.json", r#"{"name": "widget", "version": "1.0.0"}"#);
    write(source.path(), "index.js", "module.exports = 1;");

    let consumer = tempfile::tempdir().unwrap();
    npm_consumer(consumer.path());
    plunk.add(consumer.path(), "widget", Some(source.path())).await.unwrap();

    write(source.path(), "package.json", r#"{"name": "widget", "version": "1.1.0"}"#);
    write(source.path(), "index.js", "module.exports = 2;");
    plunk.publisher().publish(source.path(), plunk_publish::PublishOptions::default()).await.unwrap();

    let statuses = plunk.status(consumer.path()).await.unwrap();
    let widget = statuses.iter().find(|s| s.link.version == "1.0.0").unwrap();
    assert!(!widget.up_to_date);

    plunk.update(consumer.path()).await.unwrap();
    let statuses = plunk.status(consumer.path()).await.unwrap();
    assert!(statuses.iter().any(|s| s.link.version == "1.1.0" && s.up_to_date));
}

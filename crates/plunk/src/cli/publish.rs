// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::{Path, PathBuf};

use clap::Args;

use crate::cli::{emit_json, init::resolve_dir, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Source directory to publish. Defaults to the current directory.
    pub dir: Option<PathBuf>,
    /// Publish even if `private: true` is set in package.json.
    #[arg(long)]
    pub private: bool,
    /// Skip `preplunk`/`postplunk` lifecycle scripts.
    #[arg(long = "no-scripts")]
    pub no_scripts: bool,
    /// Publish every package found under `dir`, not just `dir` itself.
    #[arg(long)]
    pub recursive: bool,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let options = plunk_publish::PublishOptions { allow_private: command.private, run_scripts: !command.no_scripts, force: false };

    let targets = if command.recursive { discover_packages(&dir) } else { vec![dir] };

    let mut results = Vec::new();
    for target in targets {
        let result = plunk.publisher().publish(&target, options).await?;

        if !global.json {
            if result.skipped {
                println!("{}@{} unchanged, skipped", result.name, result.version);
            } else {
                println!("published {}@{} ({} files, {})", result.name, result.version, result.file_count, result.build_id);
            }
        }

        results.push(serde_json::json!({
            "name": result.name,
            "version": result.version,
            "fileCount": result.file_count,
            "skipped": result.skipped,
            "contentHash": result.content_hash,
            "buildId": result.build_id,
        }));
    }

    let payload = if command.recursive { serde_json::Value::Array(results) } else { results.into_iter().next().unwrap_or(serde_json::Value::Null) };
    emit_json(global, payload)
}

/// Every directory at or below `root` containing a `package.json`,
/// skipping `node_modules`, version-control directories, and anything
/// hidden.
fn discover_packages(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, &mut found);
    found
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    if dir.join("package.json").is_file() {
        found.push(dir.to_path_buf());
    }

    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else { continue };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }
        walk(&entry.path(), found);
    }
}

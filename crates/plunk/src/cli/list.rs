// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::Args;

use crate::cli::{emit_json, init::resolve_dir, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Consumer directory. Defaults to the current directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let links = plunk.list(&dir).await;

    if !global.json {
        if links.is_empty() {
            println!("no packages linked in {}", dir.display());
        }
        for (name, link) in &links {
            println!("{name}@{} via {}", link.version, link.package_manager);
        }
    }

    let json_links: serde_json::Map<String, serde_json::Value> = links
        .iter()
        .map(|(name, link)| {
            (
                name.clone(),
                serde_json::json!({
                    "version": link.version,
                    "contentHash": link.content_hash,
                    "linkedAt": link.linked_at.to_rfc3339(),
                    "sourcePath": link.source_path,
                    "packageManager": link.package_manager,
                    "buildId": link.build_id,
                }),
            )
        })
        .collect();
    emit_json(global, serde_json::Value::Object(json_links))
}

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
    let statuses = plunk.status(&dir).await?;

    if !global.json {
        if statuses.is_empty() {
            println!("no packages linked in {}", dir.display());
        }
        for status in &statuses {
            let state = if !status.store_entry_exists {
                "missing from store"
            } else if status.up_to_date {
                "up to date"
            } else {
                "stale"
            };
            println!("{}@{} — {state}", status.name, status.link.version);
        }
    }

    let entries: Vec<serde_json::Value> = statuses
        .iter()
        .map(|status| {
            serde_json::json!({
                "name": status.name,
                "version": status.link.version,
                "storeEntryExists": status.store_entry_exists,
                "upToDate": status.up_to_date,
            })
        })
        .collect();
    emit_json(global, serde_json::Value::Array(entries))
}

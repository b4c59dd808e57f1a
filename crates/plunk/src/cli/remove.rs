// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::Args;

use crate::cli::{emit_json, init::resolve_dir, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Name of the package to unlink. Omit with `--all`.
    pub name: Option<String>,
    /// Consumer directory. Defaults to the current directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Unlink every package linked into this consumer.
    #[arg(long)]
    pub all: bool,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let report = plunk.remove(&dir, command.name.as_deref(), command.all).await?;

    if !global.json {
        for name in &report.removed {
            let restored = if report.restored.contains(name) { " (restored registry backup)" } else { "" };
            println!("removed {name}{restored}");
        }
    }

    emit_json(global, serde_json::json!({ "removed": report.removed, "restored": report.restored }))
}

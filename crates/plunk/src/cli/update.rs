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
    let report = plunk.update(&dir).await?;

    if !global.json {
        for name in &report.restored {
            println!("updated {name} to the latest store version");
        }
        for name in &report.missing {
            eprintln!("{name} is linked but no longer in the store");
        }
    }

    emit_json(global, serde_json::json!({ "updated": report.restored, "missing": report.missing }))
}

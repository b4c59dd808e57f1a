// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::Args;

use crate::cli::{emit_json, init::resolve_dir, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Name of the package to link, as published to the store.
    pub name: String,
    /// Consumer directory to link into. Defaults to the current directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Publish this source directory before linking it.
    #[arg(long)]
    pub from: Option<PathBuf>,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let report = plunk.add(&dir, &command.name, command.from.as_deref()).await?;

    if !global.json {
        println!("linked {}@{} ({} files copied)", report.name, report.version, report.copied);
        for bin in &report.bin_links {
            println!("  bin: {bin}");
        }
    }

    emit_json(
        global,
        serde_json::json!({
            "name": report.name,
            "version": report.version,
            "copied": report.copied,
            "binLinks": report.bin_links,
        }),
    )
}

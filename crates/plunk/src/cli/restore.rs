// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;

use crate::cli::{emit_json, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Suppress the per-package restored/missing lines.
    #[arg(long)]
    pub silent: bool,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = std::env::current_dir().map_err(Error::CurrentDir)?;
    let report = plunk.restore(&dir).await?;

    if !global.json && !command.silent {
        for name in &report.restored {
            println!("restored {name}");
        }
        for name in &report.missing {
            eprintln!("{name} is linked but no longer in the store");
        }
    }

    emit_json(global, serde_json::json!({ "restored": report.restored, "missing": report.missing }))
}

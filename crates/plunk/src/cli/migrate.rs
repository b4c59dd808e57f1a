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
    /// Delete detected yalc artifacts (`.yalc/`, `yalc.lock`).
    #[arg(long)]
    pub remove: bool,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let report = plunk.migrate(&dir, command.remove).await?;

    if !global.json {
        if report.yalc_dir_found || report.yalc_lock_found {
            println!("found yalc artifacts{}", if report.removed { ", removed" } else { "" });
        }
        for name in &report.linked_packages {
            println!("{name} appears to be linked via npm/yarn link; run `{name} unlink` in its dependency manager and re-link with `plunk add {name}`");
        }
        if !report.yalc_dir_found && !report.yalc_lock_found && report.linked_packages.is_empty() {
            println!("no yalc or npm/yarn-link artifacts found");
        }
    }

    emit_json(
        global,
        serde_json::json!({
            "yalcDirFound": report.yalc_dir_found,
            "yalcLockFound": report.yalc_lock_found,
            "linkedPackages": report.linked_packages,
            "removed": report.removed,
        }),
    )
}

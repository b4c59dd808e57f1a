// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;

use crate::cli::{emit_json, Error, Global};

#[derive(Debug, Args)]
pub struct Command {}

pub async fn handle(_command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let report = plunk.clean().await?;

    if !global.json {
        println!(
            "removed {} stale consumer(s), {} empty package registration(s), {} unreferenced store entr{}, {} orphaned temp dir(s)",
            report.removed_consumers,
            report.removed_packages,
            report.removed_entries,
            if report.removed_entries == 1 { "y" } else { "ies" },
            report.removed_temp_dirs,
        );
    }

    emit_json(
        global,
        serde_json::json!({
            "removedConsumers": report.removed_consumers,
            "removedPackages": report.removed_packages,
            "removedEntries": report.removed_entries,
            "removedTempDirs": report.removed_temp_dirs,
        }),
    )
}

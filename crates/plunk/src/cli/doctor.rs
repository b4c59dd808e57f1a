// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;

use crate::cli::{emit_json, Error, Global};

#[derive(Debug, Args)]
pub struct Command {}

pub async fn handle(_command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let report = plunk.doctor().await?;

    if !global.json {
        println!("checked {} store entries", report.store_entries_checked);
        if report.issues.is_empty() {
            println!("no issues found");
        } else {
            for issue in &report.issues {
                println!("  - {issue}");
            }
        }
    }

    emit_json(global, serde_json::json!({ "storeEntriesChecked": report.store_entries_checked, "issues": report.issues }))
}

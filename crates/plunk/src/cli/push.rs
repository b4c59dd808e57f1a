// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::Args;

use crate::cli::{emit_json, init::resolve_dir, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Source directory to publish and push. Defaults to the current directory.
    pub dir: Option<PathBuf>,
    /// Keep running, pushing again on every source change.
    #[arg(long)]
    pub watch: bool,
    /// Shell command run to completion before each push in watch mode.
    /// Defaults to the manifest's `scripts.build`, if any.
    #[arg(long)]
    pub build: Option<String>,
    /// Never run a build command, even if the manifest declares one.
    #[arg(long)]
    pub skip_build: bool,
    /// Milliseconds to wait for further changes before acting, in watch mode.
    #[arg(long, default_value_t = 100)]
    pub debounce: u64,
    /// Minimum milliseconds between two pushes, in watch mode.
    #[arg(long, default_value_t = 500)]
    pub cooldown: u64,
    /// Skip `preplunk`/`postplunk` lifecycle scripts.
    #[arg(long = "no-scripts")]
    pub no_scripts: bool,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let run_scripts = !command.no_scripts;

    if command.watch {
        let targets = plunk_push::watch::resolve_watch_targets(&dir, None);

        println!("watching {} path(s) under {}", targets.len(), dir.display());
        for target in &targets {
            println!("  {}", target.display());
        }

        let build_command = if command.skip_build { None } else { plunk_push::watch::resolve_build_command(&dir, command.build) };

        let options = plunk_push::watch::WatchOptions {
            debounce: std::time::Duration::from_millis(command.debounce),
            cooldown: std::time::Duration::from_millis(command.cooldown),
            build_command,
            run_scripts,
        };

        plunk_push::watch::watch(&dir, plunk.push_engine(), &targets, options).await?;
        return Ok(());
    }

    let options = plunk_push::PushOptions { run_scripts, force: false };
    let report = plunk.push_engine().do_push(&dir, options).await?;

    if !global.json {
        if report.skipped {
            println!("{}@{} unchanged, skipped", report.name, report.version);
        } else {
            println!(
                "pushed {}@{} to {} consumer(s) ({} failed, {} files changed)",
                report.name, report.version, report.pushed, report.failed, report.files_changed
            );
            for failure in &report.failures {
                eprintln!("  {}: {}", failure.consumer_dir.display(), failure.message);
            }
        }
    }

    emit_json(
        global,
        serde_json::json!({
            "name": report.name,
            "version": report.version,
            "skipped": report.skipped,
            "pushed": report.pushed,
            "failed": report.failed,
            "filesChanged": report.files_changed,
            "filesUnchanged": report.files_unchanged,
            "elapsedMs": report.elapsed.as_millis(),
        }),
    )
}

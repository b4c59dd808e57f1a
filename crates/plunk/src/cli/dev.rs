// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::Args;

use crate::cli::{init::resolve_dir, Error, Global};

#[derive(Debug, Args)]
pub struct Command {
    /// Source directory to watch. Defaults to the current directory.
    pub dir: Option<PathBuf>,
    /// Explicit glob-free paths (relative to `dir`) to watch, overriding the
    /// source-directory/manifest-files fallback chain.
    #[arg(long = "watch")]
    pub watch_patterns: Vec<String>,
    /// Shell command run to completion before each push. Defaults to
    /// the manifest's `scripts.build`, if any.
    #[arg(long)]
    pub build: Option<String>,
    /// Never run a build command, even if the manifest declares one.
    #[arg(long)]
    pub skip_build: bool,
    /// Milliseconds to wait for further changes before acting.
    #[arg(long, default_value_t = 100)]
    pub debounce: u64,
    /// Skip `preplunk`/`postplunk` lifecycle scripts on every push.
    #[arg(long = "no-scripts")]
    pub no_scripts: bool,
}

pub async fn handle(command: Command, _global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;
    let patterns = (!command.watch_patterns.is_empty()).then_some(command.watch_patterns.as_slice());
    let targets = plunk_push::watch::resolve_watch_targets(&dir, patterns);

    println!("watching {} path(s) under {}", targets.len(), dir.display());
    for target in &targets {
        println!("  {}", target.display());
    }

    let build_command = if command.skip_build { None } else { plunk_push::watch::resolve_build_command(&dir, command.build) };

    let options = plunk_push::watch::WatchOptions {
        debounce: std::time::Duration::from_millis(command.debounce),
        cooldown: plunk_push::watch::WatchOptions::default().cooldown,
        build_command,
        run_scripts: !command.no_scripts,
    };

    plunk_push::watch::watch(&dir, plunk.push_engine(), &targets, options).await?;
    Ok(())
}

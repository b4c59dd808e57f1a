// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Args, Parser};
use thiserror::Error;

mod add;
mod clean;
mod dev;
mod doctor;
mod init;
mod list;
mod migrate;
mod publish;
mod push;
mod remove;
mod restore;
mod status;
mod update;

#[derive(Debug, Parser)]
#[command(name = "plunk", about = "Local package development without npm link/yalc")]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Args, Clone, Copy)]
pub struct Global {
    /// Enable debug-level logging.
    #[arg(long, global = true)]
    pub verbose: bool,
    /// Report what would happen without touching the filesystem.
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Print one JSON object per command instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    Init(init::Command),
    Publish(publish::Command),
    Add(add::Command),
    Remove(remove::Command),
    Push(push::Command),
    Dev(dev::Command),
    Restore(restore::Command),
    List(list::Command),
    Status(status::Command),
    Update(update::Command),
    #[command(alias = "gc")]
    Clean(clean::Command),
    Doctor(doctor::Command),
    Migrate(migrate::Command),
}

pub async fn process(command: Command) -> Result<(), Error> {
    let Command { global, subcommand } = command;

    let home = plunk_paths::Home::resolve()?;
    let plunk = plunk_core::Plunk::new(home, global.dry_run);

    match subcommand {
        Subcommand::Init(command) => init::handle(command, global, &plunk).await?,
        Subcommand::Publish(command) => publish::handle(command, global, &plunk).await?,
        Subcommand::Add(command) => add::handle(command, global, &plunk).await?,
        Subcommand::Remove(command) => remove::handle(command, global, &plunk).await?,
        Subcommand::Push(command) => push::handle(command, global, &plunk).await?,
        Subcommand::Dev(command) => dev::handle(command, global, &plunk).await?,
        Subcommand::Restore(command) => restore::handle(command, global, &plunk).await?,
        Subcommand::List(command) => list::handle(command, global, &plunk).await?,
        Subcommand::Status(command) => status::handle(command, global, &plunk).await?,
        Subcommand::Update(command) => update::handle(command, global, &plunk).await?,
        Subcommand::Clean(command) => clean::handle(command, global, &plunk).await?,
        Subcommand::Doctor(command) => doctor::handle(command, global, &plunk).await?,
        Subcommand::Migrate(command) => migrate::handle(command, global, &plunk).await?,
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Paths(#[from] plunk_paths::Error),
    #[error(transparent)]
    Core(#[from] plunk_core::Error),
    #[error(transparent)]
    Publish(#[from] plunk_publish::Error),
    #[error(transparent)]
    Push(#[from] plunk_push::Error),
    #[error(transparent)]
    Watch(#[from] plunk_push::watch::Error),
    #[error("determine current directory")]
    CurrentDir(#[source] std::io::Error),
    #[error("read confirmation")]
    Confirm(#[source] std::io::Error),
    #[error("serialize JSON output")]
    Json(#[source] serde_json::Error),
}

impl Error {
    /// One suggestion drawn from a closed table, keyed off the
    /// deepest recognizable cause in the error chain.
    pub fn suggestion(&self) -> Option<&'static str> {
        if matches!(self, Error::Core(plunk_core::Error::NotFoundInStore(_))) {
            return Some("publish the package first with `plunk publish`");
        }
        if matches!(self, Error::Core(plunk_core::Error::PackageNotLinked(_))) {
            return Some("link it first with `plunk add <pkg>`");
        }
        if matches!(self, Error::Core(plunk_core::Error::PackageManager(_))) {
            return Some("this consumer uses Yarn plug-and-play, which plunk cannot inject into; switch nodeLinker to node-modules or pnpm");
        }
        if let Some(io_err) = find_source::<std::io::Error>(self) {
            if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                return Some("check file ownership and permissions under the store or consumer directory");
            }
            if io_err.to_string().to_lowercase().contains("busy") {
                return Some("stop any running dev server using this dependency and try again");
            }
        }
        None
    }
}

fn find_source<'a, T: std::error::Error + 'static>(error: &'a Error) -> Option<&'a T> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        current = err.source();
    }
    None
}

/// Print `value` as pretty JSON when `--json` was passed.
pub(crate) fn emit_json(global: Global, value: serde_json::Value) -> Result<(), Error> {
    if global.json {
        serde_json::to_writer_pretty(std::io::stdout(), &value).map_err(Error::Json)?;
        println!();
    }
    Ok(())
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::cli::{emit_json, Error, Global};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Role {
    Consumer,
    Library,
}

impl From<Role> for plunk_core::Role {
    fn from(role: Role) -> Self {
        match role {
            Role::Consumer => plunk_core::Role::Consumer,
            Role::Library => plunk_core::Role::Library,
        }
    }
}

#[derive(Debug, Args)]
pub struct Command {
    /// Directory to initialize. Defaults to the current directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// What this project is to plunk: a publish target, or a consumer of linked packages.
    #[arg(long, value_enum, default_value_t = Role::Consumer)]
    pub role: Role,
    /// Skip the confirmation prompt.
    #[arg(long)]
    pub yes: bool,
}

pub async fn handle(command: Command, global: Global, plunk: &plunk_core::Plunk) -> Result<(), Error> {
    let dir = resolve_dir(command.dir)?;

    if !command.yes && !global.json {
        let role_name = command.role.to_possible_value().unwrap().get_name().to_string();
        let question = format!("Initialize {} as a {role_name}?", dir.display());
        if !plunk_tui::ask_yes_no(&question, true).map_err(Error::Confirm)? {
            return Ok(());
        }
    }

    let report = plunk.init(&dir, command.role.into()).await?;

    if !global.json {
        println!("initialized {} as a {} ({})", dir.display(), report.role.as_str(), report.package_manager);
        if report.gitignore_updated {
            println!("added .plunk/ to .gitignore");
        }
        if report.scripts_added {
            println!("added plunk scripts to package.json");
        }
    }

    emit_json(
        global,
        serde_json::json!({
            "packageManager": report.package_manager,
            "role": report.role.as_str(),
            "gitignoreUpdated": report.gitignore_updated,
            "scriptsAdded": report.scripts_added,
        }),
    )
}

pub(crate) fn resolve_dir(dir: Option<PathBuf>) -> Result<PathBuf, Error> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().map_err(Error::CurrentDir),
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::error::Error;

use clap::Parser;
use plunk_tui::Stylize;

mod cli;

#[tokio::main]
async fn main() {
    let command = cli::Command::parse();

    let default_level = if command.global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Err(error) = cli::process(command).await {
        report_error(error);
        std::process::exit(1);
    }
}

fn report_error(error: cli::Error) {
    let sources = sources(&error);
    let message = sources.join(": ");
    eprintln!("{}: {message}", "Error".red());
    if let Some(suggestion) = error.suggestion() {
        eprintln!("{} {suggestion}", "Hint:".dim());
    }
}

fn sources(error: &cli::Error) -> Vec<String> {
    let mut sources = vec![error.to_string()];
    let mut source = error.source();
    while let Some(error) = source.take() {
        sources.push(error.to_string());
        source = error.source();
    }
    sources
}

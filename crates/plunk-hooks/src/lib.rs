// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Subprocess execution for lifecycle scripts (`preplunk`/`postplunk`)
//! and the watch-mode build command. Both inherit stdio and run under a
//! hard timeout, killing the process on expiry.

use std::{env, path::Path, time::Duration};

use thiserror::Error;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("spawn {0:?}")]
    Spawn(String, #[source] std::io::Error),
    #[error("wait for {0:?}")]
    Wait(String, #[source] std::io::Error),
    #[error("{0:?} exited with {1:?}")]
    Failed(String, Option<i32>),
    #[error("{0:?} exceeded its {1:?} timeout")]
    Timeout(String, Duration),
}

/// `PLUNK_HOOK_TIMEOUT` overrides the hook subprocess timeout, in
/// milliseconds; defaults to 60s.
pub fn default_timeout() -> Duration {
    env::var("PLUNK_HOOK_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS))
}

fn shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// Run `command` in `cwd` with inherited stdio, killing it if `timeout`
/// elapses first.
pub async fn run_script(command: &str, cwd: &Path, timeout: Duration) -> Result<(), Error> {
    let (program, flag) = shell();

    let mut child = tokio::process::Command::new(program)
        .arg(flag)
        .arg(command)
        .current_dir(cwd)
        .spawn()
        .map_err(|e| Error::Spawn(command.to_string(), e))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(Error::Failed(command.to_string(), status.code())),
        Ok(Err(e)) => Err(Error::Wait(command.to_string(), e)),
        Err(_) => {
            log::warn!("{command:?} exceeded {timeout:?}, killing");
            let _ = child.kill().await;
            Err(Error::Timeout(command.to_string(), timeout))
        }
    }
}

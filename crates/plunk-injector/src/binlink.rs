// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Create and remove cross-platform executable entry points under
//! `<consumer>/<deps>/.bin/`, pointing at the files an injected
//! manifest's `bin` field declares.

use std::path::{Path, PathBuf};

use crate::Error;

/// Create a shim for every entry in the manifest's executables map.
/// Returns the names of the shims created.
pub fn create_bin_shims(consumer: &plunk_paths::Consumer, deps_dir: &str, manifest: &plunk_manifest::Manifest, target_dir: &Path) -> Result<Vec<String>, Error> {
    let bin = manifest.bin();
    if bin.entries.is_empty() {
        return Ok(Vec::new());
    }

    let bin_dir = consumer.bin_dir(deps_dir);
    fs_err::create_dir_all(&bin_dir).map_err(|e| Error::BinShim(bin_dir.clone(), e))?;

    let mut created = Vec::new();
    for (name, relative_path) in &bin.entries {
        let script_path = target_dir.join(relative_path);
        let shim_path = bin_dir.join(name);
        create_one_shim(&shim_path, &script_path)?;
        created.push(name.clone());
    }
    Ok(created)
}

/// Remove both shim shapes (symlink/wrapper and `.cmd`/companion) for
/// every entry in the manifest's executables map.
pub fn remove_bin_shims(consumer: &plunk_paths::Consumer, deps_dir: &str, manifest: &plunk_manifest::Manifest) -> Result<(), Error> {
    let bin_dir = consumer.bin_dir(deps_dir);
    for name in manifest.bin().entries.keys() {
        for candidate in [bin_dir.join(name), bin_dir.join(format!("{name}.cmd"))] {
            if candidate.exists() || candidate.is_symlink() {
                let _ = fs_err::remove_file(&candidate);
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_one_shim(shim_path: &Path, script_path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let _ = fs_err::remove_file(shim_path);

    let relative = relative_from(shim_path.parent().unwrap_or(shim_path), script_path);

    match std::os::unix::fs::symlink(&relative, shim_path) {
        Ok(()) => {
            let mut perms = fs_err::metadata(script_path).map_err(|e| Error::BinShim(script_path.to_path_buf(), e))?.permissions();
            perms.set_mode(0o755);
            fs_err::set_permissions(script_path, perms).map_err(|e| Error::BinShim(script_path.to_path_buf(), e))?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            let wrapper = format!("#!/bin/sh\nexec node \"{}\" \"$@\"\n", relative.display());
            fs_err::write(shim_path, wrapper).map_err(|e| Error::BinShim(shim_path.to_path_buf(), e))?;
            let mut perms = fs_err::metadata(shim_path).map_err(|e| Error::BinShim(shim_path.to_path_buf(), e))?.permissions();
            perms.set_mode(0o755);
            fs_err::set_permissions(shim_path, perms).map_err(|e| Error::BinShim(shim_path.to_path_buf(), e))?;
            Ok(())
        }
        Err(e) => Err(Error::BinShim(shim_path.to_path_buf(), e)),
    }
}

#[cfg(windows)]
fn create_one_shim(shim_path: &Path, script_path: &Path) -> Result<(), Error> {
    let cmd_path = shim_path.with_extension("cmd");
    let cmd_body = format!("@node \"{}\" %*\r\n", script_path.display());
    fs_err::write(&cmd_path, cmd_body).map_err(|e| Error::BinShim(cmd_path.clone(), e))?;

    let posix_body = format!("#!/bin/sh\nexec node \"{}\" \"$@\"\n", script_path.display());
    fs_err::write(shim_path, posix_body).map_err(|e| Error::BinShim(shim_path.to_path_buf(), e))?;
    Ok(())
}

/// A relative path from `from_dir` to `target`, used so a shim symlink
/// keeps working if the consumer project is relocated as a whole.
fn relative_from(from_dir: &Path, target: &Path) -> PathBuf {
    let from_components: Vec<_> = from_dir.components().collect();
    let target_components: Vec<_> = target.components().collect();

    let common = from_components.iter().zip(target_components.iter()).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in common..from_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component);
    }
    relative
}

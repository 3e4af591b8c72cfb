// snapback is a rotating hard-link snapshot backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Ring rotation and hard-link cloning of snapshot slots.
//!
//! A ring is a set of sibling directories `name.0 .. name.{K-1}` under one
//! backup prefix; slot 0 is the newest. Rotation ages the ring by dropping
//! the oldest slot and shifting the rest up by one. The hourly ring keeps
//! slot 0 in place (the sync overwrites it afterwards); the promotion rings
//! rotate slot 0 too, making room for a fresh clone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::exec::{CommandRunner, ToolCommand, require_success};

/// The local file tools used to age and clone slots, as configured.
#[derive(Debug, Clone)]
pub struct Tools {
    pub cp: ToolCommand,
    pub mv: ToolCommand,
    pub rm: ToolCommand,
}

/// Path of slot `idx` of the `dir_name` ring under `prefix`.
pub fn slot_path(prefix: &Path, dir_name: &str, idx: u64) -> PathBuf {
    prefix.join(format!("{dir_name}.{idx}"))
}

/// Ages the `dir_name` ring under `prefix`.
///
/// The oldest slot (`max - 1`) is removed recursively, then every present
/// slot from `max - 2` downward is renamed one position up. With
/// `rotate_all` false slot 0 stays in place; with it true slot 0 is shifted
/// as well. A ring of one slot without `rotate_all` has nothing to age.
/// Missing slots are skipped, so a partially filled ring stays contiguous.
pub fn rotate_ring(
    runner: &dyn CommandRunner,
    tools: &Tools,
    prefix: &Path,
    dir_name: &str,
    max: u64,
    rotate_all: bool,
) -> Result<()> {
    if max == 0 || (max == 1 && !rotate_all) {
        return Ok(());
    }

    let oldest = slot_path(prefix, dir_name, max - 1);
    if oldest.exists() {
        let args = vec!["-rf".to_string(), oldest.display().to_string()];
        let out = tools
            .rm
            .invoke(runner, &args)
            .with_context(|| format!("removing {}", oldest.display()))?;
        require_success(&format!("removal of {}", oldest.display()), &out)?;
    }

    if max < 2 {
        return Ok(());
    }

    let smallest = if rotate_all { 0 } else { 1 };
    for idx in (smallest..=max - 2).rev() {
        let from = slot_path(prefix, dir_name, idx);
        if !from.exists() {
            continue;
        }
        let to = slot_path(prefix, dir_name, idx + 1);
        let args = vec![from.display().to_string(), to.display().to_string()];
        let out = tools
            .mv
            .invoke(runner, &args)
            .with_context(|| format!("renaming {}", from.display()))?;
        require_success(
            &format!("rename of {} to {}", from.display(), to.display()),
            &out,
        )?;
    }

    Ok(())
}

/// Clones a snapshot directory so that every regular file in the copy
/// shares an inode with the source (`cp -al`): directories are recreated,
/// file contents are hard-linked, symlinks stay symlinks.
pub fn clone_tree(
    runner: &dyn CommandRunner,
    tools: &Tools,
    src: &Path,
    dst: &Path,
) -> Result<()> {
    let args = vec![
        "-al".to_string(),
        src.display().to_string(),
        dst.display().to_string(),
    ];
    let out = tools
        .cp
        .invoke(runner, &args)
        .with_context(|| format!("cloning {}", src.display()))?;
    require_success(
        &format!("clone of {} to {}", src.display(), dst.display()),
        &out,
    )
}

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

//! Backup volume selection.
//!
//! A job either writes to a fixed `Destination` or spreads across a
//! `DestinationList`, picking the volume whose current hourly slot 0 is the
//! oldest. A volume that has never been used has no slot 0 and therefore
//! always wins.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::config::View;
use crate::utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationPolicy {
    Fixed(PathBuf),
    Lru(Vec<PathBuf>),
}

/// Resolves the destination policy for one job.
///
/// A non-empty `DestinationList` wins unless its first entry is the literal
/// `none` (case-insensitive), which turns the list off for an inner scope.
/// Without a usable list, `Destination` applies; having neither is an
/// error.
pub fn resolve_policy(view: &View) -> Result<DestinationPolicy> {
    let list = view.get_list("destinationlist");
    if !list.is_empty() && !list[0].eq_ignore_ascii_case("none") {
        return Ok(DestinationPolicy::Lru(
            list.into_iter().map(PathBuf::from).collect(),
        ));
    }

    match view.get("destination") {
        Some(dest) if !dest.is_empty() => Ok(DestinationPolicy::Fixed(PathBuf::from(dest))),
        _ => bail!("no destination configured"),
    }
}

/// The snapshot prefix for (host, directory) under a destination volume.
pub fn prefix_for(dest: &Path, host: &str, directory: &str) -> PathBuf {
    dest.join(host).join(directory.trim_matches('/'))
}

/// Picks the destination volume for a job.
///
/// Least-recently-used selection compares the mtime of each candidate's
/// `host/directory/<hourly>.0`; missing slots count as time zero. Ties keep
/// the earliest candidate in list order.
pub fn select(
    policy: &DestinationPolicy,
    host: &str,
    directory: &str,
    hourly_dir: &str,
) -> PathBuf {
    match policy {
        DestinationPolicy::Fixed(dest) => dest.clone(),
        DestinationPolicy::Lru(candidates) => {
            let mut best = candidates[0].clone();
            let mut best_mtime = slot0_mtime(&best, host, directory, hourly_dir);
            for candidate in &candidates[1..] {
                let mtime = slot0_mtime(candidate, host, directory, hourly_dir);
                if mtime < best_mtime {
                    best = candidate.clone();
                    best_mtime = mtime;
                }
            }
            best
        }
    }
}

fn slot0_mtime(dest: &Path, host: &str, directory: &str, hourly_dir: &str) -> u64 {
    let slot0 = prefix_for(dest, host, directory).join(format!("{hourly_dir}.0"));
    utils::mtime_epoch(&slot0)
}

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

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Local, TimeZone};

// --- Time ---

/// Converts a `SystemTime` into seconds since the Unix epoch, clamping
/// pre-epoch times to zero.
pub fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_epoch() -> u64 {
    epoch_secs(SystemTime::now())
}

/// Modification time of a path in epoch seconds. Missing or unstatable
/// paths count as time zero, so a never-used slot always looks oldest.
pub fn mtime_epoch(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(epoch_secs)
        .unwrap_or(0)
}

/// Interprets epoch seconds as a local timestamp.
pub fn local_from_epoch(secs: u64) -> DateTime<Local> {
    Local
        .timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(|| Local.timestamp_opt(0, 0).single().unwrap())
}

/// Formats a local timestamp as `YYYYMMDD`, the format used for billing
/// records and dated trigger folders.
pub fn yyyymmdd(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y%m%d").to_string()
}

pub fn pretty_print_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

// --- Host ---

/// Local hostname, used for report headers only.
pub fn my_hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

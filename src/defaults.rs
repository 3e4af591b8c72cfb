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

// -- Configuration --

/// Paths probed in order when no config file is given on the command line.
pub const CONFIG_SEARCH_PATHS: [&str; 4] = [
    "/etc/snapback2.conf",
    "/etc/snapback/snapback2.conf",
    "/etc/snapback.conf",
    "/etc/snapback/snapback.conf",
];

/// Directory where `NAME` positional arguments resolve to `NAME.conf`.
pub const NAMED_CONFIG_DIR: &str = "/etc/snapback";

// -- Logging --

pub const DEFAULT_LOG_FILE: &str = "/var/log/snapback";

// -- External tools --

pub const DEFAULT_RSYNC: &str = "rsync";
pub const DEFAULT_RSYNC_OPTS: &str = "-a --delete --delete-excluded --one-file-system -z -e ssh";
pub const DEFAULT_CP: &str = "/bin/cp";
pub const DEFAULT_MV: &str = "/bin/mv";
pub const DEFAULT_RM: &str = "/bin/rm";
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail -t -oi";

// -- Snapshot rings --

pub const DEFAULT_HOURLY_DIR: &str = "hourly";
pub const DEFAULT_DAILY_DIR: &str = "daily";
pub const DEFAULT_WEEKLY_DIR: &str = "weekly";
pub const DEFAULT_MONTHLY_DIR: &str = "monthly";

/// Floor applied on top of the hourlies-derived interval.
pub const DEFAULT_MUST_EXCEED_SECS: u64 = 5 * 60;

// -- Launch loop --

pub const DEFAULT_LOOP_DIR: &str = "/tmp/backups";
pub const DEFAULT_LOOP_DELAY_SECS: u64 = 2;
/// Engine program the launch loop runs for each trigger.
pub const DEFAULT_ENGINE: &str = "snapback";

pub const INPROCESS_SUFFIX: &str = ".inprocess";
pub const DONE_SUFFIX: &str = ".done";
pub const DONE_DIR: &str = "done";
pub const ERRORS_DIR: &str = "errors";

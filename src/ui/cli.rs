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

//! Terminal output for the engine and launch loop.
//!
//! Every line carries the same timestamp format as the error-log and
//! debug-file sinks, so a terminal run interleaved with `tail -f` on the
//! log files reads as one stream.

use chrono::Local;
use colored::Colorize;

use crate::utils;

/// Prints a timestamped warning to stderr.
pub fn log_warning(msg: &str) {
    eprintln!("{} {}: {msg}", stamp(), "Warning".bold().yellow());
}

/// Prints a timestamped error to stderr.
pub fn log_error(msg: &str) {
    eprintln!("{} {}: {msg}", stamp(), "Error".bold().red());
}

/// Prints a timestamped debug line to stderr; this is the terminal half of
/// the debug sink, used when no `DebugFile` is configured.
pub fn log_debug(msg: &str) {
    eprintln!("{} {}: {msg}", stamp(), "Debug".bold().cyan());
}

fn stamp() -> String {
    utils::pretty_print_timestamp(&Local::now())
}

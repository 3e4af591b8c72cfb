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
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use regex::Regex;

use crate::config::{Config, View};
use crate::exec::CommandRunner;
use crate::report::RunReport;
use crate::{defaults, ui, utils};

/// Options resolved from the command line.
#[derive(Debug, Default)]
pub struct RunOpts {
    pub force: bool,
    pub debug: bool,
    pub host_filter: Option<Regex>,
    pub dir_filter: Option<Regex>,
}

enum DebugSink {
    Stderr,
    File(File),
}

/// Everything one run needs, threaded explicitly through the engine and
/// launcher instead of living in process globals.
pub struct RunContext {
    pub config: Config,
    pub config_path: PathBuf,
    pub opts: RunOpts,
    pub runner: Arc<dyn CommandRunner>,
    pub report: RunReport,
    debug_enabled: bool,
    debug_sink: Mutex<DebugSink>,
    error_log: PathBuf,
}

impl RunContext {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        opts: RunOpts,
        runner: Arc<dyn CommandRunner>,
        report: RunReport,
    ) -> Result<RunContext> {
        let view = config.view();

        let debug_enabled = opts.debug || view.get_bool("debug", false);
        let debug_sink = match view.get("debugfile") {
            Some(path) if debug_enabled => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("cannot open debug file {path}"))?;
                DebugSink::File(file)
            }
            _ => DebugSink::Stderr,
        };

        let error_log = PathBuf::from(view.get_or("logfile", defaults::DEFAULT_LOG_FILE));

        Ok(RunContext {
            config,
            config_path,
            opts,
            runner,
            report,
            debug_enabled,
            debug_sink: Mutex::new(debug_sink),
            error_log,
        })
    }

    /// The global configuration view.
    pub fn view(&self) -> View<'_> {
        self.config.view()
    }

    pub fn error_log_path(&self) -> &Path {
        &self.error_log
    }

    /// Emits a debug line when debugging is enabled.
    pub fn debug(&self, msg: &str) {
        if !self.debug_enabled {
            return;
        }
        match &mut *self.debug_sink.lock() {
            DebugSink::Stderr => ui::cli::log_debug(msg),
            DebugSink::File(file) => {
                let stamp = utils::pretty_print_timestamp(&Local::now());
                let _ = writeln!(file, "{stamp} {msg}");
            }
        }
    }

    /// Records an error in the run transcript, appends it to the error log
    /// and shows it on the terminal. Flips the flag that forces end-of-run
    /// mail.
    pub fn log_error(&self, msg: &str) {
        ui::cli::log_error(msg);
        self.report.record_error(msg);

        // Best effort: a read-only log location must not take the run down.
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.error_log)
        {
            let stamp = utils::pretty_print_timestamp(&Local::now());
            let _ = writeln!(file, "{stamp} {msg}");
        }
    }
}

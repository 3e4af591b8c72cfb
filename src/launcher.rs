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

//! The companion launch loop.
//!
//! Dropping a file into the loop directory requests a backup: the filename
//! selects the configuration the engine runs with. The loop serializes
//! launches by atomically renaming each trigger to `<name>.inprocess`
//! before starting the engine, collecting the engine's output into that
//! file, and filing it under `done/YYYYMMDD/` or `errors/` when the child
//! exits. A crashed run leaves its `.inprocess` file behind; the loop never
//! picks those up again, so an operator can inspect and remove them.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;

use crate::context::RunContext;
use crate::exec::ToolCommand;
use crate::report::send_mail;
use crate::{defaults, utils};

#[derive(Parser, Debug, Default)]
#[clap(
    version = env!("CARGO_PKG_VERSION"),
    about = "Serializes snapback launches from a trigger directory"
)]
pub struct LoopArgs {
    /// Configuration file
    #[clap(short = 'c', long = "config", value_parser)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,
}

/// Polls the trigger directory forever.
pub fn run_loop(ctx: &RunContext) -> Result<()> {
    let delay = ctx
        .view()
        .get_duration_secs("loopdelay")?
        .unwrap_or(defaults::DEFAULT_LOOP_DELAY_SECS);

    loop {
        if let Err(e) = poll_once(ctx) {
            ctx.log_error(&format!("trigger poll failed: {e:#}"));
        }
        std::thread::sleep(Duration::from_secs(delay));
    }
}

/// One poll pass: processes every eligible trigger file, serially, in
/// name order. Returns how many triggers were picked up.
pub fn poll_once(ctx: &RunContext) -> Result<usize> {
    let loop_dir = PathBuf::from(ctx.view().get_or("loopdirectory", defaults::DEFAULT_LOOP_DIR));
    std::fs::create_dir_all(&loop_dir)
        .with_context(|| format!("cannot create {}", loop_dir.display()))?;

    let mut entries: Vec<_> = std::fs::read_dir(&loop_dir)
        .with_context(|| format!("cannot read {}", loop_dir.display()))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut launched = 0;
    for entry in entries {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(defaults::INPROCESS_SUFFIX) || name.ends_with(defaults::DONE_SUFFIX) {
            continue;
        }

        if !is_safe_trigger_name(&name) {
            quarantine_spurious(ctx, &loop_dir, &name, &entry.path());
            continue;
        }

        if let Err(e) = launch(ctx, &loop_dir, &name, &entry.path()) {
            ctx.log_error(&format!("trigger '{name}' failed: {e:#}"));
        }
        launched += 1;
    }

    Ok(launched)
}

/// Trigger names may only contain letters, digits, `_` and `-`; anything
/// else never reaches a command line.
fn is_safe_trigger_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Runs the engine for one trigger and files the outcome.
fn launch(ctx: &RunContext, loop_dir: &Path, name: &str, trigger: &Path) -> Result<()> {
    // The rename is the per-trigger mutex: once a trigger carries the
    // in-process suffix, no other poll pass will touch it.
    let inprocess = loop_dir.join(format!("{name}{}", defaults::INPROCESS_SUFFIX));
    std::fs::rename(trigger, &inprocess)
        .with_context(|| format!("cannot claim trigger {}", trigger.display()))?;

    let engine = ToolCommand::parse(&ctx.view().get_or("snapback", defaults::DEFAULT_ENGINE));
    let mut args = vec![
        "-c".to_string(),
        ctx.config_path.display().to_string(),
        "-l".to_string(),
        inprocess.display().to_string(),
        name.to_string(),
    ];
    if ctx.opts.debug {
        args.insert(0, "-d".to_string());
    }

    ctx.debug(&format!("launching {}", engine.render(&args)));
    let out = engine.invoke(ctx.runner.as_ref(), &args)?;
    append_to(&inprocess, &out.output)?;

    let stamp = utils::now_epoch();
    if out.success() {
        let done_dir = loop_dir
            .join(defaults::DONE_DIR)
            .join(utils::yyyymmdd(&Local::now()));
        std::fs::create_dir_all(&done_dir)
            .with_context(|| format!("cannot create {}", done_dir.display()))?;
        std::fs::rename(&inprocess, done_dir.join(format!("{name}.{stamp}")))
            .with_context(|| format!("cannot file {}", inprocess.display()))?;
    } else {
        let banner = format!(
            "\nsnapback exited with code {} (command: {})\n",
            out.code,
            engine.render(&args)
        );
        append_to(&inprocess, banner.as_bytes())?;

        let err_dir = loop_dir.join(defaults::ERRORS_DIR);
        std::fs::create_dir_all(&err_dir)
            .with_context(|| format!("cannot create {}", err_dir.display()))?;
        std::fs::rename(&inprocess, err_dir.join(format!("{name}.{stamp}")))
            .with_context(|| format!("cannot file {}", inprocess.display()))?;
    }

    Ok(())
}

/// A trigger whose name could not have come from a well-behaved client:
/// record it, tell the administrator, and delete it without ever passing
/// the name to a command line.
fn quarantine_spurious(ctx: &RunContext, loop_dir: &Path, name: &str, trigger: &Path) {
    let message = format!("spurious trigger file '{name}' in {}", loop_dir.display());
    ctx.log_error(&message);

    let err_dir = loop_dir.join(defaults::ERRORS_DIR);
    let stamp = utils::now_epoch();
    if std::fs::create_dir_all(&err_dir).is_ok() {
        let _ = std::fs::write(err_dir.join(format!("{name}.{stamp}")), &message);
    }

    let view = ctx.view();
    if let Some(admin) = view.get("adminemail") {
        let sendmail = ToolCommand::parse(&view.get_or("sendmail", defaults::DEFAULT_SENDMAIL));
        let subject = format!("snapback spurious trigger on {}", utils::my_hostname());
        if let Err(e) = send_mail(ctx.runner.as_ref(), &sendmail, admin, &subject, &message) {
            ctx.log_error(&format!("could not mail spurious-trigger report: {e:#}"));
        }
    }

    if let Err(e) = std::fs::remove_file(trigger) {
        ctx.log_error(&format!(
            "could not delete spurious trigger {}: {e}",
            trigger.display()
        ));
    }
}

fn append_to(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("cannot append to {}", path.display()))
}

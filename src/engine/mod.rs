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

//! The snapshot engine.
//!
//! One invocation walks every configured (host, directory) pair in
//! declaration order and, for each one that is due: selects a destination
//! volume, ages the hourly ring, clones the previous snapshot as hard
//! links, refreshes slot 0 through the external sync tool, stamps its
//! mtime, and promotes the result into the daily/weekly/monthly rings when
//! the calendar asks for it. A failing job is recorded and isolated; the
//! remaining jobs still run.

pub mod destination;
pub mod rotate;
pub mod schedule;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use regex::Regex;

use crate::config::{self, BlockKind, Config, View};
use crate::context::{RunContext, RunOpts};
use crate::exec::{SystemRunner, ToolCommand, require_success};
use crate::report::{self, RunReport};
use crate::{defaults, utils};

use rotate::Tools;

#[derive(Parser, Debug, Default)]
#[clap(
    version = env!("CARGO_PKG_VERSION"),
    about = "Rolling hard-link snapshot backups over rsync"
)]
pub struct EngineArgs {
    /// Configuration file
    #[clap(short = 'c', long = "config", value_parser)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,

    /// Run every backup now, bypassing the schedule gate
    #[clap(short = 'f', long = "force")]
    pub force: bool,

    /// Only back up hosts whose block name matches this regex
    #[clap(short = 'p', long = "host-pattern", value_parser)]
    pub host_pattern: Option<String>,

    /// Only back up directories whose path matches this regex
    #[clap(short = 'P', long = "dir-pattern", value_parser)]
    pub dir_pattern: Option<String>,

    /// Append the run transcript to this file instead of a temporary one
    #[clap(short = 'l', long = "run-log", value_parser)]
    pub run_log: Option<PathBuf>,

    /// Named configuration, resolved as /etc/snapback/<NAME>.conf
    #[clap(value_parser)]
    pub name: Option<String>,
}

/// Full engine run: load configuration, process all jobs, then settle
/// accounting and mail. Returns an error only for configuration-level
/// failures; per-job failures are recorded in the run report.
pub fn run_with_args(args: &EngineArgs) -> Result<()> {
    let config_path = config::find_config_file(args.config.as_deref(), args.name.as_deref())?;
    let cfg = Config::load(&config_path)?;

    let opts = RunOpts {
        force: args.force,
        debug: args.debug,
        host_filter: compile_filter(args.host_pattern.as_deref(), "host pattern")?,
        dir_filter: compile_filter(args.dir_pattern.as_deref(), "directory pattern")?,
    };

    let report = match &args.run_log {
        Some(path) => RunReport::to_file(path)?,
        None => RunReport::temporary()?,
    };

    let ctx = RunContext::new(cfg, config_path, opts, Arc::new(SystemRunner), report)?;
    run(&ctx)?;
    report::finish(&ctx);

    Ok(())
}

fn compile_filter(pattern: Option<&str>, what: &str) -> Result<Option<Regex>> {
    pattern
        .map(|p| Regex::new(p).with_context(|| format!("invalid {what} '{p}'")))
        .transpose()
}

/// Ring sizes per tier. Hourlies is at least 1; a zero disables a tier.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub hourlies: u64,
    pub dailies: u64,
    pub weeklies: u64,
    pub monthlies: u64,
}

/// Ring directory basenames, configurable per scope.
#[derive(Debug, Clone)]
pub struct TierNames {
    pub hourly: String,
    pub daily: String,
    pub weekly: String,
    pub monthly: String,
}

/// One (host, directory) backup, fully resolved from configuration.
#[derive(Debug, Clone)]
pub struct Job {
    /// Host block name; names the directory under the destination.
    pub host: String,
    /// Host actually contacted (the `BackupHost` override, if any).
    pub fqdn: String,
    pub directory: String,
    /// The sync source, `fqdn:directory` with a trailing slash unless
    /// `LiteralDirectory` is set.
    pub source: String,
    pub excludes: Vec<String>,
    pub retention: Retention,
    pub auto_time: bool,
    pub must_exceed_secs: u64,
    pub create_dir: bool,
    pub tiers: TierNames,
    pub rsync: ToolCommand,
    pub rsync_opts: Vec<String>,
    pub tools: Tools,
}

/// Validates the hourly ring size before any job I/O. A missing, malformed
/// or zero `Hourlies` is a configuration error that aborts the whole run.
pub fn resolve_hourlies(view: &View, host: &str, directory: &str) -> Result<u64> {
    let hourlies = view
        .get_uint("hourlies")
        .with_context(|| format!("for {host}:{directory}"))?
        .with_context(|| format!("Hourlies is not set for {host}:{directory}"))?;
    if hourlies < 1 {
        bail!("Hourlies must be at least 1 for {host}:{directory}");
    }
    Ok(hourlies)
}

/// Resolves a job from the configuration view of its innermost scope.
/// Failures here are job fatals: they abort this (host, directory) only.
pub fn resolve_job(view: &View, hourlies: u64, host: &str, directory: &str) -> Result<Job> {
    let retention = Retention {
        hourlies,
        dailies: view.get_uint("dailies")?.unwrap_or(0),
        weeklies: view.get_uint("weeklies")?.unwrap_or(0),
        monthlies: view.get_uint("monthlies")?.unwrap_or(0),
    };

    let fqdn = view.get_or("backuphost", host);
    let mut source_dir = directory.to_string();
    if !view.get_bool("literaldirectory", false) && !source_dir.ends_with('/') {
        source_dir.push('/');
    }

    let tiers = TierNames {
        hourly: view.get_or("hourlydir", defaults::DEFAULT_HOURLY_DIR),
        daily: view.get_or("dailydir", defaults::DEFAULT_DAILY_DIR),
        weekly: view.get_or("weeklydir", defaults::DEFAULT_WEEKLY_DIR),
        monthly: view.get_or("monthlydir", defaults::DEFAULT_MONTHLY_DIR),
    };

    let tools = Tools {
        cp: ToolCommand::parse(&view.get_or("cp", defaults::DEFAULT_CP)),
        mv: ToolCommand::parse(&view.get_or("mv", defaults::DEFAULT_MV)),
        rm: ToolCommand::parse(&view.get_or("rm", defaults::DEFAULT_RM)),
    };

    Ok(Job {
        host: host.to_string(),
        fqdn: fqdn.clone(),
        directory: directory.to_string(),
        source: format!("{fqdn}:{source_dir}"),
        excludes: view.get_list("exclude"),
        retention,
        auto_time: view.get_bool("autotime", true),
        must_exceed_secs: view
            .get_duration_secs("mustexceed")?
            .unwrap_or(defaults::DEFAULT_MUST_EXCEED_SECS),
        create_dir: view.get_bool("createdir", true),
        tiers,
        rsync: ToolCommand::parse(&view.get_or("rsync", defaults::DEFAULT_RSYNC)),
        rsync_opts: view
            .get_or("rsyncopts", defaults::DEFAULT_RSYNC_OPTS)
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        tools,
    })
}

/// Processes every configured job in declaration order.
pub fn run(ctx: &RunContext) -> Result<()> {
    let global = ctx.view();

    for block in ctx.config.backups() {
        if let Some(filter) = &ctx.opts.host_filter {
            if !filter.is_match(&block.name) {
                continue;
            }
        }

        let host_view = global.enter(block);
        for directory in host_view.get_list("directory") {
            process(ctx, &host_view, &block.name, &directory)?;
        }
        for sub in host_view.scope_blocks() {
            if sub.kind != BlockKind::BackupDirectory {
                continue;
            }
            let dir_view = host_view.enter(sub);
            process(ctx, &dir_view, &block.name, &sub.name)?;
        }
    }

    Ok(())
}

/// Resolves and runs one job, isolating its failures from the rest of the
/// run. Only the `Hourlies` validation propagates as a config fatal.
fn process(ctx: &RunContext, view: &View, host: &str, directory: &str) -> Result<()> {
    if let Some(filter) = &ctx.opts.dir_filter {
        if !filter.is_match(directory) {
            return Ok(());
        }
    }

    let hourlies = resolve_hourlies(view, host, directory)?;

    // A bad value in one scope must not take down the other jobs of the
    // run, so the rest of the resolution fails at the job level too.
    let result =
        resolve_job(view, hourlies, host, directory).and_then(|job| run_job(ctx, view, &job));
    if let Err(e) = result {
        ctx.log_error(&format!("backup of {host}:{directory} failed: {e:#}"));
    }

    Ok(())
}

fn run_job(ctx: &RunContext, view: &View, job: &Job) -> Result<()> {
    let policy = destination::resolve_policy(view)?;
    let dest = destination::select(&policy, &job.host, &job.directory, &job.tiers.hourly);
    let prefix = destination::prefix_for(&dest, &job.host, &job.directory);

    if prefix.exists() {
        if !prefix.is_dir() {
            bail!("{} exists but is not a directory", prefix.display());
        }
    } else if job.create_dir {
        std::fs::create_dir_all(&prefix)
            .with_context(|| format!("cannot create {}", prefix.display()))?;
    } else {
        bail!("{} does not exist and CreateDir is off", prefix.display());
    }

    let slot0 = rotate::slot_path(&prefix, &job.tiers.hourly, 0);
    let slot0_mtime = utils::mtime_epoch(&slot0);
    let now = Local::now();
    let flags = schedule::calendar_flags(slot0_mtime, &now);

    let gate = schedule::GateInput {
        hourlies: job.retention.hourlies,
        slot0_mtime,
        now: now.timestamp().max(0) as u64,
        must_exceed_secs: job.must_exceed_secs,
        force: ctx.opts.force,
        auto_time: job.auto_time,
    };
    if !schedule::is_due(&gate) {
        ctx.debug(&format!("{} is not due yet", job.source));
        return Ok(());
    }

    ctx.debug(&format!(
        "backing up {} into {}",
        job.source,
        prefix.display()
    ));

    let runner = ctx.runner.as_ref();

    rotate::rotate_ring(
        runner,
        &job.tools,
        &prefix,
        &job.tiers.hourly,
        job.retention.hourlies,
        false,
    )?;

    // The freshly vacated slot 1 receives a hard-link clone of slot 0, so
    // the sync below only pays for what changed. A one-slot ring has no
    // slot 1 to clone into.
    if job.retention.hourlies > 1 && slot0.exists() {
        let slot1 = rotate::slot_path(&prefix, &job.tiers.hourly, 1);
        rotate::clone_tree(runner, &job.tools, &slot0, &slot1)?;
    }

    ctx.report.client_marker(&job.fqdn);
    let mut sync_args = job.rsync_opts.clone();
    sync_args.extend(job.excludes.iter().map(|p| format!("--exclude={p}")));
    sync_args.push(job.source.clone());
    sync_args.push(slot0.display().to_string());

    let out = job.rsync.invoke(runner, &sync_args)?;
    ctx.report.append_raw(&out.output);
    require_success(&format!("sync of {}", job.source), &out)?;

    // Slot 0's mtime is the authoritative completion timestamp.
    filetime::set_file_mtime(&slot0, filetime::FileTime::now())
        .with_context(|| format!("cannot stamp {}", slot0.display()))?;

    let promotions = [
        (flags.dailies, job.retention.dailies, &job.tiers.daily),
        (flags.weeklies, job.retention.weeklies, &job.tiers.weekly),
        (flags.monthlies, job.retention.monthlies, &job.tiers.monthly),
    ];
    for (due, keep, tier) in promotions {
        if !due || keep == 0 {
            continue;
        }
        rotate::rotate_ring(runner, &job.tools, &prefix, tier, keep, true)?;
        if slot0.exists() {
            let target = rotate::slot_path(&prefix, tier, 0);
            rotate::clone_tree(runner, &job.tools, &slot0, &target)?;
        }
        ctx.debug(&format!("promoted {} into {tier}.0", slot0.display()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_from(config_text: &str) -> Result<Job> {
        let cfg = Config::parse(config_text).unwrap();
        let global = cfg.view();
        let block = cfg.backups().next().unwrap();
        let view = global.enter(block);
        let dirs = view.get_list("directory");
        let hourlies = resolve_hourlies(&view, &block.name, &dirs[0])?;
        resolve_job(&view, hourlies, &block.name, &dirs[0])
    }

    #[test]
    fn test_resolve_job_defaults() {
        let job = job_from(
            "Hourlies 4\n<Backup pluto.example.com>\nDirectory /home/mike\n</Backup>\n",
        )
        .unwrap();

        assert_eq!(job.host, "pluto.example.com");
        assert_eq!(job.fqdn, "pluto.example.com");
        assert_eq!(job.source, "pluto.example.com:/home/mike/");
        assert_eq!(job.retention.hourlies, 4);
        assert_eq!(job.retention.dailies, 0);
        assert!(job.auto_time);
        assert!(job.create_dir);
        assert_eq!(job.must_exceed_secs, 300);
        assert_eq!(job.tiers.hourly, "hourly");
        assert_eq!(job.rsync.program, "rsync");
        assert!(job.rsync_opts.contains(&"--delete".to_string()));
    }

    #[test]
    fn test_resolve_job_literal_directory() {
        let job = job_from(
            "Hourlies 2\nLiteralDirectory yes\n<Backup h>\nDirectory /home/mike\n</Backup>\n",
        )
        .unwrap();
        assert_eq!(job.source, "h:/home/mike");
    }

    #[test]
    fn test_resolve_job_backuphost_override() {
        let job = job_from(
            "Hourlies 2\n<Backup label>\nBackupHost real.example.com\nDirectory /srv\n</Backup>\n",
        )
        .unwrap();
        assert_eq!(job.host, "label");
        assert_eq!(job.fqdn, "real.example.com");
        assert_eq!(job.source, "real.example.com:/srv/");
    }

    #[test]
    fn test_resolve_job_requires_hourlies() {
        assert!(job_from("<Backup h>\nDirectory /srv\n</Backup>\n").is_err());
        assert!(job_from("Hourlies 0\n<Backup h>\nDirectory /srv\n</Backup>\n").is_err());
    }

    #[test]
    fn test_bad_tier_values_fail_after_hourlies() {
        // The hourly ring size is fine; the malformed duration surfaces
        // from the job-level resolution step instead.
        let cfg = Config::parse(
            "Hourlies 4\nMustExceed 5q\n<Backup h>\nDirectory /srv\n</Backup>\n",
        )
        .unwrap();
        let global = cfg.view();
        let block = cfg.backups().next().unwrap();
        let view = global.enter(block);

        assert_eq!(resolve_hourlies(&view, "h", "/srv").unwrap(), 4);
        assert!(resolve_job(&view, 4, "h", "/srv").is_err());

        let cfg = Config::parse(
            "Hourlies 4\nDailies lots\n<Backup h>\nDirectory /srv\n</Backup>\n",
        )
        .unwrap();
        let global = cfg.view();
        let block = cfg.backups().next().unwrap();
        let view = global.enter(block);
        assert!(resolve_job(&view, 4, "h", "/srv").is_err());
    }

    #[test]
    fn test_bad_filter_is_fatal() {
        assert!(compile_filter(Some("(unclosed"), "host pattern").is_err());
        assert!(compile_filter(Some("^good$"), "host pattern").unwrap().is_some());
        assert!(compile_filter(None, "host pattern").unwrap().is_none());
    }
}

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

//! Per-run transcript, byte accounting and mail submission.
//!
//! The engine streams the output of every sync child into one transcript
//! file, preceded by a `client <fqdn>` marker per job. After the run the
//! transcript is scanned for the sync tool's `wrote N bytes read M bytes`
//! summary lines; read bytes are billed to the current client and the full
//! transcript becomes the body of the admin mail.

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::Mutex;
use regex::Regex;
use tempfile::NamedTempFile;

use crate::context::RunContext;
use crate::exec::{CommandRunner, ToolCommand, require_success};
use crate::{defaults, ui, utils};

/// The run transcript plus the errors-seen flag that forces end-of-run mail.
pub struct RunReport {
    file: Mutex<File>,
    path: PathBuf,
    // Keeps a temporary transcript alive until the report is dropped.
    _temp: Option<NamedTempFile>,
    errors: AtomicBool,
}

impl RunReport {
    /// Appends to `path`, creating it if needed. Used when the launcher
    /// hands the engine an in-progress trigger file via `-l`.
    pub fn to_file(path: &Path) -> Result<RunReport> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open run log {}", path.display()))?;
        Ok(RunReport {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            _temp: None,
            errors: AtomicBool::new(false),
        })
    }

    /// A transcript in a temporary file, discarded when the run ends.
    pub fn temporary() -> Result<RunReport> {
        let temp = NamedTempFile::new().context("cannot create run log")?;
        let file = temp.reopen().context("cannot reopen run log")?;
        Ok(RunReport {
            file: Mutex::new(file),
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
            errors: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_line(&self, line: &str) {
        let mut file = self.file.lock();
        let _ = writeln!(file, "{line}");
    }

    pub fn append_raw(&self, bytes: &[u8]) {
        let mut file = self.file.lock();
        let _ = file.write_all(bytes);
    }

    /// Marks the start of one client's sync output in the transcript.
    pub fn client_marker(&self, fqdn: &str) {
        self.append_line(&format!("client {fqdn}"));
    }

    pub fn record_error(&self, msg: &str) {
        self.errors.store(true, Ordering::Relaxed);
        self.append_line(&format!("ERROR: {msg}"));
    }

    pub fn had_errors(&self) -> bool {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn body(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("cannot read run log {}", self.path.display()))
    }
}

/// Scans a transcript for per-client read-byte totals.
///
/// `client <fqdn>` lines switch the client being billed; every
/// `wrote N bytes read M bytes` line adds `M` to that client.
pub fn scan_charges(transcript: &str) -> BTreeMap<String, u64> {
    let bytes_re =
        Regex::new(r"wrote (\d+) bytes\s+read (\d+) bytes").expect("byte-count pattern is valid");

    let mut charges: BTreeMap<String, u64> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in transcript.lines() {
        if let Some(fqdn) = line.strip_prefix("client ") {
            current = Some(fqdn.trim().to_string());
            continue;
        }
        if let Some(caps) = bytes_re.captures(line) {
            let read: u64 = caps[2].parse().unwrap_or(0);
            if let Some(client) = &current {
                *charges.entry(client.clone()).or_default() += read;
            }
        }
    }

    charges
}

/// Appends `client:YYYYMMDD:bytes` records for every nonzero total.
pub fn append_charges(
    charge_file: &Path,
    charges: &BTreeMap<String, u64>,
    date: &str,
) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(charge_file)
        .with_context(|| format!("cannot open charge file {}", charge_file.display()))?;

    for (client, bytes) in charges {
        if *bytes == 0 {
            continue;
        }
        writeln!(file, "{client}:{date}:{bytes}")
            .with_context(|| format!("cannot append to {}", charge_file.display()))?;
    }

    Ok(())
}

/// Hands a message to the configured mail submission program on stdin.
pub fn send_mail(
    runner: &dyn CommandRunner,
    sendmail: &ToolCommand,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<()> {
    let from = format!("snapback@{}", utils::my_hostname());
    let message = format!("To: {to}\nFrom: {from}\nSubject: {subject}\n\n{body}");
    let out = runner.run_with_stdin(&sendmail.program, &sendmail.args, message.as_bytes())?;
    require_success("mail submission", &out)
}

/// End-of-run pass: bill byte counts and mail the transcript if required.
///
/// Nothing here is fatal; failures are logged and the run's exit status is
/// unaffected.
pub fn finish(ctx: &RunContext) {
    let view = ctx.view();

    let transcript = match ctx.report.body() {
        Ok(text) => text,
        Err(e) => {
            ctx.log_error(&format!("accounting skipped: {e:#}"));
            String::new()
        }
    };

    let charges = scan_charges(&transcript);
    if !charges.is_empty() {
        if let Some(charge_file) = view.get("chargefile") {
            let date = utils::yyyymmdd(&Local::now());
            if let Err(e) = append_charges(Path::new(charge_file), &charges, &date) {
                ctx.log_error(&format!("billing failed: {e:#}"));
            }
        }
    }

    let always = view.get_bool("alwaysemail", false);
    if !always && !ctx.report.had_errors() {
        return;
    }

    let Some(admin) = view.get("adminemail") else {
        if ctx.report.had_errors() {
            ui::cli::log_warning("errors were logged but no AdminEmail is configured");
        }
        return;
    };

    // Re-read so the body includes any error lines recorded above.
    let body = ctx.report.body().unwrap_or(transcript);
    let sendmail = ToolCommand::parse(&view.get_or("sendmail", defaults::DEFAULT_SENDMAIL));
    let subject = format!("snapback run report from {}", utils::my_hostname());
    if let Err(e) = send_mail(ctx.runner.as_ref(), &sendmail, admin, &subject, &body) {
        ctx.log_error(&format!("could not mail run report: {e:#}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_charges_attributes_read_bytes() {
        let transcript = "\
client alpha.example.com
building file list ... done
wrote 132 bytes  read 245 bytes  754.00 bytes/sec
client beta.example.com
wrote 10 bytes  read 7 bytes  34.00 bytes/sec
wrote 5 bytes  read 3 bytes  16.00 bytes/sec
";
        let charges = scan_charges(transcript);
        assert_eq!(charges.get("alpha.example.com"), Some(&245));
        assert_eq!(charges.get("beta.example.com"), Some(&10));
    }

    #[test]
    fn test_scan_charges_ignores_unattributed_lines() {
        let transcript = "wrote 1 bytes read 2 bytes\n";
        assert!(scan_charges(transcript).is_empty());
    }

    #[test]
    fn test_append_charges_skips_zero_totals() {
        let dir = tempfile::tempdir().unwrap();
        let charge_file = dir.path().join("charges");

        let mut charges = BTreeMap::new();
        charges.insert("quiet.example.com".to_string(), 0);
        charges.insert("busy.example.com".to_string(), 1234);
        append_charges(&charge_file, &charges, "20250301").unwrap();

        let content = std::fs::read_to_string(&charge_file).unwrap();
        assert_eq!(content, "busy.example.com:20250301:1234\n");
    }

    #[test]
    fn test_report_marks_errors() {
        let report = RunReport::temporary().unwrap();
        assert!(!report.had_errors());
        report.client_marker("alpha");
        report.record_error("sync blew up");
        assert!(report.had_errors());

        let body = report.body().unwrap();
        assert!(body.contains("client alpha"));
        assert!(body.contains("ERROR: sync blew up"));
    }
}

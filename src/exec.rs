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
    io::Write,
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};

/// Exit status and combined stdout/stderr of a finished external command.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    pub code: i32,
    pub output: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Last `max_lines` lines of the captured output, for error messages.
    pub fn tail(&self, max_lines: usize) -> String {
        let text = String::from_utf8_lossy(&self.output);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Abstraction over external process execution.
///
/// Every tool the engine orchestrates (the sync program, `cp`, `mv`, `rm`,
/// the mail submission program, the engine child spawned by the launch loop)
/// goes through this trait, so tests can substitute a recording fake.
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion and captures its exit code together
    /// with its combined stdout and stderr.
    fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput>;

    /// Like `run`, but feeds `input` to the child's stdin.
    fn run_with_stdin(&self, program: &str, args: &[String], input: &[u8]) -> Result<CmdOutput>;
}

/// The production runner: spawns real processes.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput> {
        let out = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to execute '{program}'"))?;

        Ok(combine(out))
    }

    fn run_with_stdin(&self, program: &str, args: &[String], input: &[u8]) -> Result<CmdOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute '{program}'"))?;

        child
            .stdin
            .take()
            .expect("child stdin was requested")
            .write_all(input)
            .with_context(|| format!("failed to write to stdin of '{program}'"))?;

        let out = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for '{program}'"))?;

        Ok(combine(out))
    }
}

fn combine(out: std::process::Output) -> CmdOutput {
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    CmdOutput {
        code: out.status.code().unwrap_or(1),
        output,
    }
}

/// A configured tool invocation: program plus its fixed leading arguments,
/// parsed from a whitespace-separated config value such as
/// `/usr/sbin/sendmail -t -oi`.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn parse(value: &str) -> Self {
        let mut words = value.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_default();
        Self {
            program,
            args: words.collect(),
        }
    }

    /// Runs the tool with `extra` appended to its fixed arguments.
    pub fn invoke(&self, runner: &dyn CommandRunner, extra: &[String]) -> Result<CmdOutput> {
        let mut args = self.args.clone();
        args.extend_from_slice(extra);
        runner.run(&self.program, &args)
    }

    /// The full command line, for error messages and failure banners.
    pub fn render(&self, extra: &[String]) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.extend(extra.iter().cloned());
        parts.join(" ")
    }
}

/// Fails with the command line, exit code and output tail when an external
/// tool did not exit cleanly.
pub fn require_success(what: &str, out: &CmdOutput) -> Result<()> {
    if out.success() {
        return Ok(());
    }
    bail!("{what} exited with code {}: {}", out.code, out.tail(5));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_command_parse() {
        let tool = ToolCommand::parse("/usr/sbin/sendmail -t -oi");
        assert_eq!(tool.program, "/usr/sbin/sendmail");
        assert_eq!(tool.args, vec!["-t", "-oi"]);

        let bare = ToolCommand::parse("rsync");
        assert_eq!(bare.program, "rsync");
        assert!(bare.args.is_empty());
    }

    #[test]
    fn test_system_runner_captures_output_and_code() {
        let runner = SystemRunner;
        let out = runner
            .run("/bin/sh", &["-c".into(), "echo out; echo err >&2".into()])
            .unwrap();
        assert!(out.success());
        let text = String::from_utf8_lossy(&out.output);
        assert!(text.contains("out"));
        assert!(text.contains("err"));

        let failed = runner
            .run("/bin/sh", &["-c".into(), "exit 3".into()])
            .unwrap();
        assert_eq!(failed.code, 3);
        assert!(require_success("test command", &failed).is_err());
    }

    #[test]
    fn test_system_runner_stdin() {
        let runner = SystemRunner;
        let out = runner
            .run_with_stdin("/bin/cat", &[], b"hello stdin")
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output, b"hello stdin");
    }

    #[test]
    fn test_output_tail() {
        let out = CmdOutput {
            code: 1,
            output: b"one\ntwo\nthree\n".to_vec(),
        };
        assert_eq!(out.tail(2), "two\nthree");
        assert_eq!(out.tail(10), "one\ntwo\nthree");
    }
}

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

//! Shared helpers for unit and integration tests.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use filetime::FileTime;
use parking_lot::Mutex;

use crate::exec::{CmdOutput, CommandRunner};
use crate::utils;

/// Writes a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))
}

/// Writes an executable shell script.
pub fn write_script(path: &Path, body: &str) -> Result<PathBuf> {
    write_file(path, body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(path.to_path_buf())
}

/// Rewinds a path's mtime by `secs_ago` seconds.
pub fn backdate(path: &Path, secs_ago: u64) {
    let then = utils::now_epoch().saturating_sub(secs_ago);
    filetime::set_file_mtime(path, FileTime::from_unix_time(then as i64, 0))
        .expect("backdating test path");
}

/// A stand-in sync tool: logs its arguments next to itself, creates the
/// destination (the last argument), writes a payload file only when one is
/// not already there, and prints an rsync-style byte summary.
pub fn fake_rsync(dir: &Path) -> Result<PathBuf> {
    let script = r#"#!/bin/sh
dest=""
for a in "$@"; do dest="$a"; done
printf '%s\n' "$*" >> "$(dirname "$0")/rsync.args"
mkdir -p "$dest"
if [ ! -f "$dest/data.txt" ]; then
    echo "payload" > "$dest/data.txt"
fi
echo "wrote 132 bytes  read 245 bytes  754.00 bytes/sec"
exit 0
"#;
    write_script(&dir.join("fake-rsync"), script)
}

/// A sync tool that always fails.
pub fn failing_rsync(dir: &Path) -> Result<PathBuf> {
    write_script(
        &dir.join("failing-rsync"),
        "#!/bin/sh\necho \"sync exploded\" >&2\nexit 23\n",
    )
}

/// A mail submission stand-in that captures the whole message.
pub fn fake_sendmail(dir: &Path) -> Result<PathBuf> {
    let script = r#"#!/bin/sh
cat > "$(dirname "$0")/mail.capture"
exit 0
"#;
    write_script(&dir.join("fake-sendmail"), script)
}

/// An engine stand-in for launcher tests: reports its arguments and exits
/// with the given code.
pub fn fake_engine(dir: &Path, exit_code: i32) -> Result<PathBuf> {
    let script = format!("#!/bin/sh\necho \"engine ran: $*\"\nexit {exit_code}\n");
    write_script(&dir.join(format!("fake-engine-{exit_code}")), &script)
}

/// A `CommandRunner` that records command lines and pretends success
/// without touching the filesystem.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().push(line);
        Ok(CmdOutput::default())
    }

    fn run_with_stdin(&self, program: &str, args: &[String], _input: &[u8]) -> Result<CmdOutput> {
        self.run(program, args)
    }
}

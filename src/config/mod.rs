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

//! Hierarchical configuration with inheritance.
//!
//! The file format is an Apache-style block syntax:
//!
//! ```text
//! Hourlies 4
//! Destination /mnt/backups
//!
//! <Backup www.example.com>
//!     Directory /home/alice
//!     <BackupDirectory /var/www>
//!         Hourlies 2
//!         Exclude *.tmp
//!     </BackupDirectory>
//! </Backup>
//! ```
//!
//! Keys are case-insensitive. A [`View`] resolves lookups against a chain of
//! nested scopes: the innermost scope that defines a key wins; keys repeated
//! within one scope accumulate (multi-directive).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::defaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Backup,
    BackupDirectory,
}

/// A named block and the scope of parameters it introduces.
#[derive(Debug)]
pub struct Block {
    pub kind: BlockKind,
    pub name: String,
    scope: Scope,
}

/// Ordered key/value pairs plus nested blocks, as written in one scope.
#[derive(Debug, Default)]
struct Scope {
    params: Vec<(String, String)>,
    blocks: Vec<Block>,
}

impl Scope {
    fn has_key(&self, key: &str) -> bool {
        self.params.iter().any(|(k, _)| k == key)
    }

    fn first(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed configuration tree.
#[derive(Debug)]
pub struct Config {
    root: Scope,
}

impl Config {
    pub fn parse(text: &str) -> Result<Config> {
        // Stack of open scopes; the bottom entry is the global scope.
        let mut stack: Vec<(Option<(BlockKind, String)>, Scope)> = vec![(None, Scope::default())];

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(tag) = line.strip_prefix('<') {
                let tag = tag
                    .strip_suffix('>')
                    .with_context(|| format!("line {lineno}: malformed tag '{line}'"))?
                    .trim();

                if let Some(closing) = tag.strip_prefix('/') {
                    let kind = parse_block_kind(closing.trim())
                        .with_context(|| format!("line {lineno}: bad closing tag"))?;
                    let (header, scope) = stack.pop().expect("scope stack is never empty");
                    let Some((open_kind, name)) = header else {
                        bail!("line {lineno}: closing tag without an open block");
                    };
                    if open_kind != kind {
                        bail!("line {lineno}: closing tag does not match open <{name}> block");
                    }
                    stack
                        .last_mut()
                        .expect("global scope remains on the stack")
                        .1
                        .blocks
                        .push(Block {
                            kind,
                            name,
                            scope,
                        });
                } else {
                    let (kw, name) = tag
                        .split_once(char::is_whitespace)
                        .with_context(|| format!("line {lineno}: block tag requires a name"))?;
                    let kind = parse_block_kind(kw)
                        .with_context(|| format!("line {lineno}: unknown block type '{kw}'"))?;
                    stack.push((Some((kind, name.trim().to_string())), Scope::default()));
                }
            } else {
                let (key, value) = match line.split_once(char::is_whitespace) {
                    Some((k, v)) => (k, v.trim()),
                    None => (line, ""),
                };
                stack
                    .last_mut()
                    .expect("scope stack is never empty")
                    .1
                    .params
                    .push((key.to_lowercase(), value.to_string()));
            }
        }

        if stack.len() != 1 {
            let (header, _) = stack.pop().unwrap();
            let name = header.map(|(_, n)| n).unwrap_or_default();
            bail!("unterminated <{name}> block at end of file");
        }

        Ok(Config {
            root: stack.pop().unwrap().1,
        })
    }

    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Config::parse(&text).with_context(|| format!("in config file {}", path.display()))
    }

    /// The global scope view.
    pub fn view(&self) -> View<'_> {
        View {
            scopes: vec![&self.root],
        }
    }

    /// All `<Backup>` blocks in declaration order.
    pub fn backups(&self) -> impl Iterator<Item = &Block> {
        self.root
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Backup)
    }
}

fn parse_block_kind(word: &str) -> Result<BlockKind> {
    match word.to_lowercase().as_str() {
        "backup" => Ok(BlockKind::Backup),
        "backupdirectory" | "backupdir" => Ok(BlockKind::BackupDirectory),
        other => bail!("unknown block type '{other}'"),
    }
}

/// A read-only resolved view over a chain of nested scopes, outermost first.
#[derive(Debug, Clone)]
pub struct View<'a> {
    scopes: Vec<&'a Scope>,
}

impl<'a> View<'a> {
    /// Extends the view with the scope of a nested block.
    pub fn enter(&self, block: &'a Block) -> View<'a> {
        let mut scopes = self.scopes.clone();
        scopes.push(&block.scope);
        View { scopes }
    }

    /// Blocks declared directly in the innermost scope.
    pub fn scope_blocks(&self) -> &'a [Block] {
        let scope: &'a Scope = self.scopes.last().expect("view is never empty");
        &scope.blocks
    }

    fn defining_scope(&self, key: &str) -> Option<&'a Scope> {
        self.scopes.iter().rev().find(|s| s.has_key(key)).copied()
    }

    /// Scalar lookup: the first value in the innermost scope defining `key`.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.defining_scope(&key.to_lowercase())
            .and_then(|s| s.first(&key.to_lowercase()))
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// List lookup: all values of `key` in its innermost defining scope,
    /// each split on whitespace.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        let key = key.to_lowercase();
        match self.defining_scope(&key) {
            Some(scope) => scope
                .params
                .iter()
                .filter(|(k, _)| *k == key)
                .flat_map(|(_, v)| v.split_whitespace())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).map(parse_bool).unwrap_or(default)
    }

    pub fn get_uint(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("'{key}' wants a non-negative integer, got '{v}'"))
            })
            .transpose()
    }

    pub fn get_duration_secs(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| parse_duration_secs(v).with_context(|| format!("bad '{key}' value")))
            .transpose()
    }
}

/// Truthiness of a config value: `yes|y|on|true|1` after stripping anything
/// that is not alphanumeric, case-insensitive. Everything else is false.
pub fn parse_bool(value: &str) -> bool {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    matches!(cleaned.as_str(), "yes" | "y" | "on" | "true" | "1")
}

/// Parses `<N>[ ]?<unit>` into seconds. The unit is identified by its first
/// letter (`s`, `m`, `h`, `d`, `w`), so `5m`, `5 min` and `5 minutes` are
/// equivalent. A bare number means seconds; an unknown unit is an error.
pub fn parse_duration_secs(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits_end == 0 {
        bail!("duration '{value}' does not start with a number");
    }

    let n: u64 = trimmed[..digits_end]
        .parse()
        .with_context(|| format!("bad number in duration '{value}'"))?;
    let unit = trimmed[digits_end..].trim().to_lowercase();

    let multiplier = match unit.chars().next() {
        None | Some('s') => 1,
        Some('m') => 60,
        Some('h') => 3600,
        Some('d') => 86400,
        Some('w') => 604800,
        Some(_) => bail!("unknown unit '{unit}' in duration '{value}'"),
    };

    Ok(n * multiplier)
}

/// Resolves the configuration file to use.
///
/// `-c` takes priority. A positional `NAME` maps to
/// `/etc/snapback/NAME.conf` when that file exists. Otherwise the standard
/// locations are probed in order. Finding none is fatal.
pub fn find_config_file(cli_path: Option<&Path>, name: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = cli_path {
        return Ok(path.to_path_buf());
    }

    if let Some(name) = name {
        let candidate = Path::new(defaults::NAMED_CONFIG_DIR).join(format!("{name}.conf"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    for path in defaults::CONFIG_SEARCH_PATHS {
        let path = Path::new(path);
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
    }

    bail!("no configuration file found");
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# global defaults
Hourlies 4
Dailies 7
AutoTime yes
Destination /mnt/back
Exclude *.cache

<Backup alpha.example.com>
    Directory /home/alice
    Directory /home/bob /home/carol
    Hourlies 6

    <BackupDirectory /var/www>
        Hourlies 2
        Exclude tmp/ logs/
        Exclude core
    </BackupDirectory>
</Backup>

<Backup beta.example.com>
    BackupHost beta-internal.example.com
</Backup>
"#;

    #[test]
    fn test_scalar_inheritance_and_override() {
        let cfg = Config::parse(SAMPLE).unwrap();
        let global = cfg.view();
        assert_eq!(global.get("hourlies"), Some("4"));

        let alpha = cfg.backups().next().unwrap();
        let host_view = global.enter(alpha);
        assert_eq!(host_view.get("Hourlies"), Some("6"));
        assert_eq!(host_view.get("dailies"), Some("7"));
        assert_eq!(host_view.get("destination"), Some("/mnt/back"));

        let www = &host_view.scope_blocks()[0];
        assert_eq!(www.kind, BlockKind::BackupDirectory);
        assert_eq!(www.name, "/var/www");
        let dir_view = host_view.enter(www);
        assert_eq!(dir_view.get("hourlies"), Some("2"));
        assert_eq!(dir_view.get("dailies"), Some("7"));
    }

    #[test]
    fn test_list_accumulation_and_override() {
        let cfg = Config::parse(SAMPLE).unwrap();
        let global = cfg.view();
        let alpha = cfg.backups().next().unwrap();
        let host_view = global.enter(alpha);

        // Repeated Directory lines accumulate, values split on whitespace.
        assert_eq!(
            host_view.get_list("directory"),
            vec!["/home/alice", "/home/bob", "/home/carol"]
        );

        // Inner Exclude definitions replace the inherited ones entirely.
        let dir_view = host_view.enter(&host_view.scope_blocks()[0]);
        assert_eq!(dir_view.get_list("exclude"), vec!["tmp/", "logs/", "core"]);
        assert_eq!(host_view.get_list("exclude"), vec!["*.cache"]);
    }

    #[test]
    fn test_backup_blocks_in_order() {
        let cfg = Config::parse(SAMPLE).unwrap();
        let names: Vec<&str> = cfg.backups().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.example.com", "beta.example.com"]);
    }

    #[test]
    fn test_case_insensitive_keys() {
        let cfg = Config::parse("HOURLIES 3\nautotime OFF\n").unwrap();
        let view = cfg.view();
        assert_eq!(view.get("Hourlies"), Some("3"));
        assert!(!view.get_bool("AutoTime", true));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Config::parse("<Backup x>\nHourlies 1\n").is_err()); // unterminated
        assert!(Config::parse("</Backup>\n").is_err()); // stray close
        assert!(Config::parse("<Backup x>\n</BackupDirectory>\n").is_err()); // mismatch
        assert!(Config::parse("<Widget x>\n</Widget>\n").is_err()); // unknown kind
        assert!(Config::parse("<Backup>\n</Backup>\n").is_err()); // missing name
    }

    #[test]
    fn test_backupdir_alias() {
        let cfg = Config::parse("<Backup h>\n<BackupDir /opt>\n</BackupDir>\n</Backup>\n").unwrap();
        let view = cfg.view();
        let host = cfg.backups().next().unwrap();
        let blocks = view.enter(host).scope_blocks();
        assert_eq!(blocks[0].kind, BlockKind::BackupDirectory);
        assert_eq!(blocks[0].name, "/opt");
    }

    #[test]
    fn test_parse_bool() {
        for v in ["yes", "YES", "y", "on", "true", "1", " Yes ", "o-n"] {
            assert!(parse_bool(v), "{v} should be true");
        }
        for v in ["no", "off", "0", "false", "", "2", "maybe"] {
            assert!(!parse_bool(v), "{v} should be false");
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_secs("30").unwrap(), 30);
        assert_eq!(parse_duration_secs("45s").unwrap(), 45);
        assert_eq!(parse_duration_secs("45 sec").unwrap(), 45);
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("5 minutes").unwrap(), 300);
        assert_eq!(parse_duration_secs("2h").unwrap(), 7200);
        assert_eq!(parse_duration_secs("1d").unwrap(), 86400);
        assert_eq!(parse_duration_secs("2 weeks").unwrap(), 1209600);

        assert!(parse_duration_secs("h").is_err());
        assert!(parse_duration_secs("5 fortnights").is_err());
        assert!(parse_duration_secs("").is_err());
    }

    #[test]
    fn test_get_uint() {
        let cfg = Config::parse("Hourlies 12\nDailies soon\n").unwrap();
        let view = cfg.view();
        assert_eq!(view.get_uint("hourlies").unwrap(), Some(12));
        assert_eq!(view.get_uint("weeklies").unwrap(), None);
        assert!(view.get_uint("dailies").is_err());
    }

    #[test]
    fn test_key_without_value() {
        let cfg = Config::parse("DestinationList\n").unwrap();
        assert_eq!(cfg.view().get("destinationlist"), Some(""));
        assert!(cfg.view().get_list("destinationlist").is_empty());
    }
}

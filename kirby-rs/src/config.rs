//! `kirbyrc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set <name>=<value>` or `/set <name> <value>` | change a setting |
//! | `/query <expr>` | add a query to evaluate |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Values are taken verbatim to the end of the line.  A value wrapped in
//! double quotes keeps its inner text, so leading or trailing spaces (as in
//! the prompt `nix-repl> `) survive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionConfig;

/// Query evaluated when neither the rc file nor the command line names one.
pub const DEFAULT_QUERY: &str = "hm.config.kirby";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl SessionConfig {
    /// Change one setting from its textual value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "program" => {
                if value.is_empty() {
                    return Err("program cannot be empty".into());
                }
                self.program = value.into();
            }
            "args" => self.args = split_args(value),
            "prompt" => {
                if value.is_empty() {
                    return Err("prompt cannot be empty".into());
                }
                self.prompt = value.into();
            }
            "timeout" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("timeout: expected seconds, got '{value}'"))?;
                self.timeout = Duration::from_secs(secs);
            }
            "echo" => self.echo = parse_flag(name, value)?,
            "signals" => self.signals = parse_flag(name, value)?,
            "import" => self.import = value.into(),
            "query_prefix" => self.query_prefix = value.into(),
            _ => return Err(format!("unknown setting '{name}'")),
        }
        Ok(())
    }
}

/// Parsed configuration: settings plus the queries to evaluate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub settings: SessionConfig,
    pub queries: Vec<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Returns the config and a list of any errors on recognised lines; a
    /// bad line leaves the setting it names unchanged.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim_start();

            if line.trim_end().is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(rest) = line.strip_prefix('/') else { continue };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));

            let result = match cmd {
                "set" => parse_set(args_str, &mut config.settings),
                "query" => parse_query(args_str, &mut config.queries),
                _ => Ok(()),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// The queries to run, falling back to [`DEFAULT_QUERY`].
    pub fn queries_or_default(&self) -> Vec<String> {
        if self.queries.is_empty() {
            vec![DEFAULT_QUERY.to_string()]
        } else {
            self.queries.clone()
        }
    }
}

/// Locate the rc file.
///
/// Priority: explicit path → `KIRBYRC` env var → `<config dir>/kirby/kirbyrc`
/// if it exists.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os("KIRBYRC") {
        return Some(PathBuf::from(p));
    }
    let dirs = directories::BaseDirs::new()?;
    let path = dirs.config_dir().join("kirby").join("kirbyrc");
    path.exists().then_some(path)
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── Directives ────────────────────────────────────────────────────────────────

/// Parse `/set <name>=<value>` or `/set <name> <value>`.
fn parse_set(args: &str, settings: &mut SessionConfig) -> Result<(), String> {
    let args = args.trim_start();
    if args.trim_end().is_empty() {
        return Err("/set: requires an argument".into());
    }

    let name_end = args
        .find(|c: char| c == '=' || c.is_ascii_whitespace())
        .unwrap_or(args.len());
    let name = &args[..name_end];
    let rest = &args[name_end..];

    let value = if let Some(v) = rest.strip_prefix('=') {
        v.trim_end()
    } else {
        let v = rest.trim();
        if v.is_empty() {
            return Err(format!("/set: missing value for '{name}'"));
        }
        v
    };

    if name.is_empty() {
        return Err("/set: setting name cannot be empty".into());
    }
    settings.set(name, unquote(value))
}

fn parse_query(args: &str, queries: &mut Vec<String>) -> Result<(), String> {
    let query = unquote(args.trim());
    if query.is_empty() {
        return Err("/query: requires an expression".into());
    }
    queries.push(query.to_string());
    Ok(())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_flag(name: &str, value: &str) -> Result<bool, String> {
    match value {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" => Ok(false),
        _ => Err(format!("{name}: expected 1 or 0, got '{value}'")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expect::SpawnFlags;

    // -- split_args -----------------------------------------------------------

    #[test]
    fn split_simple() {
        assert_eq!(split_args("repl --quiet"), ["repl", "--quiet"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#"repl "<nixpkgs/lib>" -I x"#), ["repl", "<nixpkgs/lib>", "-I", "x"]);
        assert_eq!(split_args(r#"--arg "a b""#), ["--arg", "a b"]);
    }

    #[test]
    fn split_empty_quoted_arg() {
        assert_eq!(split_args(r#"a "" b"#), ["a", "", "b"]);
    }

    // -- /set -----------------------------------------------------------------

    #[test]
    fn defaults() {
        let (cfg, errs) = Config::load_str("");
        assert!(errs.is_empty());
        assert_eq!(cfg.settings, SessionConfig::default());
        assert_eq!(cfg.settings.prompt, "nix-repl> ");
        assert_eq!(cfg.queries_or_default(), [DEFAULT_QUERY]);
    }

    #[test]
    fn set_equals_syntax() {
        let (cfg, errs) = Config::load_str("/set timeout=5");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn set_space_syntax() {
        let (cfg, errs) = Config::load_str("/set program /run/current-system/sw/bin/nix");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.settings.program, "/run/current-system/sw/bin/nix");
    }

    #[test]
    fn set_value_keeps_inner_text() {
        let (cfg, errs) = Config::load_str(
            "/set import=hm = import <home-manager/modules> { pkgs = import <nixpkgs> {}; }\n\
             /set prompt \"repl> \"",
        );
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(
            cfg.settings.import,
            "hm = import <home-manager/modules> { pkgs = import <nixpkgs> {}; }"
        );
        assert_eq!(cfg.settings.prompt, "repl> ");
    }

    #[test]
    fn set_args_are_split() {
        let (cfg, errs) = Config::load_str("/set args repl --file \"my file.nix\"");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.settings.args, ["repl", "--file", "my file.nix"]);
    }

    #[test]
    fn set_flags() {
        let (cfg, errs) = Config::load_str("/set echo=0\n/set signals off");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.settings.spawn_flags(), SpawnFlags { echo: false, signals: false });
    }

    #[test]
    fn bad_values_are_errors() {
        let (cfg, errs) = Config::load_str(
            "/set timeout=soon\n\
             /set echo maybe\n\
             /set colour=1\n\
             /set prompt\n\
             /set",
        );
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, [1, 2, 3, 4, 5]);
        assert_eq!(cfg.settings, SessionConfig::default());
        assert_eq!(errs[2].to_string(), "line 3: unknown setting 'colour'");
    }

    // -- /query ---------------------------------------------------------------

    #[test]
    fn queries_in_order() {
        let (cfg, errs) = Config::load_str(
            "/query hm.config.programs.git\n\
             /query \"hm.config.home.packages\"\n\
             /query",
        );
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].line, 3);
        assert_eq!(cfg.queries, ["hm.config.programs.git", "hm.config.home.packages"]);
        assert_eq!(cfg.queries_or_default(), cfg.queries);
    }

    // -- Comments & skipping --------------------------------------------------

    #[test]
    fn semicolon_comments_ignored() {
        let (cfg, errs) = Config::load_str(
            ";; This is a comment\n\
             ; /set timeout=1\n\
             /set timeout=2",
        );
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.settings.timeout, Duration::from_secs(2));
    }

    #[test]
    fn unknown_commands_silently_skipped() {
        let (cfg, errs) = Config::load_str("/def -i x = y\nplain text\n/query a.b");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.queries, ["a.b"]);
    }

    #[test]
    fn load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kirbyrc");
        std::fs::write(&path, "/set timeout 7\n/query x\n").unwrap();
        let (cfg, errs) = Config::load_file(&path).unwrap();
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.settings.timeout, Duration::from_secs(7));
        assert_eq!(cfg.queries, ["x"]);
        assert!(Config::load_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/tmp/some-kirbyrc");
        assert_eq!(find_config(Some(p)), Some(p.to_path_buf()));
    }
}

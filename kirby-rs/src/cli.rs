//! Command-line arguments and result printing.
//!
//! Usage:
//!   kirby [-f FILE] [-t SECS] [-n] [-d...] [--dump] [-g PATH]... [QUERY]...

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::Config;
use crate::session::Extraction;
use crate::value::Tree;

/// Extract configuration trees from a nix repl session.
#[derive(Debug, Parser)]
#[command(name = "kirby")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Read settings from FILE instead of the default kirbyrc
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for each REPL response
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Send commands without waiting for the terminal to echo them
    #[arg(short = 'n', long = "no-echo")]
    pub no_echo: bool,

    /// Increase log output (-d debug, -dd trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub debug: u8,

    /// Print every token of each result
    #[arg(long)]
    pub dump: bool,

    /// Print the value at a dotted PATH inside each result
    #[arg(short = 'g', long = "get", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Expressions to evaluate; replaces the configured queries
    #[arg(value_name = "QUERY")]
    pub queries: Vec<String>,
}

impl Cli {
    /// Override `config` with what was given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.timeout {
            config.settings.timeout = Duration::from_secs(secs);
        }
        if self.no_echo {
            config.settings.echo = false;
        }
        if !self.queries.is_empty() {
            config.queries = self.queries.clone();
        }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Write each successful result to `out` and each failure to `err`.
///
/// Returns the number of failed queries.
pub fn print_extraction<W: Write, E: Write>(
    out: &mut W,
    err: &mut E,
    extraction: &Extraction<'_>,
    cli: &Cli,
) -> io::Result<usize> {
    let mut failures = 0;
    for result in extraction.iter() {
        match &result.outcome {
            Ok(tree) => {
                writeln!(out, "# {}", result.query)?;
                print_tree(out, tree, cli)?;
            }
            Err(e) => {
                failures += 1;
                writeln!(err, "kirby: {}: {e}", result.query)?;
            }
        }
    }
    Ok(failures)
}

fn print_tree<W: Write>(out: &mut W, tree: &Tree<'_>, cli: &Cli) -> io::Result<()> {
    if cli.dump {
        tree.dump(out)?;
    }
    for path in &cli.paths {
        match tree.get(path) {
            Ok(v) => writeln!(out, "{path}\t{}\t{}", v.kind, String::from_utf8_lossy(v.raw))?,
            Err(e) => writeln!(out, "{path}\terror\t{e}")?,
        }
    }
    if !cli.dump && cli.paths.is_empty() {
        for &root in tree.roots() {
            out.write_all(tree.text(root))?;
            writeln!(out)?;
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kirby").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_args() {
        let cli = parse(&[]);
        assert!(cli.config.is_none());
        assert!(cli.queries.is_empty());
        assert_eq!(cli.debug, 0);
        assert!(!cli.dump && !cli.no_echo);
    }

    #[test]
    fn all_flags() {
        let cli = parse(&[
            "-f", "/tmp/rc", "-t", "5", "-n", "-dd", "--dump", "-g", "a.b", "--get", "c",
            "hm.config.x", "hm.config.y",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rc")));
        assert_eq!(cli.timeout, Some(5));
        assert!(cli.no_echo);
        assert_eq!(cli.debug, 2);
        assert!(cli.dump);
        assert_eq!(cli.paths, ["a.b", "c"]);
        assert_eq!(cli.queries, ["hm.config.x", "hm.config.y"]);
    }

    #[test]
    fn bad_timeout_is_usage_error() {
        let err = Cli::try_parse_from(["kirby", "-t", "soon"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn apply_overrides_config() {
        let (mut config, _) = Config::load_str("/set timeout=30\n/query from.rc");
        parse(&["-t", "3", "-n", "from.cli"]).apply(&mut config);
        assert_eq!(config.settings.timeout, Duration::from_secs(3));
        assert!(!config.settings.echo);
        assert_eq!(config.queries, ["from.cli"]);

        let (mut config, _) = Config::load_str("/query from.rc");
        parse(&[]).apply(&mut config);
        assert_eq!(config.queries, ["from.rc"]);
        assert!(config.settings.echo);
    }
}

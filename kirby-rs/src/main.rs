use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};

use kirby::cli::{self, Cli};
use kirby::config::{self, Config};
use kirby::{logging, Arena, Session};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.debug) {
        eprintln!("kirby: {e:#}");
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("kirby: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = match config::find_config(cli.config.as_deref()) {
        Some(path) => {
            let (config, errors) = Config::load_file(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            for e in errors {
                warn!(file = %path.display(), "{e}");
            }
            debug!(file = %path.display(), "config loaded");
            config
        }
        None => Config::default(),
    };
    cli.apply(&mut config);
    let queries = config.queries_or_default();

    // ── Session ───────────────────────────────────────────────────────────────
    let arena = Arena::new("kirby").context("creating arena")?;
    let mut session = Session::spawn(config.settings.clone())
        .with_context(|| format!("starting `{}`", config.settings.program))?;
    let extraction = session
        .extract(&arena, &queries)
        .context("talking to the repl")?;
    if let Err(e) = session.close() {
        warn!(error = %e, "closing repl");
    }

    // ── Output ────────────────────────────────────────────────────────────────
    let failures = cli::print_extraction(
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
        &extraction,
        cli,
    )
    .context("writing results")?;

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

//! Log output for the command-line tool.
//!
//! Everything goes to stderr so results on stdout stay machine-readable.
//! `RUST_LOG` takes precedence over the `-d` count.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a `-d` count: warnings only, then debug, then trace.
pub fn default_directive(debug: u8) -> &'static str {
    match debug {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

fn filter(debug: u8) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.trim().is_empty() => {
            EnvFilter::try_new(spec).unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
        }
        _ => EnvFilter::new(default_directive(debug)),
    }
}

/// Install the global subscriber.
pub fn init(debug: u8) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(debug))
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(debug > 1),
        )
        .try_init()
        .context("Failed to initialize tracing subscriber")?;
    Ok(())
}

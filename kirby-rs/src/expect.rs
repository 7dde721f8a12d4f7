//! Expect-style control of an interactive child process.
//!
//! An [`Expect`] implementor owns an input buffer fed by the child's output.
//! [`Expect::expect`] blocks until a pattern in the given set matches the
//! buffer, then returns the [`Match`] with ranges into [`Expect::buffer`].
//! The matched bytes, and everything before them, are discarded at the start
//! of the next `expect` call, so the caller can inspect them in between.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub use crate::pattern::{Match, PatternSet};
use crate::pattern::PatternError;

#[derive(Debug, Error)]
pub enum ExpectError {
    #[error("child closed its output")]
    Eof,

    #[error("no match within {0:?}")]
    Timeout(Duration),

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Terminal settings for a spawned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnFlags {
    /// Leave terminal echo on; the child's input shows up in its output.
    pub echo: bool,
    /// Leave signal generation on (`^C`, `^Z` from the input stream).
    pub signals: bool,
}

impl Default for SpawnFlags {
    fn default() -> Self {
        Self {
            echo: true,
            signals: true,
        }
    }
}

pub trait Expect {
    /// Write `bytes` to the child, returning how many were written.
    fn send(&mut self, bytes: &[u8]) -> Result<usize, ExpectError>;

    fn send_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<usize, ExpectError> {
        let text = fmt::format(args);
        self.send(text.as_bytes())
    }

    /// Wait until one of `patterns` matches the buffered output.
    fn expect(&mut self, patterns: &PatternSet) -> Result<Match, ExpectError>;

    /// Output received and not yet discarded.
    fn buffer(&self) -> &[u8];

    /// Hang up on the child and reap it, returning its exit code when it
    /// exited normally.
    fn close(&mut self) -> Result<Option<i32>, ExpectError>;
}

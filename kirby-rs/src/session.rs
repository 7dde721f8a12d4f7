//! Driving a REPL to evaluate queries and parse what it prints.
//!
//! A [`Session`] walks the REPL through a fixed protocol:
//!
//! ```text
//! Spawned → AwaitingPrompt → CommandSent → AwaitingEcho → AwaitingOutputBoundary
//!         → CapturedOutput → CommandSent …
//! ```
//!
//! 1. wait for the prompt and send the import command, then wait again;
//! 2. for each query send `<query_prefix><query>`; with echo on, wait for
//!    the echoed text before sending the newline;
//! 3. capture everything up to the next prompt, copy it into the caller's
//!    arena, strip terminal escapes, parse it and build a [`Tree`].
//!
//! A query whose output doesn't parse fails on its own.  Anything that
//! breaks the conversation itself (timeout, end of output, arena
//! exhaustion) closes the child and leaves the session [`SessionState::Failed`].

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ansi;
use crate::arena::{Arena, ArenaError};
use crate::expect::{Expect, ExpectError, PatternSet, SpawnFlags};
use crate::pattern::{output_boundary, Pattern, PatternError};
use crate::pty::PtyProcess;
use crate::value::{self, ParseError, Tree};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Binding command sent before the first query.
pub const DEFAULT_IMPORT: &str = "hm = import <home-manager/modules> { \
    configuration = ~/.config/home-manager/home.nix; \
    pkgs = import <nixpkgs> {}; }";

/// How to start and talk to the REPL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Literal prompt text printed by the REPL.
    pub prompt: String,
    /// How long each wait for REPL output may take.
    pub timeout: Duration,
    /// The REPL's terminal echoes commands back.
    pub echo: bool,
    pub signals: bool,
    /// Sent once before the first query; empty to skip.
    pub import: String,
    /// Prepended to each query to make the REPL print it in full.
    pub query_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: "nix".into(),
            args: vec!["repl".into()],
            prompt: "nix-repl> ".into(),
            timeout: Duration::from_secs(30),
            echo: true,
            signals: true,
            import: DEFAULT_IMPORT.into(),
            query_prefix: ":p ".into(),
        }
    }
}

impl SessionConfig {
    pub fn spawn_flags(&self) -> SpawnFlags {
        SpawnFlags {
            echo: self.echo,
            signals: self.signals,
        }
    }
}

// ── State & errors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Spawned,
    AwaitingPrompt,
    CommandSent,
    AwaitingEcho,
    AwaitingOutputBoundary,
    CapturedOutput,
    Closed,
    /// A fatal error ended the conversation; no further commands are sent.
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Spawned => "spawned",
            SessionState::AwaitingPrompt => "awaiting prompt",
            SessionState::CommandSent => "command sent",
            SessionState::AwaitingEcho => "awaiting echo",
            SessionState::AwaitingOutputBoundary => "awaiting output boundary",
            SessionState::CapturedOutput => "captured output",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminated(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{state}: {source}")]
    Expect {
        state: SessionState,
        #[source]
        source: ExpectError,
    },

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("bad prompt or command pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("session is {0}")]
    Terminated(SessionState),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::Expect {
                source: ExpectError::Timeout(_),
                ..
            }
        )
    }
}

/// Why one query produced no tree.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("could not parse output: {0}")]
    Parse(#[source] ParseError),

    /// The REPL printed an evaluation error instead of a value.
    #[error("repl reported {0}")]
    Repl(String),
}

// ── Results ───────────────────────────────────────────────────────────────────

/// One query and what came of it.
#[derive(Debug)]
pub struct QueryResult<'a> {
    pub query: String,
    pub outcome: Result<Tree<'a>, QueryError>,
}

/// Results of [`Session::extract`], in query order.
#[derive(Debug, Default)]
pub struct Extraction<'a> {
    results: Vec<QueryResult<'a>>,
}

impl<'a> Extraction<'a> {
    /// Outcome of the first query equal to `query`.
    pub fn get(&self, query: &str) -> Option<&Result<Tree<'a>, QueryError>> {
        self.results
            .iter()
            .find(|r| r.query == query)
            .map(|r| &r.outcome)
    }

    /// The tree for `query`, if it was extracted successfully.
    pub fn tree(&self, query: &str) -> Option<&Tree<'a>> {
        self.get(query)?.as_ref().ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryResult<'a>> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of queries that produced no tree.
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_err()).count()
    }
}

impl<'a> IntoIterator for Extraction<'a> {
    type Item = QueryResult<'a>;
    type IntoIter = std::vec::IntoIter<QueryResult<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session<E: Expect> {
    repl: E,
    config: SessionConfig,
    state: SessionState,
    prompt: PatternSet,
    boundary: PatternSet,
    /// The greeting prompt has been seen and the import command run.
    ready: bool,
}

impl Session<PtyProcess> {
    /// Start the configured REPL on a pty.
    pub fn spawn(config: SessionConfig) -> Result<Self, SessionError> {
        let repl = PtyProcess::spawn(
            &config.program,
            &config.args,
            config.spawn_flags(),
            config.timeout,
        )
        .map_err(|source| SessionError::Expect {
            state: SessionState::Spawned,
            source,
        })?;
        info!(program = %config.program, pid = repl.pid(), "repl started");
        Session::new(repl, config)
    }
}

impl<E: Expect> Session<E> {
    /// Wrap an already running REPL.
    pub fn new(repl: E, config: SessionConfig) -> Result<Self, SessionError> {
        let prompt = PatternSet::from(Pattern::literal(&config.prompt)?);
        let boundary = PatternSet::from(output_boundary(&config.prompt)?);
        Ok(Self {
            repl,
            config,
            state: SessionState::Spawned,
            prompt,
            boundary,
            ready: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn repl(&self) -> &E {
        &self.repl
    }

    /// Evaluate `queries` in order, parsing each result into `arena`.
    ///
    /// Captured output and trees live in `arena`, so they outlive the
    /// session.  Returns an error, and closes the child, if the conversation
    /// breaks down; per-query parse failures are reported in the
    /// [`Extraction`] instead.
    pub fn extract<'a, Q: AsRef<str>>(
        &mut self,
        arena: &'a Arena,
        queries: &[Q],
    ) -> Result<Extraction<'a>, SessionError> {
        if self.state.is_terminated() {
            return Err(SessionError::Terminated(self.state));
        }
        match self.run(arena, queries) {
            Ok(extraction) => Ok(extraction),
            Err(e) => {
                error!(state = %self.state, error = %e, "session failed");
                self.fail();
                Err(e)
            }
        }
    }

    /// Hang up on the REPL, returning its exit code.
    pub fn close(&mut self) -> Result<Option<i32>, SessionError> {
        if self.state == SessionState::Closed {
            return Ok(None);
        }
        let state = self.state;
        let code = self
            .repl
            .close()
            .map_err(|source| SessionError::Expect { state, source })?;
        self.transition(SessionState::Closed);
        Ok(code)
    }

    fn run<'a, Q: AsRef<str>>(
        &mut self,
        arena: &'a Arena,
        queries: &[Q],
    ) -> Result<Extraction<'a>, SessionError> {
        if !self.ready {
            self.await_prompt()?;
            if !self.config.import.is_empty() {
                let import = self.config.import.clone();
                self.command(&import)?;
                self.await_prompt()?;
            }
            self.ready = true;
        }

        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let query = query.as_ref();
            let command = format!("{}{}", self.config.query_prefix, query);
            self.command(&command)?;

            self.transition(SessionState::AwaitingOutputBoundary);
            let state = self.state;
            let m = self
                .repl
                .expect(&self.boundary)
                .map_err(|source| SessionError::Expect { state, source })?;

            self.transition(SessionState::CapturedOutput);
            let output = self.capture(arena, m.capture())?;
            let outcome = parse_output(arena, output)?;
            match &outcome {
                Ok(tree) => debug!(query, tokens = tree.len(), "query parsed"),
                Err(e) => warn!(query, error = %e, "query failed"),
            }
            results.push(QueryResult {
                query: query.to_string(),
                outcome,
            });
        }
        Ok(Extraction { results })
    }

    fn await_prompt(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::AwaitingPrompt);
        let state = self.state;
        self.repl
            .expect(&self.prompt)
            .map_err(|source| SessionError::Expect { state, source })?;
        Ok(())
    }

    /// Send one line, consuming its echo when the terminal echoes.
    fn command(&mut self, text: &str) -> Result<(), SessionError> {
        self.transition(SessionState::CommandSent);
        let state = self.state;
        let expect_err = |source| SessionError::Expect { state, source };

        if !self.config.echo {
            self.repl
                .send_fmt(format_args!("{text}\n"))
                .map_err(expect_err)?;
            return Ok(());
        }

        self.repl.send(text.as_bytes()).map_err(expect_err)?;
        self.transition(SessionState::AwaitingEcho);
        let state = self.state;
        let echo = PatternSet::from(Pattern::literal(text)?);
        self.repl
            .expect(&echo)
            .map_err(|source| SessionError::Expect { state, source })?;
        self.repl
            .send(b"\n")
            .map_err(|source| SessionError::Expect { state, source })?;
        Ok(())
    }

    /// Copy `range` of the REPL buffer into `arena` without escape sequences.
    fn capture<'a>(&self, arena: &'a Arena, range: Range<usize>) -> Result<&'a [u8], SessionError> {
        let raw = self.repl.buffer().get(range).unwrap_or_default();
        let block = arena.alloc(raw.len())?;
        block.copy_from_slice(raw);
        let len = ansi::strip_escapes(block);
        // SAFETY: `block` is exactly what `alloc` returned above.
        let block = unsafe { arena.realloc(Some(block), len)? };
        debug!(captured = raw.len(), stripped = len, "output captured");
        Ok(block)
    }

    fn fail(&mut self) {
        self.transition(SessionState::Failed);
        if let Err(e) = self.repl.close() {
            warn!(error = %e, "closing repl after failure");
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session");
        self.state = next;
    }
}

/// Parse captured output.  Only arena exhaustion is an error for the session.
fn parse_output<'a>(
    arena: &'a Arena,
    output: &'a [u8],
) -> Result<Result<Tree<'a>, QueryError>, SessionError> {
    if let Some(message) = repl_error(output) {
        return Ok(Err(QueryError::Repl(message)));
    }
    match value::parse(arena, output) {
        Ok(tree) => Ok(Ok(tree)),
        Err(ParseError::OutOfMemory(e)) => Err(e.into()),
        Err(e) => Ok(Err(QueryError::Parse(e))),
    }
}

/// The REPL's error report, if `output` is one.
fn repl_error(output: &[u8]) -> Option<String> {
    let start = output.iter().position(|c| !c.is_ascii_whitespace())?;
    let text = &output[start..];
    if !text.starts_with(b"error:") {
        return None;
    }
    let text = String::from_utf8_lossy(text);
    Some(text.trim_end().to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

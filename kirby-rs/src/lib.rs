//! kirby: pull configuration values out of a running `nix repl`.
//!
//! A [`Session`] drives the REPL over a pseudo-terminal, captures what it
//! prints for each query, and parses the output into a [`Tree`] allocated in
//! a caller-owned [`Arena`].  Trees answer dotted-path lookups such as
//! `programs.git.enable`.

pub mod ansi;
pub mod arena;
pub mod cli;
pub mod config;
pub mod expect;
pub mod logging;
pub mod pattern;
pub mod pty;
pub mod session;
pub mod value;

pub use arena::{Arena, ArenaError};
pub use session::{Extraction, QueryError, Session, SessionConfig, SessionError, SessionState};
pub use value::{Kind, ParseError, Tree, Value};

//! Single-pass tokenizer for values printed by the REPL.
//!
//! The grammar is JSON-like with the REPL's extensions:
//!
//! ```text
//! value      ::= primitive | set | list
//! set        ::= '{' { key '=' value ';' } '}'
//! list       ::= '[' { value } ']'
//! key        ::= identifier | string
//! primitive  ::= number | boolean | null | string | identifier | '...'
//!              | '«derivation …»' | '«lambda …»' | '«primop …»' | '«repeated»'
//! ```
//!
//! The tokenizer never recurses.  It keeps a *super* token: the innermost
//! open container, or the key of the member whose value is being read.  Each
//! value takes the super as its parent, so a member `k = v` is stored as
//! `set → k → v`.
//!
//! When the input ends inside a token, or with a container still open,
//! [`Parser::parse`] returns [`ParseError::Partial`] and leaves the cursor at
//! the start of the incomplete token.  Calling it again with the same bytes
//! plus more resumes where it stopped.

use aho_corasick::AhoCorasick;
use thiserror::Error;
use tracing::trace;

use crate::arena::{Arena, ArenaError, ArenaVec};

use super::token::{Kind, Token, TokenId};

/// Token slots reserved when a parser is created.
pub const INITIAL_TOKENS: usize = 256;

const OPEN_GUILLEMET: &[u8] = "«".as_bytes();
const CLOSE_GUILLEMET: &[u8] = "»".as_bytes();

/// Errors returned by [`Parser::parse`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] ArenaError),

    /// Malformed input; retrying with more bytes will not help.
    #[error("invalid input at byte {offset}")]
    Invalid { offset: usize },

    /// The input ended mid-token or with a container still open.
    #[error("incomplete input at byte {offset}")]
    Partial { offset: usize },
}

impl ParseError {
    pub fn is_partial(&self) -> bool {
        matches!(self, ParseError::Partial { .. })
    }
}

/// Tokenizer state over an arena-backed token pool.
pub struct Parser<'a> {
    pool: ArenaVec<'a, Token>,
    offset: usize,
    sup: Option<TokenId>,
    /// Finds the `»` that ends a `«…»` value.
    closing: AhoCorasick,
}

impl<'a> Parser<'a> {
    pub fn new(arena: &'a Arena) -> Result<Self, ArenaError> {
        Ok(Self {
            pool: ArenaVec::with_capacity(arena, INITIAL_TOKENS)?,
            offset: 0,
            sup: None,
            closing: AhoCorasick::new([CLOSE_GUILLEMET]),
        })
    }

    /// Byte offset the next call to [`Parser::parse`] starts from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn tokens(&self) -> &[Token] {
        self.pool.as_slice()
    }

    pub(crate) fn into_pool(self) -> ArenaVec<'a, Token> {
        self.pool
    }

    /// Tokenize `input` from the saved cursor onward.
    ///
    /// Returns the total number of tokens in the pool.
    pub fn parse(&mut self, input: &[u8]) -> Result<usize, ParseError> {
        while self.offset < input.len() {
            match input[self.offset] {
                b'{' => self.open(Kind::Set)?,
                b'[' => self.open(Kind::List)?,
                b'}' => self.close(Kind::Set)?,
                b']' => self.close(Kind::List)?,
                b'"' => self.string(input)?,
                b'\t' | b'\r' | b'\n' | b' ' => {}
                b'=' => self.assign()?,
                b';' => self.end_member(),
                _ => self.primitive(input)?,
            }
            self.offset += 1;
        }

        if self.sup.is_some() {
            return Err(ParseError::Partial { offset: self.offset });
        }
        Ok(self.pool.len())
    }

    fn open(&mut self, kind: Kind) -> Result<(), ParseError> {
        let parent = self.sup;
        if let Some(p) = parent {
            let sup = &mut self.pool[p.index()];
            // A set's direct children are keys, and a container can't be one.
            if sup.kind == Kind::Set {
                return Err(ParseError::Invalid { offset: self.offset });
            }
            sup.size += 1;
        }
        let start = to_u32(self.offset)?;
        let id = self.alloc(Token::new(kind, start, None, parent))?;
        trace!(token = %id, %kind, start, "open");
        self.sup = Some(id);
        Ok(())
    }

    fn close(&mut self, kind: Kind) -> Result<(), ParseError> {
        let offset = self.offset;
        let invalid = || ParseError::Invalid { offset };

        let last = self.pool.len().checked_sub(1).ok_or_else(invalid)?;
        let mut cur = TokenId(last as u32);
        loop {
            let tok = self.pool[cur.index()];
            if tok.is_open() {
                if tok.kind != kind {
                    return Err(invalid());
                }
                self.pool[cur.index()].end = Some(to_u32(offset + 1)?);
                self.sup = tok.parent;
                trace!(token = %cur, %kind, end = offset + 1, "close");
                return Ok(());
            }
            cur = tok.parent.ok_or_else(invalid)?;
        }
    }

    fn string(&mut self, input: &[u8]) -> Result<(), ParseError> {
        let start = self.offset;
        let partial = || ParseError::Partial { offset: start };

        let mut i = start + 1;
        while i < input.len() {
            match input[i] {
                b'"' => {
                    self.attach(Kind::String, start + 1, i)?;
                    self.offset = i;
                    return Ok(());
                }
                b'\\' => {
                    i += 1;
                    match input.get(i) {
                        None => return Err(partial()),
                        Some(b'"' | b'\\' | b'r' | b'n' | b't') => {}
                        Some(b'u') => {
                            for _ in 0..4 {
                                i += 1;
                                match input.get(i) {
                                    None => return Err(partial()),
                                    Some(c) if c.is_ascii_hexdigit() => {}
                                    Some(_) => return Err(ParseError::Invalid { offset: i }),
                                }
                            }
                        }
                        Some(_) => return Err(ParseError::Invalid { offset: i }),
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Err(partial())
    }

    fn assign(&mut self) -> Result<(), ParseError> {
        let offset = self.offset;
        let invalid = || ParseError::Invalid { offset };

        let last = self.pool.len().checked_sub(1).ok_or_else(invalid)?;
        let key = self.pool[last];
        let in_set = self
            .sup
            .is_some_and(|s| self.pool[s.index()].kind == Kind::Set);
        if !in_set || key.kind.is_container() || key.parent != self.sup {
            return Err(invalid());
        }
        self.sup = Some(TokenId(last as u32));
        Ok(())
    }

    fn end_member(&mut self) {
        if let Some(s) = self.sup {
            let tok = self.pool[s.index()];
            if !tok.kind.is_container() {
                self.sup = tok.parent;
            }
        }
    }

    fn primitive(&mut self, input: &[u8]) -> Result<(), ParseError> {
        let start = self.offset;
        let partial = || ParseError::Partial { offset: start };

        let mut end = start;
        if input[start..].starts_with(OPEN_GUILLEMET) {
            let rest = &input[start + OPEN_GUILLEMET.len()..];
            let close = self.closing.find(rest).ok_or_else(partial)?;
            end = start + OPEN_GUILLEMET.len() + close.end();
        }
        while end < input.len() && !is_delimiter(input[end]) {
            end += 1;
        }
        if end == input.len() {
            return Err(partial());
        }

        let kind = classify(&input[start..end]);
        self.attach(kind, start, end)?;
        // The delimiter is handled by the main loop.
        self.offset = end - 1;
        Ok(())
    }

    /// Allocate a finished primitive as a child of the super.
    fn attach(&mut self, kind: Kind, start: usize, end: usize) -> Result<TokenId, ParseError> {
        let parent = self.sup;
        let id = self.alloc(Token::new(kind, to_u32(start)?, Some(to_u32(end)?), parent))?;
        if let Some(p) = parent {
            self.pool[p.index()].size += 1;
        }
        trace!(token = %id, %kind, start, end, "value");
        Ok(id)
    }

    fn alloc(&mut self, tok: Token) -> Result<TokenId, ParseError> {
        let index = self.pool.push(tok)?;
        Ok(TokenId(index as u32))
    }
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'\t' | b'\r' | b'\n' | b' ' | b';' | b']' | b'}')
}

fn classify(text: &[u8]) -> Kind {
    match text {
        b"true" | b"false" => Kind::Boolean,
        b"null" => Kind::Null,
        b"..." => Kind::Ellipsis,
        _ if text.starts_with("«derivation".as_bytes()) => Kind::Derivation,
        _ if text.starts_with("«lambda".as_bytes()) => Kind::Lambda,
        _ if text.starts_with("«primop".as_bytes()) => Kind::Primop,
        _ if text.starts_with("«repeated".as_bytes()) => Kind::Repeated,
        _ if text.starts_with(OPEN_GUILLEMET) => Kind::Unknown,
        _ if is_number(text) => Kind::Number,
        _ => Kind::Identifier,
    }
}

fn is_number(text: &[u8]) -> bool {
    let digits = text.strip_prefix(b"-").unwrap_or(text);
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}

fn to_u32(offset: usize) -> Result<u32, ParseError> {
    u32::try_from(offset).map_err(|_| ParseError::Invalid { offset })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

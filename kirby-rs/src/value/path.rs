//! Dotted-path lookup and typed access to parsed values.
//!
//! A path is a sequence of keys separated by `.`, resolved from the tree's
//! first root: `programs.git.enable`.  A segment wrapped in double quotes may
//! contain dots: `xdg."config.file"`.  The empty path names the root itself.

use thiserror::Error;

use super::token::{Kind, TokenId};
use super::tree::{Tree, TreeError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("tree is empty")]
    EmptyTree,

    #[error("malformed path {path:?}")]
    Syntax { path: String },

    #[error("cannot look up `{segment}` in a {kind}")]
    NotASet { segment: String, kind: Kind },

    #[error("no key `{segment}`")]
    MissingKey { segment: String },

    #[error("key `{segment}` has no value")]
    MissingValue { segment: String },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Split a dotted path into its segments.
pub fn split_path(path: &str) -> Result<Vec<String>, PathError> {
    let syntax = || PathError::Syntax { path: path.to_string() };
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    let mut rest = path;
    loop {
        let (segment, tail) = if let Some(quoted) = rest.strip_prefix('"') {
            let close = quoted.find('"').ok_or_else(syntax)?;
            (&quoted[..close], &quoted[close + 1..])
        } else {
            let end = rest.find('.').unwrap_or(rest.len());
            if end == 0 {
                return Err(syntax());
            }
            (&rest[..end], &rest[end..])
        };
        segments.push(segment.to_string());

        if tail.is_empty() {
            return Ok(segments);
        }
        rest = tail.strip_prefix('.').ok_or_else(syntax)?;
        if rest.is_empty() {
            return Err(syntax());
        }
    }
}

/// A borrowed view of one parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<'a> {
    pub id: TokenId,
    pub kind: Kind,
    /// Source bytes; see [`Tree::text`].
    pub raw: &'a [u8],
}

impl<'a> Value<'a> {
    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// The raw text, if it is UTF-8.
    pub fn as_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.raw).ok()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match (self.kind, self.raw) {
            (Kind::Boolean, b"true") => Some(true),
            (Kind::Boolean, b"false") => Some(false),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        if self.kind != Kind::Number {
            return None;
        }
        self.as_str()?.parse().ok()
    }

    pub fn is_null(&self) -> bool {
        self.kind == Kind::Null
    }

    /// Decoded contents of a string value.
    ///
    /// Invalid UTF-8 and code points that aren't scalar values come out as
    /// U+FFFD.
    pub fn unescape(&self) -> Option<String> {
        if self.kind != Kind::String {
            return None;
        }
        let mut out = Vec::with_capacity(self.raw.len());
        let mut bytes = self.raw.iter().copied();
        while let Some(c) = bytes.next() {
            if c != b'\\' {
                out.push(c);
                continue;
            }
            match bytes.next() {
                Some(b'n') => out.push(b'\n'),
                Some(b'r') => out.push(b'\r'),
                Some(b't') => out.push(b'\t'),
                Some(b'u') => {
                    let hex: Vec<u8> = bytes.by_ref().take(4).collect();
                    let ch = std::str::from_utf8(&hex)
                        .ok()
                        .and_then(|h| u32::from_str_radix(h, 16).ok())
                        .and_then(char::from_u32)
                        .unwrap_or(char::REPLACEMENT_CHARACTER);
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
                Some(other) => out.push(other),
                None => {}
            }
        }
        Some(String::from_utf8_lossy(&out).into_owned())
    }
}

impl<'a> Tree<'a> {
    pub fn value(&self, id: TokenId) -> Result<Value<'a>, TreeError> {
        let kind = self.token(id)?.kind;
        Ok(Value { id, kind, raw: self.text(id) })
    }

    /// The value of member `key` in `set`.
    pub fn lookup(&self, set: TokenId, key: &str) -> Result<TokenId, PathError> {
        let tok = self.token(set)?;
        if tok.kind != Kind::Set {
            return Err(PathError::NotASet {
                segment: key.to_string(),
                kind: tok.kind,
            });
        }
        for nth in 0..tok.child_count() {
            let k = self.child(set, nth)?;
            if !self.token(k)?.kind.is_key() || self.text(k) != key.as_bytes() {
                continue;
            }
            return match self.child(k, 0) {
                Ok(v) => Ok(v),
                Err(TreeError::NoSuchChild { .. }) => Err(PathError::MissingValue {
                    segment: key.to_string(),
                }),
                Err(e) => Err(e.into()),
            };
        }
        Err(PathError::MissingKey {
            segment: key.to_string(),
        })
    }

    /// Resolve a dotted path from the first root.
    pub fn get(&self, path: &str) -> Result<Value<'a>, PathError> {
        let mut cur = self.root().ok_or(PathError::EmptyTree)?;
        for segment in split_path(path)? {
            cur = self.lookup(cur, &segment)?;
        }
        Ok(self.value(cur)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::value::Parser;

    const HOME: &[u8] = br#"{ programs = { git = { enable = true; userName = "kirby"; }; }; "xdg.dirs" = [ 1 2 ]; count = -3; nothing = null; }"#;

    fn with_tree<R>(input: &[u8], f: impl FnOnce(&Tree<'_>) -> R) -> R {
        let arena = Arena::with_reserve("path-test", 1 << 22).unwrap();
        let mut p = Parser::new(&arena).unwrap();
        p.parse(input).unwrap();
        let tree = Tree::build(p, input).unwrap();
        f(&tree)
    }

    #[test]
    fn split_plain_and_quoted() {
        assert_eq!(split_path("a.b.c").unwrap(), ["a", "b", "c"]);
        assert_eq!(split_path("xdg.\"a.b\".c").unwrap(), ["xdg", "a.b", "c"]);
        assert_eq!(split_path("\"\"").unwrap(), [""]);
        assert!(split_path("").unwrap().is_empty());
    }

    #[test]
    fn split_rejects_malformed() {
        for bad in ["a..b", ".a", "a.", "\"open", "\"a\"b"] {
            assert!(
                matches!(split_path(bad), Err(PathError::Syntax { .. })),
                "{bad:?} should not split"
            );
        }
    }

    #[test]
    fn nested_lookup() {
        with_tree(HOME, |t| {
            let v = t.get("programs.git.enable").unwrap();
            assert_eq!(v.as_bool(), Some(true));
            let name = t.get("programs.git.userName").unwrap();
            assert_eq!(name.kind, Kind::String);
            assert_eq!(name.as_str(), Some("kirby"));
        });
    }

    #[test]
    fn quoted_segment_matches_string_key() {
        with_tree(HOME, |t| {
            let v = t.get("\"xdg.dirs\"").unwrap();
            assert_eq!(v.kind, Kind::List);
            assert_eq!(v.raw, b"[ 1 2 ]");
            assert_eq!(t.children(v.id).count(), 2);
        });
    }

    #[test]
    fn empty_path_is_root() {
        with_tree(HOME, |t| {
            let v = t.get("").unwrap();
            assert_eq!(v.id, TokenId(0));
            assert!(v.is_container());
        });
    }

    #[test]
    fn lookup_errors() {
        with_tree(HOME, |t| {
            assert_eq!(
                t.get("programs.zsh"),
                Err(PathError::MissingKey { segment: "zsh".into() })
            );
            assert_eq!(
                t.get("count.x"),
                Err(PathError::NotASet { segment: "x".into(), kind: Kind::Number })
            );
            assert!(matches!(t.get("a..b"), Err(PathError::Syntax { .. })));
        });
    }

    #[test]
    fn empty_tree_has_no_root() {
        with_tree(b"", |t| {
            assert_eq!(t.get("a"), Err(PathError::EmptyTree));
        });
    }

    #[test]
    fn scalar_conversions() {
        with_tree(HOME, |t| {
            assert_eq!(t.get("count").unwrap().as_i64(), Some(-3));
            assert!(t.get("nothing").unwrap().is_null());
            assert_eq!(t.get("nothing").unwrap().as_i64(), None);
            assert_eq!(t.get("programs.git.userName").unwrap().as_bool(), None);
        });
    }

    #[test]
    fn unescape_string() {
        with_tree(br#"[ "a\"b\\c\nd\u00e9\ud800" x ]"#, |t| {
            let v = t.value(TokenId(1)).unwrap();
            assert_eq!(v.unescape().as_deref(), Some("a\"b\\c\nd\u{e9}\u{fffd}"));
            assert_eq!(t.value(TokenId(2)).unwrap().unescape(), None);
        });
    }
}

//! Token and child-storage types shared by the parser and the tree.

use std::fmt;

/// Children stored directly inside a [`Token`].
pub const INLINE_CHILDREN: usize = 4;

/// Children stored per overflow [`ChildBlock`].
pub const BLOCK_CHILDREN: usize = 8;

/// Kind of a parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Set,
    List,
    Number,
    Boolean,
    Null,
    String,
    Derivation,
    Lambda,
    Primop,
    Ellipsis,
    Repeated,
    Identifier,
    Unknown,
}

impl Kind {
    pub fn is_container(self) -> bool {
        matches!(self, Kind::Set | Kind::List)
    }

    /// Whether a token of this kind may name a set member.
    pub fn is_key(self) -> bool {
        matches!(self, Kind::String | Kind::Identifier)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Set => "set",
            Kind::List => "list",
            Kind::Number => "number",
            Kind::Boolean => "boolean",
            Kind::Null => "null",
            Kind::String => "string",
            Kind::Derivation => "derivation",
            Kind::Lambda => "lambda",
            Kind::Primop => "primop",
            Kind::Ellipsis => "ellipsis",
            Kind::Repeated => "repeated",
            Kind::Identifier => "identifier",
            Kind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a token in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(pub u32);

impl TokenId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an overflow block in the tree's block pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One parsed value or container.
///
/// `start..end` is the byte span in the source: the text between the quotes
/// for strings, the literal for other primitives, and bracket to bracket for
/// containers.  `end` is `None` while a container is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: Kind,
    pub start: u32,
    pub end: Option<u32>,
    /// Values the tokenizer attached to this token: members of a set,
    /// elements of a list, the value of a key.
    pub size: u32,
    pub parent: Option<TokenId>,
    pub(crate) child_count: u32,
    pub(crate) children: [TokenId; INLINE_CHILDREN],
    pub(crate) overflow: Option<BlockId>,
}

impl Token {
    pub(crate) fn new(kind: Kind, start: u32, end: Option<u32>, parent: Option<TokenId>) -> Self {
        Self {
            kind,
            start,
            end,
            size: 0,
            parent,
            child_count: 0,
            children: [TokenId(u32::MAX); INLINE_CHILDREN],
            overflow: None,
        }
    }

    /// A container that has seen its opening bracket but not its closing one.
    pub fn is_open(&self) -> bool {
        self.kind.is_container() && self.end.is_none()
    }

    /// Number of children linked by tree building.
    pub fn child_count(&self) -> usize {
        self.child_count as usize
    }

    pub fn span(&self) -> Option<std::ops::Range<usize>> {
        self.end.map(|end| self.start as usize..end as usize)
    }
}

/// Fixed-size overflow block in a token's child chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildBlock {
    pub(crate) children: [TokenId; BLOCK_CHILDREN],
    pub(crate) next: Option<BlockId>,
}

impl ChildBlock {
    pub(crate) fn empty() -> Self {
        Self {
            children: [TokenId(u32::MAX); BLOCK_CHILDREN],
            next: None,
        }
    }
}

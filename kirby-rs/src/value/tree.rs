//! Navigable tree built from a finished token pool.
//!
//! Building runs in two passes.  The first computes every token's depth in a
//! single forward sweep (a parent always precedes its children in the pool)
//! and buckets tokens by depth with a counting sort.  The second walks the
//! buckets from the deepest level up to level 1 and appends each token to its
//! parent's child list: four slots inline in the token, then a chain of
//! fixed-size overflow blocks.
//!
//! Everything lives in the arena that holds the token pool.

use std::io::{self, Write};

use thiserror::Error;

use crate::arena::{Arena, ArenaError, ArenaVec};

use super::parser::Parser;
use super::token::{BlockId, ChildBlock, Kind, Token, TokenId, BLOCK_CHILDREN, INLINE_CHILDREN};

/// Errors from child navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("no token {0}")]
    NoSuchToken(TokenId),

    #[error("token {parent} has no child {nth}")]
    NoSuchChild { parent: TokenId, nth: usize },

    /// The overflow chain ends before the slot its child count promises.
    #[error("token {parent}: child chain broken before child {nth}")]
    BrokenChain { parent: TokenId, nth: usize },

    #[error("token {id} is a {kind}, not a list")]
    NotAList { id: TokenId, kind: Kind },
}

/// A parsed value tree over borrowed input.
pub struct Tree<'a> {
    input: &'a [u8],
    tokens: ArenaVec<'a, Token>,
    blocks: ArenaVec<'a, ChildBlock>,
    /// Token ids grouped by depth, shallowest first.
    order: ArenaVec<'a, TokenId>,
    /// `levels[d]..levels[d + 1]` is depth `d`'s range in `order`.
    levels: ArenaVec<'a, u32>,
}

impl<'a> Tree<'a> {
    /// Build a tree from a parser that finished successfully over `input`.
    pub fn build(parser: Parser<'a>, input: &'a [u8]) -> Result<Self, ArenaError> {
        let tokens = parser.into_pool();
        let arena = tokens.arena();
        let mut tree = Tree {
            input,
            tokens,
            blocks: ArenaVec::new(arena),
            order: ArenaVec::new(arena),
            levels: ArenaVec::new(arena),
        };
        if tree.tokens.is_empty() {
            return Ok(tree);
        }
        tree.index_depths(arena)?;
        tree.link_children()?;
        tracing::debug!(
            tokens = tree.len(),
            depth = tree.depth_count(),
            blocks = tree.blocks.len(),
            "built tree"
        );
        Ok(tree)
    }

    fn index_depths(&mut self, arena: &'a Arena) -> Result<(), ArenaError> {
        let n = self.tokens.len();
        let mut depth = ArenaVec::<u32>::with_capacity(arena, n)?;
        let mut counts = ArenaVec::<u32>::new(arena);

        for (i, tok) in self.tokens.iter().enumerate() {
            let d = match tok.parent {
                None => 0,
                Some(p) => {
                    debug_assert!(p.index() < i, "parent {p} follows child {i}");
                    depth[p.index()] + 1
                }
            };
            depth.push(d)?;
            while counts.len() <= d as usize {
                counts.push(0)?;
            }
            counts[d as usize] += 1;
        }

        let mut running = 0u32;
        self.levels.push(0)?;
        for &c in counts.iter() {
            running += c;
            self.levels.push(running)?;
        }

        let mut cursor = ArenaVec::<u32>::with_capacity(arena, counts.len())?;
        for &start in &self.levels.as_slice()[..counts.len()] {
            cursor.push(start)?;
        }
        self.order = ArenaVec::from_elem(arena, TokenId(0), n)?;
        for (i, &d) in depth.iter().enumerate() {
            let slot = &mut cursor[d as usize];
            self.order[*slot as usize] = TokenId(i as u32);
            *slot += 1;
        }
        Ok(())
    }

    fn link_children(&mut self) -> Result<(), ArenaError> {
        for d in (1..self.depth_count()).rev() {
            let range = self.levels[d] as usize..self.levels[d + 1] as usize;
            for slot in range {
                let id = self.order[slot];
                if let Some(parent) = self.tokens[id.index()].parent {
                    self.append_child(parent, id)?;
                }
            }
        }
        Ok(())
    }

    fn append_child(&mut self, parent: TokenId, child: TokenId) -> Result<(), ArenaError> {
        let nth = self.tokens[parent.index()].child_count();
        if nth < INLINE_CHILDREN {
            self.tokens[parent.index()].children[nth] = child;
        } else {
            let k = nth - INLINE_CHILDREN;
            let block = self.overflow_block(parent, k / BLOCK_CHILDREN)?;
            self.blocks[block.index()].children[k % BLOCK_CHILDREN] = child;
        }
        self.tokens[parent.index()].child_count += 1;
        Ok(())
    }

    /// The `n`th overflow block of `parent`, extending the chain as needed.
    fn overflow_block(&mut self, parent: TokenId, n: usize) -> Result<BlockId, ArenaError> {
        let mut cur = match self.tokens[parent.index()].overflow {
            Some(b) => b,
            None => {
                let b = self.new_block()?;
                self.tokens[parent.index()].overflow = Some(b);
                b
            }
        };
        for _ in 0..n {
            cur = match self.blocks[cur.index()].next {
                Some(b) => b,
                None => {
                    let b = self.new_block()?;
                    self.blocks[cur.index()].next = Some(b);
                    b
                }
            };
        }
        Ok(cur)
    }

    fn new_block(&mut self) -> Result<BlockId, ArenaError> {
        let index = self.blocks.push(ChildBlock::empty())?;
        Ok(BlockId(index as u32))
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn input(&self) -> &'a [u8] {
        self.input
    }

    pub fn tokens(&self) -> &[Token] {
        self.tokens.as_slice()
    }

    pub fn token(&self, id: TokenId) -> Result<&Token, TreeError> {
        self.tokens.get(id.index()).ok_or(TreeError::NoSuchToken(id))
    }

    /// Source bytes of a token: string contents without quotes, the literal
    /// of other primitives, bracket to bracket for containers.
    pub fn text(&self, id: TokenId) -> &'a [u8] {
        let input = self.input;
        self.tokens
            .get(id.index())
            .and_then(Token::span)
            .and_then(|span| input.get(span))
            .unwrap_or_default()
    }

    /// Number of distinct depths.
    pub fn depth_count(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Tokens at depth `d`, in pool order.
    pub fn level(&self, d: usize) -> &[TokenId] {
        if d >= self.depth_count() {
            return &[];
        }
        &self.order.as_slice()[self.levels[d] as usize..self.levels[d + 1] as usize]
    }

    /// Top-level values.
    pub fn roots(&self) -> &[TokenId] {
        self.level(0)
    }

    /// The first top-level value.
    pub fn root(&self) -> Option<TokenId> {
        self.roots().first().copied()
    }

    /// The `nth` child of `id`.
    pub fn child(&self, id: TokenId, nth: usize) -> Result<TokenId, TreeError> {
        let tok = self.token(id)?;
        if nth >= tok.child_count() {
            return Err(TreeError::NoSuchChild { parent: id, nth });
        }
        if nth < INLINE_CHILDREN {
            return Ok(tok.children[nth]);
        }

        let k = nth - INLINE_CHILDREN;
        let mut link = tok.overflow;
        for _ in 0..k / BLOCK_CHILDREN {
            link = link
                .and_then(|b| self.blocks.get(b.index()))
                .and_then(|block| block.next);
        }
        let block = link
            .and_then(|b| self.blocks.get(b.index()))
            .ok_or(TreeError::BrokenChain { parent: id, nth })?;
        Ok(block.children[k % BLOCK_CHILDREN])
    }

    /// Children of `id` in source order.
    pub fn children(&self, id: TokenId) -> impl Iterator<Item = TokenId> + '_ {
        let count = self.tokens.get(id.index()).map_or(0, Token::child_count);
        (0..count).map_while(move |nth| self.child(id, nth).ok())
    }

    /// Key/value pairs of a set; the value is `None` for a key the input
    /// left without one.
    pub fn members(&self, set: TokenId) -> impl Iterator<Item = (TokenId, Option<TokenId>)> + '_ {
        self.children(set)
            .map(move |key| (key, self.child(key, 0).ok()))
    }

    /// Elements of a list in source order.
    pub fn elements(&self, list: TokenId) -> Result<impl Iterator<Item = TokenId> + '_, TreeError> {
        let kind = self.token(list)?.kind;
        if kind != Kind::List {
            return Err(TreeError::NotAList { id: list, kind });
        }
        Ok(self.children(list))
    }

    /// Write a human-readable listing of every token.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (i, tok) in self.tokens.iter().enumerate() {
            let id = TokenId(i as u32);
            writeln!(out, "TOKEN {id}")?;
            writeln!(out, "  kind:   {}", tok.kind)?;
            writeln!(out, "  start:  {}", tok.start)?;
            match tok.end {
                Some(end) => writeln!(out, "  end:    {end}")?,
                None => writeln!(out, "  end:    -")?,
            }
            writeln!(out, "  size:   {}", tok.size)?;
            match tok.parent {
                Some(p) => writeln!(out, "  parent: {p}")?,
                None => writeln!(out, "  parent: -")?,
            }
            write!(out, "  child: ")?;
            for child in self.children(id) {
                write!(out, " {child}")?;
            }
            writeln!(out)?;
            writeln!(out, "  text:   {}", String::from_utf8_lossy(self.text(id)))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("tokens", &self.len())
            .field("depth", &self.depth_count())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::with_reserve("tree-test", 1 << 24).unwrap()
    }

    fn build<'a>(arena: &'a Arena, input: &'a [u8]) -> Tree<'a> {
        let mut p = Parser::new(arena).unwrap();
        p.parse(input).unwrap();
        Tree::build(p, input).unwrap()
    }

    #[test]
    fn depth_buckets_cover_every_token_once() {
        let a = arena();
        let t = build(&a, b"{ a = [ 1 2 ]; b = { c = 3; }; }");
        assert_eq!(t.depth_count(), 5);
        let mut seen: Vec<u32> = (0..t.depth_count())
            .flat_map(|d| t.level(d).iter().map(|id| id.0))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..t.len() as u32).collect::<Vec<_>>());
        assert_eq!(t.roots(), &[TokenId(0)]);
        // Keys sit at depth 1, their values at depth 2.
        assert_eq!(t.level(1), &[TokenId(1), TokenId(5)]);
        assert_eq!(t.level(2), &[TokenId(2), TokenId(6)]);
    }

    #[test]
    fn depth_is_parent_depth_plus_one() {
        let a = arena();
        let t = build(&a, b"[ [ [ 1 ] 2 ] { x = 3; } ]");
        for d in 1..t.depth_count() {
            for &id in t.level(d) {
                let parent = t.token(id).unwrap().parent.unwrap();
                assert!(t.level(d - 1).contains(&parent));
            }
        }
    }

    #[test]
    fn fourth_child_of_set() {
        let a = arena();
        let t = build(&a, b"{ a = 1; b = 2; c = 3; d = 4; e = 5; }");
        let d = t.child(TokenId(0), 3).unwrap();
        assert_eq!(t.text(d), b"d");
        let e = t.child(TokenId(0), 4).unwrap();
        assert_eq!(t.text(e), b"e");
        assert_eq!(t.text(t.child(e, 0).unwrap()), b"5");
    }

    #[test]
    fn long_list_uses_overflow_blocks() {
        let a = arena();
        let n = INLINE_CHILDREN + 3 * BLOCK_CHILDREN + 2;
        let mut input = String::from("[");
        for i in 0..n {
            input.push_str(&format!(" {i}"));
        }
        input.push_str(" ]");
        let t = build(&a, input.as_bytes());

        let root = t.root().unwrap();
        assert_eq!(t.token(root).unwrap().child_count(), n);
        for i in 0..n {
            let id = t.child(root, i).unwrap();
            assert_eq!(t.text(id), i.to_string().as_bytes());
        }
        assert_eq!(t.children(root).count(), n);
        assert!(matches!(
            t.child(root, n),
            Err(TreeError::NoSuchChild { nth, .. }) if nth == n
        ));
    }

    #[test]
    fn broken_chain_is_reported() {
        let a = arena();
        let mut t = build(&a, b"[ 1 2 3 4 5 6 ]");
        t.tokens[0].overflow = None;
        assert_eq!(t.child(TokenId(0), 3).unwrap(), TokenId(4));
        assert_eq!(
            t.child(TokenId(0), 4),
            Err(TreeError::BrokenChain { parent: TokenId(0), nth: 4 })
        );
        assert_eq!(t.children(TokenId(0)).count(), 4);
    }

    #[test]
    fn leaf_has_no_children() {
        let a = arena();
        let t = build(&a, b"[ 1 ]");
        assert_eq!(
            t.child(TokenId(1), 0),
            Err(TreeError::NoSuchChild { parent: TokenId(1), nth: 0 })
        );
        assert_eq!(t.child(TokenId(9), 0), Err(TreeError::NoSuchToken(TokenId(9))));
    }

    #[test]
    fn elements_of_list_in_order() {
        let a = arena();
        let t = build(&a, b"{ xs = [ 1 \"two\" [ 3 ] 4 5 6 ]; }");
        let list = t.child(TokenId(1), 0).unwrap();
        let texts: Vec<_> = t.elements(list).unwrap().map(|e| t.text(e)).collect();
        assert_eq!(texts, [&b"1"[..], b"two", b"[ 3 ]", b"4", b"5", b"6"]);

        let empty = build(&a, b"[ ]");
        assert_eq!(empty.elements(TokenId(0)).unwrap().count(), 0);
    }

    #[test]
    fn elements_rejects_non_list() {
        let a = arena();
        let t = build(&a, b"{ n = 1; }");
        assert_eq!(
            t.elements(TokenId(0)).err(),
            Some(TreeError::NotAList { id: TokenId(0), kind: Kind::Set })
        );
        assert!(matches!(
            t.elements(TokenId(2)),
            Err(TreeError::NotAList { kind: Kind::Number, .. })
        ));
        assert_eq!(t.elements(TokenId(9)).err(), Some(TreeError::NoSuchToken(TokenId(9))));
    }

    #[test]
    fn members_pair_keys_with_values() {
        let a = arena();
        let t = build(&a, b"{ a = 1; \"b c\" = [ ]; }");
        let pairs: Vec<_> = t
            .members(TokenId(0))
            .map(|(k, v)| (t.text(k).to_vec(), v.map(|v| t.token(v).unwrap().kind)))
            .collect();
        assert_eq!(
            pairs,
            vec![(b"a".to_vec(), Some(Kind::Number)), (b"b c".to_vec(), Some(Kind::List))]
        );
    }

    #[test]
    fn empty_input_builds_empty_tree() {
        let a = arena();
        let t = build(&a, b"");
        assert!(t.is_empty());
        assert_eq!(t.depth_count(), 0);
        assert_eq!(t.root(), None);
        assert!(t.level(0).is_empty());
    }

    #[test]
    fn dump_lists_tokens() {
        let a = arena();
        let t = build(&a, b"{ a = \"x\"; }");
        let mut out = Vec::new();
        t.dump(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("TOKEN 0\n  kind:   set\n"));
        assert!(out.contains("  child:  1\n"));
        assert!(out.contains("TOKEN 2\n  kind:   string\n"));
        assert!(out.contains("  text:   x\n"));
    }
}

//! Parsed REPL values: tokenizer, tree, and path lookup.

mod parser;
mod path;
mod token;
mod tree;

pub use parser::{ParseError, Parser, INITIAL_TOKENS};
pub use path::{split_path, PathError, Value};
pub use token::{BlockId, ChildBlock, Kind, Token, TokenId, BLOCK_CHILDREN, INLINE_CHILDREN};
pub use tree::{Tree, TreeError};

use crate::arena::Arena;

/// Tokenize `input` completely and build its tree.
pub fn parse<'a>(arena: &'a Arena, input: &'a [u8]) -> Result<Tree<'a>, ParseError> {
    let mut parser = Parser::new(arena)?;
    parser.parse(input)?;
    Ok(Tree::build(parser, input)?)
}

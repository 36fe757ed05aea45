//! The filter query language: lexer, parser, compiler and the canonical
//! serializers going back to a string.

pub mod ast;
pub mod compiler;
pub mod edit;
pub mod lexer;
pub mod parser;
pub mod serialize;


pub use ast::{BoolKind, Category, CatuskotiState, ComparisonOp, FilterNode, FilterTree, ParseError};
pub use compiler::{compile_filter_tree, compile_node, CompileOptions, CompiledQuery, DateRange, RegexPattern};
pub use edit::{node_at, remove_at, replace_at};
pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{parse_query, ParseOptions};
pub use serialize::{compiled_query_to_string, to_query_string, tree_to_query_string};

/// Parses `input` without a stack store; every `@name` stays unresolved.
pub fn parse(input: &str) -> FilterTree {
    parse_query(input, &ParseOptions::default())
}

// Source frontend: lexer and recursive-descent parser producing the AST the
// code generator consumes.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::Block;
pub use lexer::SyntaxError;

/// Parse a chunk of source text into its AST.
pub fn parse_chunk(source: &str) -> Result<Block, SyntaxError> {
    parser::Parser::new(source)?.parse_chunk()
}

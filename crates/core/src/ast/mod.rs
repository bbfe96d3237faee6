pub mod lexer;
pub mod parser;
pub mod types;

pub use lexer::{tokenize, Token, TokenKind};
pub use parser::parse_source;
pub use types::*;

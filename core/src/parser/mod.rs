pub mod ast;
pub mod error;
pub mod include;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod syntax;

pub use ast::*;
pub use error::{CompileError, CompileErrorKind, LexError, LexErrorKind};
pub use include::{DirectoryLoader, MemoryLoader, SourceFile, SourceLoader, decode_source};
pub use lexer::{SpannedToken, Token, tokenize};
pub use parser::{DEFAULT_MAX_DEPTH, ParsedUnit, parse, parse_with_max_depth};
pub use syntax::{AssignOp, BinaryOp, FileId, IncDec, LineIndex, Span, UnaryOp};

#[cfg(test)]
mod parse_test;

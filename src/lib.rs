//! Parser front end for a Ruby-like scripting language.
//!
//! [parse] turns source bytes into an [ast::Arena] of nodes rooted at a
//! scope node, reporting problems as [Diagnostic]s.

pub mod ast;
mod diagnostic;
mod parser;
mod symbol;

pub use diagnostic::{Diagnostic, Severity, SourceMap};
pub use parser::{
    parse, InputChunk, MoreInput, ParseError, ParseOptions, ParseResult,
};
pub use symbol::{Interner, Symbol, SymbolTable};

//! Frontend for the control-thread compiler: the AST and the parser
//! that produces it from source files.

pub mod ast;
mod parser;

pub use parser::ThreadParser;

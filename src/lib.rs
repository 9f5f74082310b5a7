//! Tokenizer, block parser and compiler for Golem chat command scripts.
//!
//! ```text
//! $go play twice tt --shuffle && $go volume %level; $go skip
//! ```
//!
//! [`parser::Parser`] splits the input into blocks of command leaves using
//! the [`lexer::Lexer`], and [`compiler::Compiler`] resolves options,
//! variables and inline `:[function(args)]` calls into compiled segments.

pub mod compiler;
pub mod config;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod stream;
pub mod token;

use std::path::PathBuf;
use thiserror::Error;

/// Top level error returned by the `golem` binary.
#[derive(Error, Debug)]
pub enum GolemError {
    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),
    #[error("JsonError: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RegistryError: {0}")]
    Registry(#[from] RegistryError),
    #[error("ParseError: {0}")]
    Parse(#[from] ParseError),
    #[error("CompileError: {0}")]
    Compile(#[from] CompileError),
}

/// Raised by the character stream when a read rule cannot continue.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}\n  --> {line}:{column}")]
pub struct StreamError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl StreamError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("No command in chain: {section:?}")]
    NoCommandInChain { section: String },
    #[error("No commands found in {section:?}")]
    EmptyProgram { section: String },
}

/// Only produced when strict reference checking is enabled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Variable %{name} was never given a value")]
    UnresolvedVariable { name: String },
    #[error("Unknown function {name:?}")]
    UnknownFunction { name: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Cannot read command file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid command definitions: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Command name or alias {0:?} is registered more than once")]
    DuplicateName(String),
    #[error("Command names cannot be empty")]
    EmptyName,
}

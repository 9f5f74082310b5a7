use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

/// Parses text that looks like a plain decimal number (`10`, `-2.5`).
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if NUMBER_RE.is_match(text) {
        text.parse().ok()
    } else {
        None
    }
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct Token {
    pub line: usize,
    pub position: usize,
    pub kind: Kind,
    /// Set for tokens read after `=>`; function calls in alias bodies are
    /// kept unevaluated until the alias is expanded.
    pub inside_alias: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Kind {
    Invoker(String),         // $go
    Command(String),         // canonical registry name
    #[serde(rename = "str")]
    Str(String),             // bare or quoted text
    Number(f64),             // 10, 2.5
    Option(OptionToken),     // --name, --name=value
    Variable(String),        // %name
    Function(FunctionCall),  // :[name(args)]
    Punctuation(char),       // , ( ) { } [ ]
    AliasDef,                // =>
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct OptionToken {
    /// Flag name without leading dashes.
    pub name: String,
    pub value: OptionValue,
    /// Source text, e.g. `--quote_opt="I can have spaces!"`.
    pub raw: String,
}

#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag,
    Text(String),
    Call(FunctionCall),
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub params: Vec<Kind>,
    /// Source text, e.g. `:[random(a;b)]`.
    pub raw: String,
}

impl Token {
    pub fn is_command(&self) -> bool {
        matches!(self.kind, Kind::Command(_))
    }

    pub fn command_name(&self) -> Option<&str> {
        match &self.kind {
            Kind::Command(name) => Some(name),
            _ => None,
        }
    }
}

impl Kind {
    /// Source-like text, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Kind::Invoker(text) | Kind::Command(text) | Kind::Str(text) => text.clone(),
            Kind::Number(n) => n.to_string(),
            Kind::Option(option) => option.raw.clone(),
            Kind::Variable(name) => format!("%{}", name),
            Kind::Function(call) => call.raw.clone(),
            Kind::Punctuation(ch) => ch.to_string(),
            Kind::AliasDef => "=>".to_string(),
        }
    }
}

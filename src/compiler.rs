//! Turns a parse result into compiled command segments.
//!
//! Each leaf is compiled left to right. Options feed a value table scoped to
//! the whole compile, and `%variables` read from it; a variable used before
//! the option that defines it is retried after the first pass over its leaf.

use crate::error::CompileError;
use crate::functions::FunctionRegistry;
use crate::lexer::{needs_quotes, quote, FUNCTION_PREFIX};
use crate::parser::{scan_separators, AstParseResult, AstTokenLeaf, BlockType, Separator};
use crate::registry::CommandRegistry;
use crate::resolver::{resolve_segment, CommandInstance};
use crate::token::{parse_number, FunctionCall, Kind, OptionToken, OptionValue, Token};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

/// Circuit breaker for forward-referenced variables. Unresolvable references
/// give up after this many retry passes.
pub const MAX_DELAYED_PASSES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Fail on unresolved variables and unknown functions instead of
    /// leaving them out.
    pub strict_references: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// `"true"`/`"false"` become booleans, plain numbers become numbers.
    pub fn coerce(raw: &str) -> Self {
        match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => match parse_number(raw) {
                Some(number) => Value::Number(number),
                None => Value::Text(raw.to_string()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledScriptSegment {
    pub src_leaf: AstTokenLeaf,
    /// Position of the source block.
    pub index: usize,
    pub block_type: BlockType,
    pub compiled: String,
    pub command: String,
    pub options: BTreeMap<String, Value>,
    pub variables: BTreeMap<String, Value>,
    pub instance: Option<CommandInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledGolemScript {
    pub raw: String,
    pub segments: Vec<CompiledScriptSegment>,
}

/// Compiled form of one token.
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    /// Plain value when the token is a command argument.
    argument: Option<String>,
}

impl Piece {
    fn syntax(text: String) -> Self {
        Self {
            text,
            argument: None,
        }
    }

    fn argument(value: String) -> Self {
        let text = if needs_quotes(&value) {
            quote(&value)
        } else {
            value.clone()
        };
        Self {
            text,
            argument: Some(value),
        }
    }

    /// Numbers and booleans are written bare.
    fn value(value: &Value) -> Self {
        match value {
            Value::Text(text) => Self::argument(text.clone()),
            other => Self {
                text: other.to_string(),
                argument: Some(other.to_string()),
            },
        }
    }
}

/// Option values only need quoting when a bare read would cut them short.
fn quote_option_value(raw: &str) -> String {
    let breaks = raw.is_empty()
        || raw.starts_with(FUNCTION_PREFIX)
        || raw.contains("&&")
        || raw
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '"' | '\\' | ';'));
    if breaks {
        quote(raw)
    } else {
        raw.to_string()
    }
}

/// Accumulates one leaf's results; dropped when the leaf is done.
#[derive(Debug, Default)]
struct SegmentBuilder {
    command: String,
    options: BTreeMap<String, Value>,
    variables: BTreeMap<String, Value>,
}

pub struct Compiler<'a> {
    registry: &'a CommandRegistry,
    functions: &'a FunctionRegistry,
    options: CompilerOptions,
    values: HashMap<String, Value>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        registry: &'a CommandRegistry,
        functions: &'a FunctionRegistry,
        options: CompilerOptions,
    ) -> Self {
        Self {
            registry,
            functions,
            options,
            values: HashMap::new(),
        }
    }

    pub fn compile(&mut self, parsed: &AstParseResult) -> Result<CompiledGolemScript, CompileError> {
        self.values.clear();

        let mut separators: VecDeque<Separator> = scan_separators(&parsed.raw)
            .into_iter()
            .map(|(_, separator)| separator)
            .collect();
        let mut segments = Vec::new();

        for (index, block) in parsed.blocks.iter().enumerate() {
            for leaf in block.commands.values() {
                let separator = separators.pop_front();
                segments.push(self.compile_tokens(leaf, index, block.block_type, separator)?);
            }
        }

        let raw = segments
            .iter()
            .map(|segment| segment.compiled.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(CompiledGolemScript { raw, segments })
    }

    fn compile_tokens(
        &mut self,
        leaf: &AstTokenLeaf,
        index: usize,
        block_type: BlockType,
        separator: Option<Separator>,
    ) -> Result<CompiledScriptSegment, CompileError> {
        let tokens = leaf.ordered_tokens();
        let mut segment = SegmentBuilder::default();
        let mut results: Vec<Option<Piece>> = Vec::with_capacity(tokens.len());
        let mut delayed = Vec::new();

        for (position, token) in tokens.iter().enumerate() {
            let result = self.compile_leaf(token, &mut segment)?;
            if result.is_none() && matches!(token.kind, Kind::Variable(_)) {
                delayed.push(position);
            }
            results.push(result);
        }

        self.resolve_delayed(&tokens, &mut results, delayed, &mut segment)?;

        let mut compiled = results
            .iter()
            .flatten()
            .map(|piece| piece.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        match separator {
            Some(Separator::Chain) => compiled.push_str(" &&"),
            Some(Separator::Sequence) => compiled.push(';'),
            None => {}
        }

        let arguments: Vec<String> = results
            .iter()
            .skip(leaf.command_index + 1)
            .flatten()
            .filter_map(|piece| piece.argument.clone())
            .collect();
        let instance = resolve_segment(self.registry, &segment.command, &arguments);

        Ok(CompiledScriptSegment {
            src_leaf: leaf.clone(),
            index,
            block_type,
            compiled,
            command: segment.command,
            options: segment.options,
            variables: segment.variables,
            instance,
        })
    }

    /// Retries variables that had no value on the first pass.
    fn resolve_delayed(
        &mut self,
        tokens: &[&Token],
        results: &mut [Option<Piece>],
        mut delayed: Vec<usize>,
        segment: &mut SegmentBuilder,
    ) -> Result<(), CompileError> {
        let mut passes = 0;

        while !delayed.is_empty() && passes < MAX_DELAYED_PASSES {
            passes += 1;
            let mut unresolved = Vec::new();

            for &position in &delayed {
                let Some(token) = tokens.get(position) else {
                    continue;
                };
                match self.compile_leaf(token, segment)? {
                    Some(piece) => {
                        if let Some(slot) = results.get_mut(position) {
                            *slot = Some(piece);
                        }
                    }
                    None => unresolved.push(position),
                }
            }

            log::trace!("Delayed pass {}: {} variables left", passes, unresolved.len());
            if unresolved == delayed {
                break;
            }
            delayed = unresolved;
        }

        if self.options.strict_references {
            if let Some(Kind::Variable(name)) = delayed
                .first()
                .and_then(|position| tokens.get(*position))
                .map(|token| &token.kind)
            {
                return Err(CompileError::UnresolvedVariable { name: name.clone() });
            }
        }

        Ok(())
    }

    fn compile_leaf(
        &mut self,
        token: &Token,
        segment: &mut SegmentBuilder,
    ) -> Result<Option<Piece>, CompileError> {
        let piece = match &token.kind {
            Kind::Invoker(text) => Some(Piece::syntax(text.clone())),
            Kind::Command(name) => {
                segment.command = name.clone();
                Some(Piece::syntax(name.clone()))
            }
            Kind::Str(text) => Some(Piece::argument(text.clone())),
            Kind::Number(number) => Some(Piece::value(&Value::Number(*number))),
            Kind::Punctuation(ch) => Some(Piece::syntax(ch.to_string())),
            Kind::AliasDef => Some(Piece::syntax("=>".to_string())),
            Kind::Function(call) if token.inside_alias => Some(Piece::syntax(call.raw.clone())),
            Kind::Function(call) => self.call_function(call)?.map(Piece::argument),
            Kind::Option(option) => self
                .compile_option(option, token.inside_alias, segment)?
                .map(Piece::syntax),
            Kind::Variable(name) if token.inside_alias => Some(Piece::syntax(format!("%{}", name))),
            Kind::Variable(name) => match self.values.get(name) {
                Some(value) => {
                    segment.variables.insert(name.clone(), value.clone());
                    Some(Piece::value(value))
                }
                None => None,
            },
        };

        Ok(piece)
    }

    /// Records the option and returns its compiled text.
    fn compile_option(
        &mut self,
        option: &OptionToken,
        inside_alias: bool,
        segment: &mut SegmentBuilder,
    ) -> Result<Option<String>, CompileError> {
        let dashes: String = option.raw.chars().take_while(|ch| *ch == '-').collect();

        let (value, text) = match &option.value {
            OptionValue::Flag => (Value::Bool(true), option.raw.clone()),
            OptionValue::Call(_) if inside_alias => return Ok(Some(option.raw.clone())),
            OptionValue::Call(call) => match self.call_function(call)? {
                Some(result) => {
                    let text = format!("{}{}={}", dashes, option.name, quote(&result));
                    (Value::coerce(&result), text)
                }
                None => return Ok(None),
            },
            OptionValue::Text(raw) => {
                let text = format!("{}{}={}", dashes, option.name, quote_option_value(raw));
                (Value::coerce(raw), text)
            }
        };

        segment.options.insert(option.name.clone(), value.clone());
        self.values.insert(option.name.clone(), value);

        Ok(Some(text))
    }

    fn call_function(&self, call: &FunctionCall) -> Result<Option<String>, CompileError> {
        let mut args = Vec::with_capacity(call.params.len());
        for param in &call.params {
            args.push(self.param_value(param)?);
        }

        match self.functions.call(&call.name, &args) {
            Some(result) => Ok(Some(result)),
            None if self.options.strict_references => Err(CompileError::UnknownFunction {
                name: call.name.clone(),
            }),
            None => {
                log::warn!("Unknown function {:?} in {}", call.name, call.raw);
                Ok(None)
            }
        }
    }

    fn param_value(&self, param: &Kind) -> Result<String, CompileError> {
        let value = match param {
            Kind::Function(call) => self.call_function(call)?.unwrap_or_default(),
            Kind::Variable(name) => match self.values.get(name) {
                Some(value) => value.to_string(),
                None if self.options.strict_references => {
                    return Err(CompileError::UnresolvedVariable { name: name.clone() })
                }
                None => String::new(),
            },
            Kind::Str(text) => text.clone(),
            other => other.describe(),
        };

        Ok(value)
    }
}

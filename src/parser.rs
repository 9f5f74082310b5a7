use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::registry::CommandRegistry;
use crate::token::Token;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::ops::Range;

lazy_static! {
    static ref SEPARATOR_RE: Regex = Regex::new(r"&&|;").unwrap();
}

/// Circuit breaker: no well-formed command needs more token reads than this.
/// It is not a tuning knob.
pub const MAX_COMMAND_READS: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParserOptions {
    /// Raise on invalid chains and empty sections instead of dropping them.
    pub strict: bool,
    /// Treat the whole input as an alias body.
    pub inside_alias: bool,
    pub sigil: char,
    pub invoker_keyword: String,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            strict: false,
            inside_alias: false,
            sigil: '$',
            invoker_keyword: String::from("go"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Solo,
    AndBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Separator {
    /// `;`
    Sequence,
    /// `&&`
    Chain,
}

/// One command occurrence. The command token is held apart from the other
/// tokens; `command_index` remembers where it sat among them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AstTokenLeaf {
    pub tokens: Vec<Token>,
    pub command: Option<Token>,
    pub command_index: usize,
}

impl AstTokenLeaf {
    fn push(&mut self, token: Token) {
        if token.is_command() && self.command.is_none() {
            self.command_index = self.tokens.len();
            self.command = Some(token);
        } else {
            self.tokens.push(token);
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.command.is_none()
    }

    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    /// All tokens in source order, command included.
    pub fn ordered_tokens(&self) -> Vec<&Token> {
        let mut ordered: Vec<&Token> = self.tokens.iter().collect();
        if let Some(command) = &self.command {
            ordered.insert(self.command_index.min(ordered.len()), command);
        }
        ordered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AstBlock {
    pub raw: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub commands: BTreeMap<usize, AstTokenLeaf>,
}

impl AstBlock {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn has_command(&self) -> bool {
        self.commands.values().any(AstTokenLeaf::has_command)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionError {
    #[serde(serialize_with = "serialize_display")]
    pub error: ParseError,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AstParseResult {
    pub raw: String,
    pub blocks: Vec<AstBlock>,
    pub errors: Vec<SectionError>,
}

impl AstParseResult {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn serialize_display<S: Serializer>(error: &ParseError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

pub struct Parser<'a> {
    raw: String,
    registry: &'a CommandRegistry,
    options: &'a ParserOptions,
}

impl<'a> Parser<'a> {
    pub fn new(raw: &str, registry: &'a CommandRegistry, options: &'a ParserOptions) -> Self {
        Self {
            raw: raw.to_string(),
            registry,
            options,
        }
    }

    /// Parses every `;` section. A failing section is recorded in `errors`
    /// and the others carry on; only strict-mode chain and empty-section
    /// errors abort the whole parse.
    pub fn parse(&self) -> Result<AstParseResult, ParseError> {
        let mut blocks = Vec::new();
        let mut errors = Vec::new();

        let sections = split_sections(&self.raw);
        log::debug!("Split {:?} into {} sections", self.raw, sections.len());

        for section in sections {
            if section.trim().is_empty() {
                continue;
            }

            match self.parse_one(section) {
                Ok(block) => blocks.push(block),
                Err(err @ ParseError::Stream(_)) => {
                    log::warn!("Skipping section {:?}: {}", section, err);
                    errors.push(SectionError {
                        error: err,
                        raw: section.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        blocks.retain(AstBlock::has_command);

        Ok(AstParseResult {
            raw: self.raw.clone(),
            blocks,
            errors,
        })
    }

    fn parse_one(&self, section: &str) -> Result<AstBlock, ParseError> {
        let block_type = if scan_separators(section)
            .iter()
            .any(|(_, separator)| *separator == Separator::Chain)
        {
            BlockType::AndBlock
        } else {
            BlockType::Solo
        };

        let mut lexer = Lexer::new(section, self.registry, self.options);
        let mut leaves = Vec::new();

        loop {
            let leaf = Self::get_command(&mut lexer)?;
            if leaf.is_empty() {
                break;
            }
            leaves.push(leaf);
            lexer.finish_command();
        }

        if block_type == BlockType::AndBlock && !leaves.iter().all(AstTokenLeaf::has_command) {
            if self.options.strict {
                return Err(ParseError::NoCommandInChain {
                    section: section.trim().to_string(),
                });
            }
            log::debug!("Dropping chain without a command in every link: {:?}", section);
            return Ok(AstBlock {
                raw: section.to_string(),
                block_type,
                commands: BTreeMap::new(),
            });
        }

        let commands: BTreeMap<usize, AstTokenLeaf> = leaves
            .into_iter()
            .enumerate()
            .filter(|(_, leaf)| leaf.has_command())
            .collect();

        if self.options.strict && commands.is_empty() {
            return Err(ParseError::EmptyProgram {
                section: section.trim().to_string(),
            });
        }

        Ok(AstBlock {
            raw: section.to_string(),
            block_type,
            commands,
        })
    }

    fn get_command(lexer: &mut Lexer<'_>) -> Result<AstTokenLeaf, ParseError> {
        let mut leaf = AstTokenLeaf::default();
        let mut reads = 0;

        while let Some(token) = lexer.next()? {
            leaf.push(token);
            reads += 1;

            if reads >= MAX_COMMAND_READS {
                if lexer.peek()?.is_some() {
                    log::warn!("Command exceeded {} tokens, dropping the rest", MAX_COMMAND_READS);
                    lexer.skip_command();
                }
                break;
            }
        }

        Ok(leaf)
    }
}

/// Byte ranges that separators cannot split: quoted text, `:[...]` calls
/// and backslash escapes.
pub fn protected_spans(raw: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut chars = raw.char_indices().peekable();
    let mut previous: Option<char> = None;

    while let Some((start, ch)) = chars.next() {
        match ch {
            '\\' => {
                if let Some((i, escaped)) = chars.next() {
                    spans.push(start..i + escaped.len_utf8());
                }
            }
            '"' if previous.map_or(true, |p| p.is_whitespace() || "=(,;".contains(p)) => {
                let mut end = raw.len();
                while let Some((i, c)) = chars.next() {
                    if c == '\\' {
                        chars.next();
                    } else if c == '"' {
                        end = i + 1;
                        break;
                    }
                }
                spans.push(start..end);
            }
            ':' if chars.peek().map(|(_, c)| *c) == Some('[') => {
                let mut end = raw.len();
                let mut depth = 0usize;
                let mut quoted = false;
                while let Some((i, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => quoted = !quoted,
                        '[' if !quoted => depth += 1,
                        ']' if !quoted => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                end = i + 1;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                spans.push(start..end);
            }
            _ => {}
        }
        previous = Some(ch);
    }

    spans
}

/// Every top level `;` and `&&`, left to right.
pub fn scan_separators(raw: &str) -> Vec<(Range<usize>, Separator)> {
    let spans = protected_spans(raw);

    SEPARATOR_RE
        .find_iter(raw)
        .filter(|m| !spans.iter().any(|span| span.contains(&m.start())))
        .map(|m| {
            let separator = if m.as_str() == ";" {
                Separator::Sequence
            } else {
                Separator::Chain
            };
            (m.range(), separator)
        })
        .collect()
}

pub fn split_sections(raw: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;

    for (range, separator) in scan_separators(raw) {
        if separator == Separator::Sequence {
            sections.push(raw.get(start..range.start).unwrap_or_default());
            start = range.end;
        }
    }
    sections.push(raw.get(start..).unwrap_or_default());

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Kind;

    fn parse(raw: &str) -> AstParseResult {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions::default();
        Parser::new(raw, &registry, &options).parse().unwrap()
    }

    fn parse_strict(raw: &str) -> Result<AstParseResult, ParseError> {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions {
            strict: true,
            ..ParserOptions::default()
        };
        Parser::new(raw, &registry, &options).parse()
    }

    #[test]
    fn test_single_command_tokens() {
        let result = parse("$go play twice tt");
        assert_eq!(result.len(), 1);
        let block = &result.blocks[0];
        assert_eq!(block.block_type, BlockType::Solo);

        let leaf = &block.commands[&0];
        assert_eq!(leaf.len(), 2);
        assert_eq!(leaf.tokens[0].kind, Kind::Invoker("$go".to_string()));
        assert_eq!(leaf.tokens[1].kind, Kind::Str("twice tt".to_string()));
        assert_eq!(leaf.command.as_ref().and_then(Token::command_name), Some("play"));
        assert_eq!(leaf.command_index, 1);
    }

    #[test]
    fn test_sections_are_isolated() {
        let result = parse("$go play a ;; $go badcommand");
        assert_eq!(result.len(), 1);
        assert_eq!(result.blocks[0].raw, "$go play a ");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].raw, " $go badcommand");
        assert!(matches!(result.errors[0].error, ParseError::Stream(_)));
    }

    #[test]
    fn test_and_block_with_commands() {
        let result = parse("$go play a && $go skip");
        assert_eq!(result.len(), 1);
        let block = &result.blocks[0];
        assert_eq!(block.block_type, BlockType::AndBlock);
        assert_eq!(block.len(), 2);
        assert!(block.commands.values().all(AstTokenLeaf::has_command));
    }

    #[test]
    fn test_invalid_and_block_lenient() {
        let result = parse("$go play a && not a command");
        assert!(result.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_invalid_and_block_strict() {
        let err = parse_strict("$go play a && not a command").unwrap_err();
        assert!(matches!(err, ParseError::NoCommandInChain { .. }));
    }

    #[test]
    fn test_empty_section_strict() {
        let err = parse_strict("$go skip; just chatting").unwrap_err();
        assert_eq!(
            err,
            ParseError::EmptyProgram {
                section: "just chatting".to_string()
            }
        );
        assert!(parse_strict("$go skip; $go stop").is_ok());
    }

    #[test]
    fn test_leaves_without_command_are_pruned() {
        let result = parse("hello there");
        assert!(result.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_sequence_of_sections() {
        let result = parse("$go pause; $go volume 40;$go resume");
        let commands: Vec<&str> = result
            .blocks
            .iter()
            .flat_map(|block| block.commands.values())
            .filter_map(|leaf| leaf.command.as_ref().and_then(Token::command_name))
            .collect();
        assert_eq!(commands, vec!["pause", "volume", "resume"]);
    }

    #[test]
    fn test_semicolon_inside_call_does_not_split() {
        let result = parse("$go play x --pick=:[random(a;b)]");
        assert_eq!(result.len(), 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.blocks[0].raw, "$go play x --pick=:[random(a;b)]");
    }

    #[test]
    fn test_read_cap_drops_the_rest_of_a_command() {
        let many = (0..30).map(|i| format!("--o{}", i)).collect::<Vec<_>>().join(" ");
        let result = parse(&format!("$go play x {} && $go skip", many));
        let block = &result.blocks[0];
        assert_eq!(block.len(), 2);
        assert_eq!(block.commands[&0].len() + 1, MAX_COMMAND_READS);
        assert_eq!(
            block.commands[&1].command.as_ref().and_then(Token::command_name),
            Some("skip")
        );
    }

    #[test]
    fn test_chain_directly_after_a_token() {
        for raw in [
            "$go play %x&& $go skip",
            "$go play --a=b&& $go skip",
            "$go play --flag&& $go skip",
            "$go volume 5&& $go skip",
            "$go play a&& $go skip",
        ] {
            let result = parse(raw);
            assert_eq!(result.len(), 1, "{:?}", raw);
            let block = &result.blocks[0];
            assert_eq!(block.block_type, BlockType::AndBlock, "{:?}", raw);
            assert_eq!(block.len(), 2, "{:?}", raw);
            assert_eq!(
                block.commands[&1].command.as_ref().and_then(Token::command_name),
                Some("skip"),
                "{:?}",
                raw
            );
        }
    }

    #[test]
    fn test_scan_separators_skips_protected_text() {
        let found: Vec<Separator> = scan_separators(r#"a; "b; c" && :[f(x;y)] \; d"#)
            .into_iter()
            .map(|(_, separator)| separator)
            .collect();
        assert_eq!(found, vec![Separator::Sequence, Separator::Chain]);
    }

    #[test]
    fn test_split_sections() {
        assert_eq!(split_sections("a;;b"), vec!["a", "", "b"]);
        assert_eq!(split_sections("a && b"), vec!["a && b"]);
    }

    #[test]
    fn test_apostrophe_quote_does_not_protect() {
        // a quote inside a word is plain text
        assert_eq!(split_sections(r#"it"s; x"#), vec![r#"it"s"#, " x"]);
    }
}

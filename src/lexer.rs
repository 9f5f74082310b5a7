use crate::error::StreamError;
use crate::parser::ParserOptions;
use crate::registry::CommandRegistry;
use crate::stream::Stream;
use crate::token::{parse_number, FunctionCall, Kind, OptionToken, OptionValue, Token};

pub const FUNCTION_PREFIX: &str = ":[";
pub const ALIAS_MARKER: &str = "=>";

pub struct Lexer<'a> {
    stream: Stream,
    registry: &'a CommandRegistry,
    options: &'a ParserOptions,
    peeked: Option<Option<Token>>,
    // Per-command state, reset by `finish_command`. `in_alias_body` is only
    // set by `=>`; `ParserOptions::inside_alias` flags tokens without
    // turning off command matching.
    seen_command: bool,
    expect_command: bool,
    in_alias_body: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &str, registry: &'a CommandRegistry, options: &'a ParserOptions) -> Self {
        Self {
            stream: Stream::new(input),
            registry,
            options,
            peeked: None,
            seen_command: false,
            expect_command: false,
            in_alias_body: false,
        }
    }

    /// Returns the next token without consuming it. `None` means the current
    /// command has no more tokens.
    pub fn peek(&mut self) -> Result<Option<&Token>, StreamError> {
        if self.peeked.is_none() {
            let token = self.read_next()?;
            self.peeked = Some(token);
        }

        Ok(self.peeked.as_ref().and_then(Option::as_ref))
    }

    pub fn next(&mut self) -> Result<Option<Token>, StreamError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.read_next(),
        }
    }

    /// Steps over the `;` or `&&` ending the current command and resets the
    /// per-command state for the next one.
    pub fn finish_command(&mut self) {
        self.peeked = None;
        self.stream.skip_whitespace();

        if self.stream.starts_with("&&") {
            self.stream.advance_by(2);
        } else if self.stream.peek() == Some(';') {
            self.stream.next();
        }

        self.stream.skip_whitespace();
        self.seen_command = false;
        self.expect_command = false;
        self.in_alias_body = false;
    }

    /// Drops the rest of the current command.
    pub fn skip_command(&mut self) {
        self.peeked = None;
        self.stream.skip_to_eoc();
    }

    pub fn is_eof(&self) -> bool {
        self.stream.eof()
    }

    fn read_next(&mut self) -> Result<Option<Token>, StreamError> {
        self.stream.skip_whitespace();
        if self.stream.eoc() {
            return Ok(None);
        }

        let line = self.stream.line();
        let position = self.stream.column();
        let inside_alias = self.options.inside_alias || self.in_alias_body;

        let kind = match self.read_token()? {
            Some(kind) => kind,
            None => {
                // A null token ends the command.
                self.stream.skip_to_eoc();
                return Ok(None);
            }
        };

        if self.expect_command {
            self.expect_command = false;
            if !matches!(kind, Kind::Command(_)) {
                let text = kind.describe();
                let word = text.split_whitespace().next().unwrap_or_default();
                return Err(StreamError::new(
                    format!("Unknown command {:?}", word),
                    line + 1,
                    position + 1,
                ));
            }
        }

        match kind {
            Kind::Invoker(_) if !self.in_alias_body && !self.seen_command => {
                self.expect_command = true;
            }
            Kind::Command(_) => self.seen_command = true,
            Kind::AliasDef => self.in_alias_body = true,
            _ => {}
        }

        Ok(Some(Token {
            line,
            position,
            kind,
            inside_alias,
        }))
    }

    fn read_token(&mut self) -> Result<Option<Kind>, StreamError> {
        let ch = match self.stream.peek() {
            Some(ch) => ch,
            None => return Ok(None),
        };

        if ch.is_ascii_digit() {
            return Ok(Some(self.read_number()));
        }
        if ch == self.options.sigil {
            return Ok(self.read_invoker());
        }
        if is_option_start(self.stream.rest()) {
            return self.read_option().map(Some);
        }
        if is_variable_start(self.stream.rest()) {
            return Ok(Some(self.read_variable()));
        }
        if self.stream.starts_with(FUNCTION_PREFIX) {
            return read_function(&mut self.stream).map(|call| Some(Kind::Function(call)));
        }
        if self.stream.starts_with(ALIAS_MARKER) {
            self.stream.advance_by(ALIAS_MARKER.len());
            return Ok(Some(Kind::AliasDef));
        }
        if is_punctuation(ch) {
            self.stream.next();
            return Ok(Some(Kind::Punctuation(ch)));
        }
        if let Some(name) = self.match_command() {
            return Ok(Some(Kind::Command(name)));
        }
        if ch == ';' {
            return Err(self.stream.croak("Unexpected ';' inside a command"));
        }

        self.read_string().map(|text| Some(Kind::Str(text)))
    }

    fn read_number(&mut self) -> Kind {
        let mut number = String::new();
        let mut seen_dot = false;

        while let Some(ch) = self.stream.peek() {
            if ch.is_ascii_digit() {
                number.push(ch);
            } else if ch == '.'
                && !seen_dot
                && self.stream.peek_next().map_or(false, |c| c.is_ascii_digit())
            {
                seen_dot = true;
                number.push(ch);
            } else {
                break;
            }
            self.stream.next();
        }

        Kind::Number(number.parse().unwrap_or_default())
    }

    /// `$go` / `$` is the invoker; `$play` is shorthand for `$go play`.
    fn read_invoker(&mut self) -> Option<Kind> {
        let sigil = self.options.sigil;
        let mut text = String::new();
        if let Some(ch) = self.stream.next() {
            text.push(ch);
        }
        while let Some(ch) = self.stream.peek() {
            if !(ch.is_alphanumeric() || ch == '_') {
                break;
            }
            text.push(ch);
            self.stream.next();
        }

        let word = text.strip_prefix(sigil).unwrap_or(&text);
        if word.is_empty() || word.eq_ignore_ascii_case(&self.options.invoker_keyword) {
            return Some(Kind::Invoker(text));
        }
        if self.seen_command || self.in_alias_body {
            return Some(Kind::Str(text));
        }

        match self.registry.resolve(word) {
            Some(command) => Some(Kind::Command(command.name.clone())),
            None => {
                log::debug!("Shorthand invoker {:?} does not name a command", text);
                None
            }
        }
    }

    fn read_option(&mut self) -> Result<Kind, StreamError> {
        let mut raw = String::new();
        while self.stream.peek() == Some('-') {
            raw.push('-');
            self.stream.next();
        }

        let mut name = String::new();
        while let Some(ch) = self.stream.peek() {
            if ch == '=' || ch.is_whitespace() || self.stream.eoc() {
                break;
            }
            name.push(ch);
            self.stream.next();
        }
        raw.push_str(&name);

        if self.stream.peek() != Some('=') {
            return Ok(Kind::Option(OptionToken {
                name,
                value: OptionValue::Flag,
                raw,
            }));
        }
        self.stream.next();
        raw.push('=');

        let value = if self.stream.peek() == Some('"') {
            let (text, source) = read_quoted(&mut self.stream)?;
            raw.push_str(&source);
            OptionValue::Text(text)
        } else if self.stream.starts_with(FUNCTION_PREFIX) {
            let call = read_function(&mut self.stream)?;
            raw.push_str(&call.raw);
            OptionValue::Call(call)
        } else {
            let text = self.read_bare();
            raw.push_str(&text);
            OptionValue::Text(text)
        };

        Ok(Kind::Option(OptionToken { name, value, raw }))
    }

    fn read_variable(&mut self) -> Kind {
        self.stream.next();

        let mut name = String::new();
        while let Some(ch) = self.stream.peek() {
            if ch.is_whitespace() || self.stream.eoc() {
                break;
            }
            name.push(ch);
            self.stream.next();
        }
        Kind::Variable(name)
    }

    /// Longest registered name at the cursor that ends on a word boundary.
    fn match_command(&mut self) -> Option<String> {
        if self.seen_command || self.in_alias_body {
            return None;
        }

        let registry = self.registry;
        let rest = self.stream.rest();
        let (length, word) = registry
            .matches(rest)
            .into_iter()
            .filter(|(length, _)| is_word_end(rest.get(*length..).unwrap_or(&[])))
            .last()?;
        let name = registry.resolve(word)?.name.clone();

        self.stream.advance_by(length);
        Some(name)
    }

    fn read_string(&mut self) -> Result<String, StreamError> {
        if self.stream.peek() == Some('"') {
            return read_quoted(&mut self.stream).map(|(text, _)| text);
        }
        Ok(self.read_bare())
    }

    /// Unquoted text up to the end of the command or the next token start.
    fn read_bare(&mut self) -> String {
        let mut text = String::new();

        while !self.stream.eoc() {
            let ch = match self.stream.peek() {
                Some(ch) => ch,
                None => break,
            };
            if ch.is_whitespace() && self.token_follows() {
                break;
            }

            self.stream.next();
            if ch == '\\' {
                if let Some(escaped) = self.stream.next() {
                    text.push(escaped);
                }
                continue;
            }
            text.push(ch);
        }

        text.trim_end().to_string()
    }

    fn token_follows(&self) -> bool {
        let rest = self.stream.rest();
        let blank = rest.iter().take_while(|ch| ch.is_whitespace()).count();
        starts_token(rest.get(blank..).unwrap_or(&[]))
    }
}

/// Reads a `"..."` literal; returns the unescaped text and the source text.
pub fn read_quoted(stream: &mut Stream) -> Result<(String, String), StreamError> {
    let mut text = String::new();
    let mut source = String::new();

    if let Some(quote) = stream.next() {
        source.push(quote);
    }

    loop {
        match stream.next() {
            None => return Err(stream.croak("Unterminated string")),
            Some('\\') => {
                source.push('\\');
                match stream.next() {
                    Some(escaped) => {
                        source.push(escaped);
                        text.push(escaped);
                    }
                    None => return Err(stream.croak("Unterminated string")),
                }
            }
            Some('"') => {
                source.push('"');
                break;
            }
            Some(ch) => {
                source.push(ch);
                text.push(ch);
            }
        }
    }

    Ok((text, source))
}

/// Reads `:[name(arg, arg; ...)]`.
pub fn read_function(stream: &mut Stream) -> Result<FunctionCall, StreamError> {
    let mut raw = String::from(FUNCTION_PREFIX);
    stream.advance_by(FUNCTION_PREFIX.len());

    let mut name = String::new();
    while let Some(ch) = stream.peek() {
        if ch == '(' || ch == ']' || ch.is_whitespace() {
            break;
        }
        name.push(ch);
        stream.next();
    }
    if name.is_empty() {
        return Err(stream.croak("Missing function name after ':['"));
    }
    raw.push_str(&name);

    let mut args = String::new();
    if stream.peek() == Some('(') {
        stream.next();
        raw.push('(');

        let mut depth = 0usize;
        let mut quoted = false;
        loop {
            let ch = match stream.next() {
                Some(ch) => ch,
                None => return Err(stream.croak(format!("Unterminated call to {}", name))),
            };
            raw.push(ch);

            match ch {
                '\\' => {
                    args.push(ch);
                    if let Some(escaped) = stream.next() {
                        raw.push(escaped);
                        args.push(escaped);
                    }
                    continue;
                }
                '"' => quoted = !quoted,
                '(' | '[' if !quoted => depth += 1,
                ')' if !quoted && depth == 0 => break,
                ')' | ']' if !quoted => depth = depth.saturating_sub(1),
                _ => {}
            }
            args.push(ch);
        }
    }

    if stream.next() != Some(']') {
        return Err(stream.croak(format!("Expected ']' to close call to {}", name)));
    }
    raw.push(']');

    let params = split_params(&args)
        .into_iter()
        .map(|param| parse_param(&param))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FunctionCall { name, params, raw })
}

/// Splits call arguments on top level `,` or `;`.
fn split_params(args: &str) -> Vec<String> {
    if args.trim().is_empty() {
        return Vec::new();
    }

    let mut params = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut chars = args.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if !quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                continue;
            }
            '\\' => {
                current.push(ch);
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                continue;
            }
            '"' => quoted = !quoted,
            '(' | '[' if !quoted => depth += 1,
            ')' | ']' if !quoted => depth = depth.saturating_sub(1),
            ',' | ';' if !quoted && depth == 0 => {
                params.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    params.push(current.trim().to_string());

    params
}

fn parse_param(text: &str) -> Result<Kind, StreamError> {
    if text.starts_with(FUNCTION_PREFIX) {
        return read_function(&mut Stream::new(text)).map(Kind::Function);
    }
    if text.starts_with('"') {
        return read_quoted(&mut Stream::new(text)).map(|(value, _)| Kind::Str(value));
    }
    if let Some(name) = text.strip_prefix('%').filter(|name| !name.is_empty()) {
        return Ok(Kind::Variable(name.to_string()));
    }
    if let Some(number) = parse_number(text) {
        return Ok(Kind::Number(number));
    }
    Ok(Kind::Str(text.to_string()))
}

fn is_punctuation(ch: char) -> bool {
    matches!(ch, ',' | '(' | ')' | '{' | '}' | '[' | ']')
}

fn is_option_start(rest: &[char]) -> bool {
    match rest {
        ['-', '-', ch, ..] => ch.is_alphanumeric() || *ch == '_',
        ['-', ch, ..] => ch.is_alphabetic(),
        _ => false,
    }
}

fn is_variable_start(rest: &[char]) -> bool {
    match rest {
        ['%', '&', '&', ..] => false,
        ['%', ch, ..] => !ch.is_whitespace() && *ch != ';',
        _ => false,
    }
}

fn is_word_end(rest: &[char]) -> bool {
    match rest {
        [] | [';', ..] | ['&', '&', ..] => true,
        [ch, ..] => ch.is_whitespace(),
    }
}

fn starts_token(rest: &[char]) -> bool {
    match rest {
        [] | [';', ..] | ['&', '&', ..] | [':', '[', ..] | ['=', '>', ..] => true,
        _ => is_option_start(rest) || is_variable_start(rest),
    }
}

/// True when `text` would not come back unchanged from a bare read.
pub fn needs_quotes(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let first = match chars.first() {
        Some(ch) => *ch,
        None => return true,
    };

    if first.is_ascii_digit() || first == '"' || is_punctuation(first) || starts_token(&chars) {
        return true;
    }
    if text.contains(';') || text.contains('"') || text.contains('\\') || text.contains("&&") {
        return true;
    }
    if first.is_whitespace() || chars.last().map_or(false, |ch| ch.is_whitespace()) {
        return true;
    }

    chars
        .iter()
        .enumerate()
        .any(|(i, ch)| ch.is_whitespace() && starts_token(chars.get(i + 1..).unwrap_or(&[])))
}

pub fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Result<Vec<Kind>, StreamError> {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions::default();
        let mut lexer = Lexer::new(input, &registry, &options);
        let mut kinds = Vec::new();
        while let Some(token) = lexer.next()? {
            kinds.push(token.kind);
        }
        Ok(kinds)
    }

    fn text(s: &str) -> Kind {
        Kind::Str(s.to_string())
    }

    #[test]
    fn test_invoker_command_and_rest_of_line() {
        let kinds = lex("$go play twice tt").unwrap();
        assert_eq!(
            kinds,
            vec![
                Kind::Invoker("$go".to_string()),
                Kind::Command("play".to_string()),
                text("twice tt"),
            ]
        );
    }

    #[test]
    fn test_shorthand_invoker_resolves_alias() {
        let kinds = lex("$p twice tt").unwrap();
        assert_eq!(kinds, vec![Kind::Command("play".to_string()), text("twice tt")]);
    }

    #[test]
    fn test_unresolvable_shorthand_ends_command() {
        let kinds = lex("$nothing here").unwrap();
        assert!(kinds.is_empty());
    }

    #[test]
    fn test_invoker_without_command_croaks() {
        let err = lex("$go badcommand now").unwrap_err();
        assert!(err.message.contains("badcommand"));
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 5);
    }

    #[test]
    fn test_multi_word_command_prefers_longest_match() {
        let kinds = lex("$go Now Playing please").unwrap();
        assert_eq!(kinds[1], Kind::Command("nowplaying".to_string()));
        assert_eq!(kinds[2], text("please"));
    }

    #[test]
    fn test_command_prefix_must_end_on_word_boundary() {
        // "p" is an alias of play but "pl" is not a word
        let kinds = lex("pl ay").unwrap();
        assert_eq!(kinds, vec![text("pl ay")]);
    }

    #[test]
    fn test_only_first_command_is_matched() {
        let kinds = lex("$go play skip").unwrap();
        assert_eq!(kinds[2], text("skip"));
    }

    #[test]
    fn test_numbers() {
        let kinds = lex("$go volume 2.5.1").unwrap();
        assert_eq!(kinds[2], Kind::Number(2.5));
        assert_eq!(kinds[3], text(".1"));
    }

    #[test]
    fn test_options() {
        let kinds = lex(r#"$go play a --some_opt=a-string --another_opt=10 --bool --quote_opt="I can have spaces!""#)
            .unwrap();
        let options: Vec<(String, OptionValue)> = kinds
            .into_iter()
            .filter_map(|kind| match kind {
                Kind::Option(option) => Some((option.name, option.value)),
                _ => None,
            })
            .collect();
        assert_eq!(
            options,
            vec![
                ("some_opt".to_string(), OptionValue::Text("a-string".to_string())),
                ("another_opt".to_string(), OptionValue::Text("10".to_string())),
                ("bool".to_string(), OptionValue::Flag),
                ("quote_opt".to_string(), OptionValue::Text("I can have spaces!".to_string())),
            ]
        );
    }

    #[test]
    fn test_bare_option_value_runs_to_next_token() {
        let kinds = lex("$go play %song_name --song_name=twice tt").unwrap();
        assert_eq!(kinds[2], Kind::Variable("song_name".to_string()));
        match &kinds[3] {
            Kind::Option(option) => {
                assert_eq!(option.value, OptionValue::Text("twice tt".to_string()));
                assert_eq!(option.raw, "--song_name=twice tt");
            }
            other => panic!("expected an option, got {:?}", other),
        }
    }

    #[test]
    fn test_string_stops_before_chain() {
        let kinds = lex("$go play a && $go skip").unwrap();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[2], text("a"));
    }

    #[test]
    fn test_quoted_string_keeps_separators() {
        let kinds = lex(r#"$go play "a; b && \"c\"""#).unwrap();
        assert_eq!(kinds[2], text(r#"a; b && "c""#));
    }

    #[test]
    fn test_unterminated_string_croaks() {
        let err = lex(r#"$go play "open"#).unwrap_err();
        assert!(err.message.contains("Unterminated"));
    }

    #[test]
    fn test_function_call_with_nested_params() {
        let kinds = lex("$go play :[random(a; \"b, c\", 3, :[randint(1,2)])]").unwrap();
        let call = match &kinds[2] {
            Kind::Function(call) => call,
            other => panic!("expected a function, got {:?}", other),
        };
        assert_eq!(call.name, "random");
        assert_eq!(call.raw, ":[random(a; \"b, c\", 3, :[randint(1,2)])]");
        assert_eq!(call.params.len(), 4);
        assert_eq!(call.params[0], text("a"));
        assert_eq!(call.params[1], text("b, c"));
        assert_eq!(call.params[2], Kind::Number(3.0));
        assert!(matches!(&call.params[3], Kind::Function(inner) if inner.name == "randint"));
    }

    #[test]
    fn test_unterminated_function_croaks() {
        assert!(lex("$go play :[random(a, b").is_err());
        assert!(lex("$go play :[random(a, b)").is_err());
    }

    #[test]
    fn test_option_with_function_value() {
        let kinds = lex("$go play x --key=:[random(a;b)]").unwrap();
        match &kinds[3] {
            Kind::Option(option) => {
                assert_eq!(option.raw, "--key=:[random(a;b)]");
                assert!(matches!(&option.value, OptionValue::Call(call) if call.params.len() == 2));
            }
            other => panic!("expected an option, got {:?}", other),
        }
    }

    #[test]
    fn test_alias_marker_flags_following_tokens() {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions::default();
        let mut lexer = Lexer::new("$go alias add mix => $go play :[random(a;b)]", &registry, &options);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next().unwrap() {
            tokens.push(token);
        }
        let marker = tokens.iter().position(|t| t.kind == Kind::AliasDef).unwrap();
        assert!(tokens[..=marker].iter().all(|t| !t.inside_alias));
        assert!(tokens[marker + 1..].iter().all(|t| t.inside_alias));
        // no command matching inside the body
        assert_eq!(tokens[marker + 2].kind, text("play"));
    }

    #[test]
    fn test_variable_stops_before_chain() {
        let kinds = lex("$go play %x&& $go skip").unwrap();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[2], Kind::Variable("x".to_string()));
    }

    #[test]
    fn test_whole_input_alias_still_matches_commands() {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions {
            inside_alias: true,
            ..ParserOptions::default()
        };
        for input in ["$go play :[random(a;b)]", "$p :[random(a;b)]", "play :[random(a;b)]"] {
            let mut lexer = Lexer::new(input, &registry, &options);
            let mut tokens = Vec::new();
            while let Some(token) = lexer.next().unwrap() {
                tokens.push(token);
            }
            assert!(tokens.iter().all(|t| t.inside_alias), "{:?}", input);
            assert!(tokens.iter().any(|t| t.command_name() == Some("play")), "{:?}", input);
            assert!(matches!(tokens.last().map(|t| &t.kind), Some(Kind::Function(_))));
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions::default();
        let mut lexer = Lexer::new("$go skip", &registry, &options);
        assert!(matches!(lexer.peek().unwrap().map(|t| &t.kind), Some(Kind::Invoker(_))));
        assert!(matches!(lexer.next().unwrap().map(|t| t.kind), Some(Kind::Invoker(_))));
        assert!(lexer.peek().unwrap().map_or(false, Token::is_command));
        assert!(lexer.next().unwrap().is_some());
        assert!(lexer.next().unwrap().is_none());
    }

    #[test]
    fn test_finish_command_steps_over_separator() {
        let registry = CommandRegistry::builtin("go");
        let options = ParserOptions::default();
        let mut lexer = Lexer::new("$go skip && $go stop", &registry, &options);
        while lexer.next().unwrap().is_some() {}
        lexer.finish_command();
        let kinds: Vec<Kind> = std::iter::from_fn(|| lexer.next().unwrap()).map(|t| t.kind).collect();
        assert_eq!(kinds[1], Kind::Command("stop".to_string()));
        assert!(lexer.is_eof());
    }

    #[test]
    fn test_needs_quotes() {
        assert!(!needs_quotes("twice tt"));
        assert!(!needs_quotes("a-string"));
        assert!(needs_quotes("a; b"));
        assert!(needs_quotes("go --fast"));
        assert!(needs_quotes("2pac"));
        assert!(needs_quotes(""));
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
    }
}
